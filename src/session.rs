//! Session: one attached target. Owns the domain-enable handshake and is the
//! substrate every collector calls and subscribes through.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::overview::OverviewBuilder;
use crate::protocol::{ClientError, Event, EventStream, ProtocolClient, SessionFilter};

/// Domains a Session enables on attach. Failure to enable any one of these is
/// logged and recorded in the overview, but never fails the Session.
const DOMAINS: &[&str] = &[
    "Runtime",
    "Performance",
    "Network",
    "Log",
    "Page",
    "DOMStorage",
    "HeapProfiler",
    "Debugger",
];

#[derive(Clone)]
pub struct Session {
    client: ProtocolClient,
    session_tag: String,
    target_id: String,
    closed: Arc<AtomicBool>,
}

impl Session {
    /// Attach to `target_id` and enable the collectors' domains.
    ///
    /// Returns `Ok(None)` if the target disappeared before or during attach
    /// (`TargetGone` per the error table) — the caller aborts Session
    /// creation silently rather than propagating an error.
    pub async fn attach(
        client: ProtocolClient,
        target_id: &str,
        overview: &OverviewBuilder,
    ) -> Result<Option<Session>, ClientError> {
        let attach_result = client
            .call(
                "Target.attachToTarget",
                serde_json::json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await;

        let session_tag = match attach_result {
            Ok(value) => match serde_json::from_value::<cdp_protocol::AttachToTargetResult>(value) {
                Ok(result) => result.session_id,
                Err(_) => return Ok(None),
            },
            Err(ClientError::Protocol { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let session = Session {
            client,
            session_tag,
            target_id: target_id.to_owned(),
            closed: Arc::new(AtomicBool::new(false)),
        };

        for domain in DOMAINS {
            if let Err(e) = session
                .call(&format!("{domain}.enable"), serde_json::json!({}))
                .await
            {
                warn!(target_id, domain, error = %e, "domain unavailable, continuing without it");
                overview.record_domain_unavailable(target_id, domain, &e.to_string());
            }
        }

        Ok(Some(session))
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Route a call through this session's tag. Returns `Disconnected`
    /// immediately if the session has already been closed.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Disconnected);
        }
        self.client.call(method, params, Some(&self.session_tag)).await
    }

    pub fn subscribe(&self, event_name: &str) -> EventStream {
        self.client
            .subscribe(event_name, SessionFilter::Tag(self.session_tag.clone()))
    }

    /// Idempotent: a second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self
            .client
            .call(
                "Target.detachFromTarget",
                serde_json::json!({"sessionId": self.session_tag}),
                None,
            )
            .await;
        debug!(target_id = %self.target_id, "session closed");
    }
}

/// Convenience wrapper used by collectors that just want the decoded event
/// payload and don't care about the raw envelope.
pub fn into_payload(event: Event) -> serde_json::Value {
    event.params
}
