//! Target Registry: discovers `page` targets, tracks identity/URL/host, and
//! reconciles an event-driven view against a slow poll so missed events are
//! eventually recovered from. Both paths are serialized by one mutex so they
//! never race each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use cdp_protocol::{GetTargetsResult, TargetCreatedEvent, TargetDestroyedEvent, TargetInfo, TargetInfoChangedEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::host::{derive_host, is_observable_url};
use crate::protocol::{ProtocolClient, SessionFilter};

#[derive(Debug, Clone)]
pub struct Target {
    pub target_id: String,
    pub url: String,
    pub host: String,
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Appeared(Target),
    Navigated {
        target_id: String,
        old_host: String,
        new_host: String,
        url: String,
    },
    Disappeared { target_id: String },
}

pub struct TargetRegistry {
    client: ProtocolClient,
    state: Mutex<HashMap<String, Target>>,
    events_tx: mpsc::UnboundedSender<RegistryEvent>,
}

impl TargetRegistry {
    /// Enable discovery, take the initial snapshot, and start the
    /// event-driven + polling reconciliation loops. Returns a channel of
    /// lifecycle notifications the Supervisor drives Sessions from.
    pub async fn start(
        client: ProtocolClient,
        poll_interval: Duration,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RegistryEvent>), crate::protocol::ClientError>
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(TargetRegistry {
            client: client.clone(),
            state: Mutex::new(HashMap::new()),
            events_tx,
        });

        client
            .call("Target.setDiscoverTargets", serde_json::json!({"discover": true}), None)
            .await?;

        let created = client.subscribe("Target.targetCreated", SessionFilter::Any);
        let changed = client.subscribe("Target.targetInfoChanged", SessionFilter::Any);
        let destroyed = client.subscribe("Target.targetDestroyed", SessionFilter::Any);

        let initial = client.call("Target.getTargets", serde_json::json!({}), None).await?;
        if let Ok(result) = serde_json::from_value::<GetTargetsResult>(initial) {
            registry.reconcile(result.target_infos);
        }

        tokio::spawn(event_loop(Arc::clone(&registry), created, changed, destroyed));
        tokio::spawn(poll_loop(Arc::clone(&registry), poll_interval));

        Ok((registry, events_rx))
    }

    /// Current known targets.
    pub fn snapshot(&self) -> Vec<Target> {
        self.state
            .lock()
            .expect("registry state poisoned")
            .values()
            .cloned()
            .collect()
    }

    async fn refresh(&self) {
        match self
            .client
            .call("Target.getTargets", serde_json::json!({}), None)
            .await
        {
            Ok(result) => {
                if let Ok(result) = serde_json::from_value::<GetTargetsResult>(result) {
                    self.reconcile(result.target_infos);
                }
            }
            Err(e) => warn!(error = %e, "registry poll failed"),
        }
    }

    fn reconcile(&self, infos: Vec<TargetInfo>) {
        let mut state = self.state.lock().expect("registry state poisoned");
        reconcile_impl(&mut state, &self.events_tx, infos);
    }

    fn upsert(&self, state: &mut HashMap<String, Target>, target_id: &str, url: &str) {
        upsert_impl(state, &self.events_tx, target_id, url);
    }

    /// Mark a target as just sampled, for LRU eviction ordering in the Supervisor.
    pub fn touch(&self, target_id: &str) {
        if let Some(target) = self.state.lock().expect("registry state poisoned").get_mut(target_id) {
            target.last_seen = Instant::now();
        }
    }
}

fn reconcile_impl(
    state: &mut HashMap<String, Target>,
    events_tx: &mpsc::UnboundedSender<RegistryEvent>,
    infos: Vec<TargetInfo>,
) {
    let mut seen = std::collections::HashSet::new();
    for info in infos {
        if info.target_type != "page" || !is_observable_url(&info.url) {
            continue;
        }
        seen.insert(info.target_id.clone());
        upsert_impl(state, events_tx, &info.target_id, &info.url);
    }
    let gone: Vec<String> = state
        .keys()
        .filter(|id| !seen.contains(*id))
        .cloned()
        .collect();
    for target_id in gone {
        state.remove(&target_id);
        let _ = events_tx.send(RegistryEvent::Disappeared { target_id });
    }
}

fn upsert_impl(
    state: &mut HashMap<String, Target>,
    events_tx: &mpsc::UnboundedSender<RegistryEvent>,
    target_id: &str,
    url: &str,
) {
    let host = derive_host(url);
    match state.get_mut(target_id) {
        None => {
            let target = Target {
                target_id: target_id.to_owned(),
                url: url.to_owned(),
                host: host.clone(),
                last_seen: Instant::now(),
            };
            state.insert(target_id.to_owned(), target.clone());
            let _ = events_tx.send(RegistryEvent::Appeared(target));
        }
        Some(existing) => {
            existing.last_seen = Instant::now();
            if existing.host != host {
                let old_host = std::mem::replace(&mut existing.host, host.clone());
                existing.url = url.to_owned();
                let _ = events_tx.send(RegistryEvent::Navigated {
                    target_id: target_id.to_owned(),
                    old_host,
                    new_host: host,
                    url: url.to_owned(),
                });
            } else {
                existing.url = url.to_owned();
            }
        }
    }
}

async fn event_loop(
    registry: Arc<TargetRegistry>,
    mut created: crate::protocol::EventStream,
    mut changed: crate::protocol::EventStream,
    mut destroyed: crate::protocol::EventStream,
) {
    loop {
        tokio::select! {
            ev = created.recv() => {
                let Some(ev) = ev else { break };
                if let Ok(parsed) = serde_json::from_value::<TargetCreatedEvent>(ev.params) {
                    let mut state = registry.state.lock().expect("registry state poisoned");
                    if parsed.target_info.target_type == "page" && is_observable_url(&parsed.target_info.url) {
                        registry.upsert(&mut state, &parsed.target_info.target_id, &parsed.target_info.url);
                    }
                }
            }
            ev = changed.recv() => {
                let Some(ev) = ev else { break };
                if let Ok(parsed) = serde_json::from_value::<TargetInfoChangedEvent>(ev.params) {
                    let mut state = registry.state.lock().expect("registry state poisoned");
                    if parsed.target_info.target_type == "page" && is_observable_url(&parsed.target_info.url) {
                        registry.upsert(&mut state, &parsed.target_info.target_id, &parsed.target_info.url);
                    }
                }
            }
            ev = destroyed.recv() => {
                let Some(ev) = ev else { break };
                if let Ok(parsed) = serde_json::from_value::<TargetDestroyedEvent>(ev.params) {
                    let mut state = registry.state.lock().expect("registry state poisoned");
                    if state.remove(&parsed.target_id).is_some() {
                        let _ = registry.events_tx.send(RegistryEvent::Disappeared {
                            target_id: parsed.target_id,
                        });
                    }
                }
            }
        }
    }
    debug!("registry event streams ended");
}

async fn poll_loop(registry: Arc<TargetRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; we already took the initial snapshot
    loop {
        ticker.tick().await;
        registry.refresh().await;
    }
}
