//! Storage collector: periodic quota polling plus a live feed of
//! localStorage/sessionStorage mutations, both tagged to the owning host.

use std::sync::Arc;
use std::time::Duration;

use cdp_protocol::{
    DomStorageItemAddedParams, DomStorageItemRemovedParams, DomStorageItemUpdatedParams,
    DomStorageItemsClearedParams, EvaluateResult, GetUsageAndQuotaResult,
};
use serde_json::{Map, json};
use tracing::warn;

use crate::collectors::{HostCell, emit};
use crate::event::{build_record, now_iso8601};
use crate::overview::OverviewBuilder;
use crate::session::{Session, into_payload};
use crate::writer::WriterRegistry;

const QUOTA_POLL_INTERVAL: Duration = Duration::from_secs(30);
const VALUE_TRUNCATION_LIMIT: usize = 2048;
const ESTIMATE_FALLBACK_EXPR: &str = "navigator.storage.estimate()";

pub fn spawn(session: Session, host: HostCell, writers: Arc<WriterRegistry>, overview: Arc<OverviewBuilder>) {
    tokio::spawn(run(session, host, writers, overview));
}

async fn run(session: Session, host: HostCell, writers: Arc<WriterRegistry>, overview: Arc<OverviewBuilder>) {
    let mut added = session.subscribe("DOMStorage.domStorageItemAdded");
    let mut removed = session.subscribe("DOMStorage.domStorageItemRemoved");
    let mut updated = session.subscribe("DOMStorage.domStorageItemUpdated");
    let mut cleared = session.subscribe("DOMStorage.domStorageItemsCleared");
    let mut quota_ticker = tokio::time::interval(QUOTA_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = quota_ticker.tick() => {
                if session.is_closed() {
                    return;
                }
                poll_quota(&session, &host, &writers, &overview).await;
            }
            ev = added.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<DomStorageItemAddedParams>(into_payload(ev)) {
                    emit_mutation(&writers, &overview, &host, &session, "storage_mutation", "added", &p.storage_id.is_local_storage, &p.key, Some(&p.new_value));
                }
            }
            ev = removed.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<DomStorageItemRemovedParams>(into_payload(ev)) {
                    emit_mutation(&writers, &overview, &host, &session, "storage_mutation", "removed", &p.storage_id.is_local_storage, &p.key, None);
                }
            }
            ev = updated.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<DomStorageItemUpdatedParams>(into_payload(ev)) {
                    emit_mutation(&writers, &overview, &host, &session, "storage_mutation", "updated", &p.storage_id.is_local_storage, &p.key, Some(&p.new_value));
                }
            }
            ev = cleared.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<DomStorageItemsClearedParams>(into_payload(ev)) {
                    emit_mutation(&writers, &overview, &host, &session, "storage_mutation", "cleared", &p.storage_id.is_local_storage, "", None);
                }
            }
        }
    }
}

async fn poll_quota(session: &Session, host: &HostCell, writers: &Arc<WriterRegistry>, overview: &Arc<OverviewBuilder>) {
    let current_host = host.get();
    let origin = format!("https://{current_host}");
    let result = session
        .call("Storage.getUsageAndQuota", json!({"origin": origin}))
        .await;
    let quota = match result {
        Ok(v) => serde_json::from_value::<GetUsageAndQuotaResult>(v).ok(),
        Err(e) => {
            warn!(target_id = session.target_id(), error = %e, "Storage.getUsageAndQuota failed, falling back to navigator.storage.estimate()");
            fallback_estimate(session).await
        }
    };
    let Some(quota) = quota else { return };

    let timestamp = now_iso8601();
    let mut extra = Map::new();
    extra.insert("target_id".to_owned(), json!(session.target_id()));
    extra.insert("usageBytes".to_owned(), json!(quota.usage));
    extra.insert("quotaBytes".to_owned(), json!(quota.quota));
    let record = build_record(
        "storage_quota",
        &current_host,
        &timestamp,
        &["storage_quota", &current_host, &timestamp, session.target_id()],
        extra,
    );
    emit(writers, overview, &current_host, "storage", record);
}

/// Falls back to a page-evaluated `navigator.storage.estimate()` when the
/// browser-level `Storage.getUsageAndQuota` call errors (permission denied
/// in some embedder configurations, or the domain simply unavailable).
async fn fallback_estimate(session: &Session) -> Option<GetUsageAndQuotaResult> {
    let result = session
        .call(
            "Runtime.evaluate",
            json!({"expression": ESTIMATE_FALLBACK_EXPR, "awaitPromise": true, "returnByValue": true}),
        )
        .await;
    let result = match result {
        Ok(v) => v,
        Err(e) => {
            warn!(target_id = session.target_id(), error = %e, "navigator.storage.estimate() fallback failed");
            return None;
        }
    };
    serde_json::from_value::<EvaluateResult>(result)
        .ok()?
        .result
        .value
        .and_then(|v| serde_json::from_value::<GetUsageAndQuotaResult>(v).ok())
}

fn emit_mutation(
    writers: &WriterRegistry,
    overview: &OverviewBuilder,
    host: &HostCell,
    session: &Session,
    event_type: &str,
    action: &str,
    is_local_storage: &bool,
    key: &str,
    value: Option<&str>,
) {
    let current_host = host.get();
    let timestamp = now_iso8601();
    let truncated_value = value.map(truncate);
    let mut extra = Map::new();
    extra.insert("target_id".to_owned(), json!(session.target_id()));
    extra.insert("action".to_owned(), json!(action));
    extra.insert("storageArea".to_owned(), json!(if *is_local_storage { "local" } else { "session" }));
    extra.insert("key".to_owned(), json!(key));
    if let Some(v) = truncated_value {
        extra.insert("value".to_owned(), json!(v));
    }
    let record = build_record(
        event_type,
        &current_host,
        &timestamp,
        &[event_type, &current_host, &timestamp, session.target_id(), action, key],
        extra,
    );
    emit(writers, overview, &current_host, "storage", record);
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= VALUE_TRUNCATION_LIMIT {
        value.to_owned()
    } else {
        let mut truncated: String = value.chars().take(VALUE_TRUNCATION_LIMIT).collect();
        truncated.push_str("...[truncated]");
        truncated
    }
}
