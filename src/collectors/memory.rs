//! Memory sampler: polls `Performance.getMetrics` + `Memory.getDOMCounters`
//! on a fixed cadence, correlates spikes against recent network/console
//! activity, and triggers a deep listener-leak analysis when the JS listener
//! count jumps suspiciously between two samples.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cdp_protocol::{DomCountersResult, GetMetricsResult};
use serde_json::{Map, json};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::collectors::{HostCell, emit};
use crate::correlator::Correlator;
use crate::event::{build_record, now_iso8601};
use crate::overview::OverviewBuilder;
use crate::session::Session;
use crate::writer::WriterRegistry;

use super::listener_leak::{self, ListenerSource};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
const LISTENER_GROWTH_DEEP_ANALYSIS_THRESHOLD: i64 = 20;
const DEEP_ANALYSIS_BUDGET: Duration = Duration::from_millis(300);

/// Spawn the memory sampler for one session. Runs until the session closes
/// or its event stream ends.
pub fn spawn(
    session: Session,
    host: HostCell,
    writers: Arc<WriterRegistry>,
    overview: Arc<OverviewBuilder>,
    correlator: Arc<Correlator>,
    sample_permits: Arc<Semaphore>,
) {
    tokio::spawn(run(session, host, writers, overview, correlator, sample_permits));
}

async fn run(
    session: Session,
    host: HostCell,
    writers: Arc<WriterRegistry>,
    overview: Arc<OverviewBuilder>,
    correlator: Arc<Correlator>,
    sample_permits: Arc<Semaphore>,
) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    let mut previous_listeners: Option<i64> = None;
    let pending_deep_analysis: Arc<Mutex<Option<Vec<ListenerSource>>>> = Arc::new(Mutex::new(None));

    loop {
        ticker.tick().await;
        if session.is_closed() {
            return;
        }

        let Ok(_permit) = sample_permits.acquire().await else {
            return;
        };

        let metrics = match session.call("Performance.getMetrics", json!({})).await {
            Ok(v) => serde_json::from_value::<GetMetricsResult>(v).ok(),
            Err(e) => {
                warn!(target_id = session.target_id(), error = %e, "Performance.getMetrics failed");
                None
            }
        };
        let dom_counters = match session.call("Memory.getDOMCounters", json!({})).await {
            Ok(v) => serde_json::from_value::<DomCountersResult>(v).ok(),
            Err(_) => None,
        };

        let Some(metrics) = metrics else { continue };
        let metric_map: std::collections::HashMap<&str, f64> =
            metrics.metrics.iter().map(|m| (m.name.as_str(), m.value)).collect();

        let heap_used = metric_map.get("JSHeapUsedSize").copied().unwrap_or(0.0) as u64;
        let current_host = host.get();
        let now = Instant::now();

        let listener_count = dom_counters.as_ref().map(|d| d.js_event_listeners);
        let growth_delta = match (previous_listeners, listener_count) {
            (Some(prev), Some(cur)) => cur - prev,
            _ => 0,
        };
        if let Some(cur) = listener_count {
            previous_listeners = Some(cur);
        }

        if growth_delta > LISTENER_GROWTH_DEEP_ANALYSIS_THRESHOLD {
            let session = session.clone();
            let pending = Arc::clone(&pending_deep_analysis);
            tokio::spawn(async move {
                let sources = listener_leak::run_deep_analysis(&session, DEEP_ANALYSIS_BUDGET).await;
                *pending.lock().expect("pending deep-analysis cell poisoned") = Some(sources);
            });
        }

        let correlation = correlator.observe_memory(&current_host, heap_used, now);

        let mut extra = Map::new();
        extra.insert("target_id".to_owned(), json!(session.target_id()));
        for (name, value) in &metric_map {
            extra.insert((*name).to_owned(), json!(value));
        }
        if let Some(d) = &dom_counters {
            extra.insert("documents".to_owned(), json!(d.documents));
            extra.insert("nodes".to_owned(), json!(d.nodes));
            extra.insert("jsEventListeners".to_owned(), json!(d.js_event_listeners));
            extra.insert("listenerGrowthDelta".to_owned(), json!(growth_delta));
        }
        if let Some(sources) = pending_deep_analysis.lock().expect("pending deep-analysis cell poisoned").take() {
            extra.insert("listenerLeakAnalysis".to_owned(), json!(sources));
        }

        let timestamp = now_iso8601();
        let record = build_record(
            "memory",
            &current_host,
            &timestamp,
            &["memory", &current_host, &timestamp, session.target_id()],
            extra,
        );
        emit(&writers, &overview, &current_host, "memory", record);

        if let Some(m) = &correlation {
            let mut correlation_extra = Map::new();
            correlation_extra.insert("target_id".to_owned(), json!(session.target_id()));
            correlation_extra.insert("classification".to_owned(), json!(m.classification));
            correlation_extra.insert("heapDeltaBytes".to_owned(), json!(m.heap_delta));
            correlation_extra.insert("networkRequestId".to_owned(), json!(m.network.as_ref().map(|n| n.request_id.clone())));
            correlation_extra.insert("consoleErrorMessage".to_owned(), json!(m.console_error.as_ref().map(|c| c.message.clone())));
            let correlation_record = build_record(
                "correlation",
                &current_host,
                &timestamp,
                &["correlation", &current_host, &timestamp, session.target_id()],
                correlation_extra,
            );
            emit(&writers, &overview, &current_host, "correlations", correlation_record);
        }
    }
}
