//! Heap sampling profiler: a low-overhead allocation sampler, restarted once
//! per cycle so each emitted record reflects just that window rather than
//! an ever-growing cumulative profile.

use std::sync::Arc;
use std::time::Duration;

use cdp_protocol::SamplingHeapProfile;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::collectors::{HostCell, emit};
use crate::event::{build_record, now_iso8601};
use crate::overview::OverviewBuilder;
use crate::session::Session;
use crate::writer::WriterRegistry;

const CYCLE_INTERVAL: Duration = Duration::from_secs(60);
const SAMPLING_INTERVAL_BYTES: u64 = 65536;

pub fn spawn(session: Session, host: HostCell, writers: Arc<WriterRegistry>, overview: Arc<OverviewBuilder>) {
    tokio::spawn(run(session, host, writers, overview));
}

async fn run(session: Session, host: HostCell, writers: Arc<WriterRegistry>, overview: Arc<OverviewBuilder>) {
    if session
        .call(
            "HeapProfiler.startSampling",
            json!({"samplingInterval": SAMPLING_INTERVAL_BYTES}),
        )
        .await
        .is_err()
    {
        return;
    }

    let mut ticker = tokio::time::interval(CYCLE_INTERVAL);
    ticker.tick().await; // first tick is immediate; let a full cycle of samples accumulate

    loop {
        ticker.tick().await;
        if session.is_closed() {
            return;
        }

        let profile = match session.call("HeapProfiler.getSamplingProfile", json!({})).await {
            Ok(v) => serde_json::from_value::<SamplingHeapProfile>(v).ok(),
            Err(e) => {
                warn!(target_id = session.target_id(), error = %e, "HeapProfiler.getSamplingProfile failed");
                None
            }
        };

        if session
            .call("HeapProfiler.stopSampling", json!({}))
            .await
            .is_ok()
            && session
                .call(
                    "HeapProfiler.startSampling",
                    json!({"samplingInterval": SAMPLING_INTERVAL_BYTES}),
                )
                .await
                .is_err()
        {
            return;
        }

        let Some(profile) = profile else { continue };

        let mut totals: std::collections::HashMap<(String, String, i64, i64), f64> = std::collections::HashMap::new();
        accumulate_self_size(&profile.head, &mut totals);

        let current_host = host.get();
        let timestamp = now_iso8601();
        let top: Vec<Value> = {
            let mut entries: Vec<_> = totals.into_iter().collect();
            entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            entries
                .into_iter()
                .take(10)
                .map(|((function_name, url, line, column), self_size)| {
                    json!({
                        "functionName": function_name,
                        "url": url,
                        "lineNumber": line,
                        "columnNumber": column,
                        "selfSizeBytes": self_size,
                    })
                })
                .collect()
        };

        let mut extra = Map::new();
        extra.insert("target_id".to_owned(), json!(session.target_id()));
        extra.insert("topAllocations".to_owned(), json!(top));
        let record = build_record(
            "heap_sample",
            &current_host,
            &timestamp,
            &["heap_sample", &current_host, &timestamp, session.target_id()],
            extra,
        );
        emit(&writers, &overview, &current_host, "heap_sampling", record);
    }
}

fn accumulate_self_size(
    node: &cdp_protocol::SamplingHeapProfileNode,
    totals: &mut std::collections::HashMap<(String, String, i64, i64), f64>,
) {
    if node.self_size > 0.0 {
        let key = (
            node.call_frame.function_name.clone(),
            node.call_frame.url.clone(),
            node.call_frame.line_number,
            node.call_frame.column_number,
        );
        *totals.entry(key).or_insert(0.0) += node.self_size;
    }
    for child in &node.children {
        accumulate_self_size(child, totals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_protocol::{CallFrame, SamplingHeapProfileNode};

    fn leaf(name: &str, self_size: f64) -> SamplingHeapProfileNode {
        SamplingHeapProfileNode {
            call_frame: CallFrame {
                function_name: name.to_owned(),
                url: "app.js".to_owned(),
                line_number: 1,
                column_number: 1,
            },
            self_size,
            children: Vec::new(),
        }
    }

    #[test]
    fn accumulates_self_size_across_siblings_and_children() {
        let tree = SamplingHeapProfileNode {
            call_frame: CallFrame {
                function_name: "root".to_owned(),
                url: "app.js".to_owned(),
                line_number: 0,
                column_number: 0,
            },
            self_size: 0.0,
            children: vec![leaf("a", 100.0), leaf("a", 50.0), leaf("b", 10.0)],
        };
        let mut totals = std::collections::HashMap::new();
        accumulate_self_size(&tree, &mut totals);
        let a_total: f64 = totals
            .iter()
            .filter(|((name, ..), _)| name == "a")
            .map(|(_, v)| *v)
            .sum();
        assert_eq!(a_total, 150.0);
    }
}
