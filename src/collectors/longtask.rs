//! Long-task collector. The debugging protocol has no native long-task
//! domain, so this installs a small `PerformanceObserver` once per session
//! via `Runtime.evaluate` and then drains its buffer on a fixed cadence —
//! the only script the engine ever injects, and it only reads timing data
//! back out, never touches page state.

use std::sync::Arc;
use std::time::Duration;

use cdp_protocol::{EvaluateResult, LongTaskEntry};
use serde_json::{Map, json};
use tracing::warn;

use crate::collectors::{HostCell, emit};
use crate::event::{build_record, now_iso8601};
use crate::overview::OverviewBuilder;
use crate::session::Session;
use crate::writer::WriterRegistry;

const DRAIN_INTERVAL: Duration = Duration::from_secs(5);

const INSTALL_OBSERVER_EXPR: &str = r"
(() => {
  if (window.__bfLongTasksInstalled) return true;
  window.__bfLongTasksInstalled = true;
  window.__bfLongTasks = [];
  try {
    new PerformanceObserver((list) => {
      for (const entry of list.getEntries()) {
        window.__bfLongTasks.push({
          duration: entry.duration,
          attribution: (entry.attribution && entry.attribution[0] && entry.attribution[0].name) || '',
        });
      }
    }).observe({ type: 'longtask', buffered: true });
  } catch (e) {}
  return true;
})()
";

const DRAIN_EXPR: &str = r"
(() => {
  const buf = window.__bfLongTasks || [];
  window.__bfLongTasks = [];
  return buf;
})()
";

pub fn spawn(session: Session, host: HostCell, writers: Arc<WriterRegistry>, overview: Arc<OverviewBuilder>) {
    tokio::spawn(run(session, host, writers, overview));
}

async fn run(session: Session, host: HostCell, writers: Arc<WriterRegistry>, overview: Arc<OverviewBuilder>) {
    if session
        .call(
            "Runtime.evaluate",
            json!({"expression": INSTALL_OBSERVER_EXPR, "returnByValue": true}),
        )
        .await
        .is_err()
    {
        return;
    }

    let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
    loop {
        ticker.tick().await;
        if session.is_closed() {
            return;
        }

        let result = session
            .call("Runtime.evaluate", json!({"expression": DRAIN_EXPR, "returnByValue": true}))
            .await;
        let entries = match result {
            Ok(v) => parse_entries(v),
            Err(e) => {
                warn!(target_id = session.target_id(), error = %e, "long-task drain failed");
                continue;
            }
        };

        let current_host = host.get();
        for entry in entries {
            let timestamp = now_iso8601();
            let mut extra = Map::new();
            extra.insert("target_id".to_owned(), json!(session.target_id()));
            extra.insert("durationMs".to_owned(), json!(entry.duration));
            extra.insert("attribution".to_owned(), json!(entry.attribution));
            let record = build_record(
                "long_task",
                &current_host,
                &timestamp,
                &["long_task", &current_host, &timestamp, session.target_id(), &entry.duration.to_string()],
                extra,
            );
            emit(&writers, &overview, &current_host, "longtask", record);
        }
    }
}

fn parse_entries(value: serde_json::Value) -> Vec<LongTaskEntry> {
    serde_json::from_value::<EvaluateResult>(value)
        .ok()
        .and_then(|r| r.result.value)
        .and_then(|v| serde_json::from_value::<Vec<LongTaskEntry>>(v).ok())
        .unwrap_or_default()
}
