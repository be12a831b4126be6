//! The session overview: accumulated in memory over the run and serialized
//! once at shutdown, mirroring how the teacher's `AppState` accumulates
//! shared counters and is read out on demand rather than streamed live.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub struct OverviewBuilder {
    started_at: Instant,
    started_at_wall: DateTime<Utc>,
    counts: Mutex<HashMap<(String, String), u64>>,
    domain_unavailable: Mutex<Vec<DomainUnavailableNote>>,
}

#[derive(Debug, Clone, Serialize)]
struct DomainUnavailableNote {
    target_id: String,
    domain: String,
    reason: String,
}

impl OverviewBuilder {
    pub fn new() -> Self {
        OverviewBuilder {
            started_at: Instant::now(),
            started_at_wall: Utc::now(),
            counts: Mutex::new(HashMap::new()),
            domain_unavailable: Mutex::new(Vec::new()),
        }
    }

    pub fn record_event(&self, host: &str, stream: &str) {
        let mut counts = self.counts.lock().expect("overview counts poisoned");
        *counts
            .entry((host.to_owned(), stream.to_owned()))
            .or_insert(0) += 1;
    }

    pub fn record_domain_unavailable(&self, target_id: &str, domain: &str, reason: &str) {
        self.domain_unavailable
            .lock()
            .expect("overview notes poisoned")
            .push(DomainUnavailableNote {
                target_id: target_id.to_owned(),
                domain: domain.to_owned(),
                reason: reason.to_owned(),
            });
    }

    /// Build the final serializable overview. `drop_counts` comes from
    /// [`crate::writer::WriterRegistry::drop_counts`].
    pub fn finish(&self, drop_counts: HashMap<(String, String), u64>) -> Overview {
        let counts = self.counts.lock().expect("overview counts poisoned");
        let mut streams: Vec<StreamOverview> = counts
            .iter()
            .map(|((host, stream), n)| StreamOverview {
                host: host.clone(),
                stream: stream.clone(),
                record_count: *n,
                dropped_count: drop_counts
                    .get(&(host.clone(), stream.clone()))
                    .copied()
                    .unwrap_or(0),
            })
            .collect();
        streams.sort_by(|a, b| a.host.cmp(&b.host).then(a.stream.cmp(&b.stream)));

        Overview {
            schema_version: crate::event::SCHEMA_VERSION,
            started_at: self.started_at_wall.to_rfc3339(),
            ended_at: Utc::now().to_rfc3339(),
            duration_secs: self.started_at.elapsed().as_secs_f64(),
            streams,
            domain_unavailable: self
                .domain_unavailable
                .lock()
                .expect("overview notes poisoned")
                .clone(),
        }
    }
}

impl Default for OverviewBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct Overview {
    schema_version: u32,
    started_at: String,
    ended_at: String,
    duration_secs: f64,
    streams: Vec<StreamOverview>,
    domain_unavailable: Vec<DomainUnavailableNote>,
}

#[derive(Debug, Serialize)]
struct StreamOverview {
    host: String,
    stream: String,
    record_count: u64,
    dropped_count: u64,
}

impl Overview {
    pub async fn write_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).expect("overview always serializes");
        tokio::fs::write(path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_aggregates_counts_and_drops() {
        let overview = OverviewBuilder::new();
        overview.record_event("example.com", "memory");
        overview.record_event("example.com", "memory");
        overview.record_event("example.com", "console");

        let mut drops = HashMap::new();
        drops.insert(("example.com".to_owned(), "console".to_owned()), 3u64);

        let finished = overview.finish(drops);
        assert_eq!(finished.streams.len(), 2);
        let memory = finished.streams.iter().find(|s| s.stream == "memory").unwrap();
        assert_eq!(memory.record_count, 2);
        assert_eq!(memory.dropped_count, 0);
        let console = finished.streams.iter().find(|s| s.stream == "console").unwrap();
        assert_eq!(console.dropped_count, 3);
    }

    #[test]
    fn domain_unavailable_notes_are_preserved() {
        let overview = OverviewBuilder::new();
        overview.record_domain_unavailable("T1", "HeapProfiler", "not supported in this target");
        let finished = overview.finish(HashMap::new());
        assert_eq!(finished.domain_unavailable.len(), 1);
        assert_eq!(finished.domain_unavailable[0].domain, "HeapProfiler");
    }
}
