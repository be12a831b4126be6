//! Correlator: a pure function over a short, bounded ring buffer per host.
//! It never calls back into collectors — it is driven by `observe_*` calls
//! and returns a correlation when one fires.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const RING_WINDOW: Duration = Duration::from_secs(15);
const CORRELATION_WINDOW: Duration = Duration::from_secs(3);
const MEMORY_DELTA_THRESHOLD: u64 = 10 * 1024 * 1024;
const NETWORK_SIZE_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct NetworkSample {
    pub request_id: String,
    pub size: u64,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct ConsoleErrorSample {
    pub message: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct MemorySample {
    pub heap_used: u64,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct CorrelationMatch {
    pub classification: &'static str,
    pub heap_delta: u64,
    pub network: Option<NetworkSample>,
    pub console_error: Option<ConsoleErrorSample>,
}

#[derive(Default)]
struct HostRing {
    last_memory: Option<MemorySample>,
    recent_network: VecDeque<NetworkSample>,
    recent_console_errors: VecDeque<ConsoleErrorSample>,
    last_correlation_at: Option<Instant>,
}

impl HostRing {
    fn prune(&mut self, now: Instant) {
        self.recent_network
            .retain(|n| now.duration_since(n.at) <= RING_WINDOW);
        self.recent_console_errors
            .retain(|c| now.duration_since(c.at) <= RING_WINDOW);
    }
}

#[derive(Default)]
pub struct Correlator {
    hosts: Mutex<HashMap<String, HostRing>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_network_complete(&self, host: &str, request_id: &str, size: u64, at: Instant) {
        let mut hosts = self.hosts.lock().expect("correlator poisoned");
        let ring = hosts.entry(host.to_owned()).or_default();
        ring.prune(at);
        ring.recent_network.push_back(NetworkSample {
            request_id: request_id.to_owned(),
            size,
            at,
        });
    }

    pub fn observe_console_error(&self, host: &str, message: &str, at: Instant) {
        let mut hosts = self.hosts.lock().expect("correlator poisoned");
        let ring = hosts.entry(host.to_owned()).or_default();
        ring.prune(at);
        ring.recent_console_errors.push_back(ConsoleErrorSample {
            message: message.to_owned(),
            at,
        });
    }

    /// Feed a new memory sample; returns a correlation if this sample
    /// triggers one. At most one correlation fires per rolling 3 s window
    /// per host.
    pub fn observe_memory(&self, host: &str, heap_used: u64, at: Instant) -> Option<CorrelationMatch> {
        let mut hosts = self.hosts.lock().expect("correlator poisoned");
        let ring = hosts.entry(host.to_owned()).or_default();
        ring.prune(at);

        let delta = match &ring.last_memory {
            Some(prev) if heap_used > prev.heap_used => heap_used - prev.heap_used,
            _ => 0,
        };
        ring.last_memory = Some(MemorySample { heap_used, at });

        if delta < MEMORY_DELTA_THRESHOLD {
            return None;
        }
        if let Some(last) = ring.last_correlation_at {
            if at.duration_since(last) < CORRELATION_WINDOW {
                return None;
            }
        }

        let network = ring
            .recent_network
            .iter()
            .rev()
            .find(|n| at.duration_since(n.at) <= CORRELATION_WINDOW && n.size >= NETWORK_SIZE_THRESHOLD)
            .cloned();
        let console_error = ring
            .recent_console_errors
            .iter()
            .rev()
            .find(|c| at.duration_since(c.at) <= CORRELATION_WINDOW)
            .cloned();

        if network.is_none() && console_error.is_none() {
            return None;
        }

        ring.last_correlation_at = Some(at);
        Some(CorrelationMatch {
            classification: "large_data_processing_issue",
            heap_delta: delta,
            network,
            console_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlates_memory_spike_with_recent_large_network_complete() {
        let correlator = Correlator::new();
        let t0 = Instant::now();
        correlator.observe_network_complete("example.com", "req1", 2 * 1024 * 1024, t0);
        let result = correlator.observe_memory("example.com", 20 * 1024 * 1024, t0 + Duration::from_millis(500));
        let m = result.expect("expected a correlation");
        assert_eq!(m.classification, "large_data_processing_issue");
        assert!(m.network.is_some());
    }

    #[test]
    fn no_correlation_without_a_prior_sample_to_diff_against() {
        let correlator = Correlator::new();
        let t0 = Instant::now();
        assert!(correlator.observe_memory("example.com", 20 * 1024 * 1024, t0).is_none());
    }

    #[test]
    fn small_heap_delta_does_not_correlate() {
        let correlator = Correlator::new();
        let t0 = Instant::now();
        correlator.observe_network_complete("example.com", "req1", 2 * 1024 * 1024, t0);
        correlator.observe_memory("example.com", 10 * 1024 * 1024, t0);
        let result = correlator.observe_memory("example.com", 11 * 1024 * 1024, t0 + Duration::from_millis(100));
        assert!(result.is_none());
    }

    #[test]
    fn at_most_one_correlation_per_rolling_window() {
        let correlator = Correlator::new();
        let t0 = Instant::now();
        correlator.observe_network_complete("example.com", "req1", 2 * 1024 * 1024, t0);
        correlator.observe_memory("example.com", 0, t0);
        assert!(correlator.observe_memory("example.com", 20 * 1024 * 1024, t0 + Duration::from_millis(100)).is_some());
        correlator.observe_network_complete("example.com", "req2", 2 * 1024 * 1024, t0 + Duration::from_millis(200));
        assert!(correlator.observe_memory("example.com", 40 * 1024 * 1024, t0 + Duration::from_millis(300)).is_none());
    }

    #[test]
    fn old_network_samples_fall_outside_the_correlation_window() {
        let correlator = Correlator::new();
        let t0 = Instant::now();
        correlator.observe_network_complete("example.com", "req1", 2 * 1024 * 1024, t0);
        correlator.observe_memory("example.com", 0, t0);
        let result = correlator.observe_memory(
            "example.com",
            20 * 1024 * 1024,
            t0 + Duration::from_secs(4),
        );
        assert!(result.is_none());
    }
}
