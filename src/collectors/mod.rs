//! Per-session collectors. Each collector is a small state machine that
//! registers its event subscriptions (or starts its polling timer) on
//! `spawn` and stops when its session closes; none of them share a global
//! mutable dispatch table.

pub mod console;
pub mod gc;
pub mod heap;
pub mod listener_leak;
pub mod longtask;
pub mod memory;
pub mod network;
pub mod storage;

use std::sync::Arc;
use std::sync::Mutex;

use crate::overview::OverviewBuilder;
use crate::writer::WriterRegistry;

/// The current host for a target, shared between the Supervisor (which
/// updates it on navigation) and every collector on that session (which
/// reads it to tag outgoing records). A target keeps one Session across a
/// navigation; only the host tag on subsequent records changes.
#[derive(Clone)]
pub struct HostCell(Arc<Mutex<String>>);

impl HostCell {
    pub fn new(host: String) -> Self {
        HostCell(Arc::new(Mutex::new(host)))
    }

    pub fn get(&self) -> String {
        self.0.lock().expect("host cell poisoned").clone()
    }

    pub fn set(&self, host: String) {
        *self.0.lock().expect("host cell poisoned") = host;
    }
}

/// Enqueue a record and account for it in the overview, in one call — every
/// collector emits through this rather than touching the writer directly.
pub fn emit(
    writers: &WriterRegistry,
    overview: &OverviewBuilder,
    host: &str,
    stream: &str,
    record: serde_json::Value,
) {
    writers.handle_for(host, stream).enqueue(record);
    overview.record_event(host, stream);
}
