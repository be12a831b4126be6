//! BrowserFairy: a passive performance-observation engine for a
//! Chromium-family browser's debugging protocol. It attaches to every page
//! target it is shown, samples memory/GC/heap/long-task/storage/network/
//! console activity, and appends NDJSON records per (host, stream) under a
//! session directory — without ever modifying page behavior.

pub mod collectors;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod host;
pub mod overview;
pub mod protocol;
pub mod rate_limiter;
pub mod registry;
pub mod session;
pub mod source_map;
pub mod supervisor;
pub mod writer;

pub use error::EngineError;
