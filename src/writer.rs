//! Per-host, per-stream append-only writer.
//!
//! One writer owns one open file handle, the on-disk byte count, and a
//! bounded in-memory queue; producers enqueue records, a single consumer
//! task appends them as newline-delimited JSON. Rotation and shutdown always
//! force a full flush — that invariant is non-negotiable regardless of the
//! configured flush mode (see [`crate::config::FlushConfig`]).
//!
//! The bounded-queue shape mirrors
//! [`crate::protocol::subscription::SubscriptionRegistry`]: drop the oldest
//! entry on overflow rather than block the producer, and count the drop.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::config::{EngineConfig, FlushConfig};

struct Queue {
    capacity: usize,
    inner: Mutex<VecDeque<serde_json::Value>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Queue {
            capacity,
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, record: serde_json::Value) {
        let mut q = self.inner.lock().expect("writer queue poisoned");
        if q.len() >= self.capacity {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(record);
        drop(q);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<serde_json::Value> {
        loop {
            {
                let mut q = self.inner.lock().expect("writer queue poisoned");
                if let Some(record) = q.pop_front() {
                    return Some(record);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// A cloneable handle producers use to enqueue records for one (host, stream).
#[derive(Clone)]
pub struct WriterHandle {
    queue: Arc<Queue>,
}

impl WriterHandle {
    /// Enqueue one record, non-blocking; drops the oldest queued record if
    /// the queue is already at capacity.
    pub fn enqueue(&self, record: serde_json::Value) {
        self.queue.push(record);
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

struct RunningWriter {
    handle: WriterHandle,
    task: tokio::task::JoinHandle<()>,
}

/// Owns every live (host, stream) writer for one session run.
pub struct WriterRegistry {
    session_dir: PathBuf,
    rotation_max_bytes: u64,
    rotation_max_age: Duration,
    flush: FlushConfig,
    queue_depth: usize,
    writers: Mutex<HashMap<(String, String), RunningWriter>>,
}

impl WriterRegistry {
    pub fn new(session_dir: PathBuf, config: &EngineConfig) -> Self {
        WriterRegistry {
            session_dir,
            rotation_max_bytes: config.rotation.max_bytes,
            rotation_max_age: config.rotation.max_age,
            flush: config.flush.clone(),
            queue_depth: config.writer_queue_depth,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Get (creating if needed) the writer for `(host, stream)`.
    pub fn handle_for(&self, host: &str, stream: &str) -> WriterHandle {
        let key = (host.to_owned(), stream.to_owned());
        let mut writers = self.writers.lock().expect("writer registry poisoned");
        if let Some(running) = writers.get(&key) {
            return running.handle.clone();
        }
        let queue = Arc::new(Queue::new(self.queue_depth));
        let handle = WriterHandle {
            queue: Arc::clone(&queue),
        };
        let path = self.session_dir.join(host).join(format!("{stream}.jsonl"));
        let rotation_max_bytes = self.rotation_max_bytes;
        let rotation_max_age = self.rotation_max_age;
        let flush = self.flush.clone();
        let task = tokio::spawn(async move {
            run_writer(path, queue, rotation_max_bytes, rotation_max_age, flush).await;
        });
        writers.insert(key, RunningWriter {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Cumulative drop counts per (host, stream), for the session overview.
    pub fn drop_counts(&self) -> HashMap<(String, String), u64> {
        self.writers
            .lock()
            .expect("writer registry poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.handle.dropped_count()))
            .collect()
    }

    /// Close every writer's queue and wait for its final flush to complete.
    /// Non-negotiable: this must finish before the process exits.
    pub async fn flush_all_and_close(&self) {
        let running: Vec<RunningWriter> = {
            let mut writers = self.writers.lock().expect("writer registry poisoned");
            writers.drain().map(|(_, v)| v).collect()
        };
        for running in running {
            running.handle.queue.close();
            if let Err(e) = running.task.await {
                error!(error = %e, "writer task panicked during shutdown");
            }
        }
    }
}

async fn run_writer(
    path: PathBuf,
    queue: Arc<Queue>,
    rotation_max_bytes: u64,
    rotation_max_age: Duration,
    flush: FlushConfig,
) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(path = %parent.display(), error = %e, "failed to create host directory");
            return;
        }
    }

    let mut state = match open_for_append(&path).await {
        Ok(state) => state,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to open stream file");
            return;
        }
    };

    let mut flush_ticker = match &flush {
        FlushConfig::Immediate => None,
        FlushConfig::Batched { interval } => Some(tokio::time::interval(*interval)),
    };
    let mut dirty = false;

    loop {
        tokio::select! {
            biased;
            record = queue.pop() => {
                match record {
                    Some(record) => {
                        if let Err(e) = write_record(&mut state, &record).await {
                            error!(path = %path.display(), error = %e, "write failed");
                            continue;
                        }
                        match flush {
                            FlushConfig::Immediate => {
                                if let Err(e) = state.file.flush().await {
                                    warn!(error = %e, "flush failed");
                                }
                            }
                            FlushConfig::Batched { .. } => dirty = true,
                        }
                        if state.bytes_written >= rotation_max_bytes
                            || state.opened_at.elapsed() >= rotation_max_age
                        {
                            if let Err(e) = rotate(&path, &mut state).await {
                                error!(path = %path.display(), error = %e, "rotation failed");
                            }
                            dirty = false;
                        }
                    }
                    None => break,
                }
            }
            _ = tick(&mut flush_ticker) => {
                if dirty {
                    if let Err(e) = state.file.flush().await {
                        warn!(error = %e, "batched flush failed");
                    }
                    dirty = false;
                }
            }
        }
    }

    if let Err(e) = state.file.flush().await {
        warn!(error = %e, "final flush failed");
    }
    let _ = state.file.sync_all().await;
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct FileState {
    file: File,
    bytes_written: u64,
    opened_at: Instant,
}

async fn open_for_append(path: &Path) -> std::io::Result<FileState> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let bytes_written = file.metadata().await?.len();
    Ok(FileState {
        file,
        bytes_written,
        opened_at: Instant::now(),
    })
}

async fn write_record(state: &mut FileState, record: &serde_json::Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(record).expect("records always serialize");
    line.push(b'\n');
    state.file.write_all(&line).await?;
    state.bytes_written += line.len() as u64;
    Ok(())
}

async fn rotate(path: &Path, state: &mut FileState) -> std::io::Result<()> {
    state.file.flush().await?;
    state.file.sync_all().await?;
    let suffix = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let rotated = path.with_extension(format!("jsonl.{suffix}"));
    fs::rename(path, &rotated).await?;
    *state = open_for_append(path).await?;
    Ok(())
}
