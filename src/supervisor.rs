//! Supervisor: turns Target Registry lifecycle events into attached
//! Sessions with collectors running, enforces the session cap with LRU
//! eviction, and drives orderly shutdown — flush every writer and write the
//! overview before the process exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{info, warn};

use crate::collectors::{HostCell, console, gc, heap, longtask, memory, network, storage};
use crate::config::EngineConfig;
use crate::correlator::Correlator;
use crate::overview::OverviewBuilder;
use crate::protocol::ProtocolClient;
use crate::registry::{RegistryEvent, Target, TargetRegistry};
use crate::session::Session;
use crate::writer::WriterRegistry;

struct ActiveSession {
    session: Session,
    host: HostCell,
    attached_at: Instant,
}

pub struct Supervisor {
    client: ProtocolClient,
    registry: Arc<TargetRegistry>,
    writers: Arc<WriterRegistry>,
    overview: Arc<OverviewBuilder>,
    correlator: Arc<Correlator>,
    memory_permits: Arc<Semaphore>,
    max_sessions: usize,
    network_rate_per_sec: u32,
    console_rate_per_sec: u32,
    sessions: Mutex<HashMap<String, ActiveSession>>,
}

impl Supervisor {
    pub fn new(
        client: ProtocolClient,
        registry: Arc<TargetRegistry>,
        writers: Arc<WriterRegistry>,
        overview: Arc<OverviewBuilder>,
        correlator: Arc<Correlator>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Supervisor {
            client,
            registry,
            writers,
            overview,
            correlator,
            memory_permits: Arc::new(Semaphore::new(config.memory_sample_permits)),
            max_sessions: config.max_sessions,
            network_rate_per_sec: config.network_rate_per_sec,
            console_rate_per_sec: config.console_rate_per_sec,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Drive registry events until the channel closes or `shutdown` fires.
    /// Either way, every attached session is closed and every writer is
    /// flushed before this returns.
    pub async fn run(
        self: Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<RegistryEvent>,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown requested, closing sessions");
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    async fn handle_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::Appeared(target) => self.attach(target).await,
            RegistryEvent::Navigated { target_id, new_host, .. } => {
                let sessions = self.sessions.lock().await;
                if let Some(active) = sessions.get(&target_id) {
                    active.host.set(new_host);
                }
            }
            RegistryEvent::Disappeared { target_id } => self.detach(&target_id).await,
        }
    }

    async fn attach(&self, target: Target) {
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(&target.target_id) {
                return;
            }
        }
        self.evict_if_at_capacity().await;

        let session = match Session::attach(self.client.clone(), &target.target_id, &self.overview).await {
            Ok(Some(session)) => session,
            Ok(None) => return, // target gone before attach finished; silent abort per spec
            Err(e) => {
                warn!(target_id = %target.target_id, error = %e, "failed to attach session");
                return;
            }
        };

        let host = HostCell::new(target.host.clone());
        self.spawn_collectors(session.clone(), host.clone());

        let mut sessions = self.sessions.lock().await;
        sessions.insert(target.target_id, ActiveSession {
            session,
            host,
            attached_at: Instant::now(),
        });
    }

    async fn detach(&self, target_id: &str) {
        let removed = self.sessions.lock().await.remove(target_id);
        if let Some(active) = removed {
            active.session.close().await;
        }
    }

    /// LRU eviction by attach time — the oldest-attached session makes room
    /// for a newly discovered one once the cap is reached.
    async fn evict_if_at_capacity(&self) {
        let victim = {
            let sessions = self.sessions.lock().await;
            if sessions.len() < self.max_sessions {
                return;
            }
            sessions
                .iter()
                .min_by_key(|(_, active)| active.attached_at)
                .map(|(id, _)| id.clone())
        };
        if let Some(target_id) = victim {
            info!(target_id = %target_id, "session cap reached, evicting oldest session");
            self.detach(&target_id).await;
        }
    }

    fn spawn_collectors(&self, session: Session, host: HostCell) {
        memory::spawn(
            session.clone(),
            host.clone(),
            Arc::clone(&self.writers),
            Arc::clone(&self.overview),
            Arc::clone(&self.correlator),
            Arc::clone(&self.memory_permits),
        );
        gc::spawn(session.clone(), host.clone(), Arc::clone(&self.writers), Arc::clone(&self.overview));
        heap::spawn(session.clone(), host.clone(), Arc::clone(&self.writers), Arc::clone(&self.overview));
        longtask::spawn(session.clone(), host.clone(), Arc::clone(&self.writers), Arc::clone(&self.overview));
        storage::spawn(session.clone(), host.clone(), Arc::clone(&self.writers), Arc::clone(&self.overview));
        console::spawn(
            session.clone(),
            host.clone(),
            Arc::clone(&self.writers),
            Arc::clone(&self.overview),
            Arc::clone(&self.correlator),
            self.console_rate_per_sec,
        );
        network::spawn(
            session,
            host,
            Arc::clone(&self.writers),
            Arc::clone(&self.overview),
            Arc::clone(&self.correlator),
            self.network_rate_per_sec,
        );
    }

    async fn shutdown(&self) {
        let sessions: Vec<ActiveSession> = self.sessions.lock().await.drain().map(|(_, v)| v).collect();
        for active in sessions {
            active.session.close().await;
        }
        self.writers.flush_all_and_close().await;
    }
}
