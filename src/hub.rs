//! The broadcast hub: one control loop owning every subscriber.
//!
//! Registrations, unregistrations and poll timer expiries all arrive at a
//! single `select!` loop and are handled one at a time, so the registry
//! needs no locking. The poll timer is re-armed after each expiry has been
//! handled, which means a slow upstream fetch stretches the interval instead
//! of stacking polls.

use crate::merger::MergeError;
use crate::registry::{ClientHandle, ClientId, Registry};
use crate::report::Reporter;
use crate::types::Snapshot;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub is no longer running")]
    Stopped,
}

/// Produces one snapshot per poll.
pub trait SnapshotSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Snapshot, MergeError>> + Send;
}

/// Counters for the hub, readable from any task.
#[derive(Debug, Default)]
pub struct HubStats {
    pub ticks: AtomicU64,
    pub fetches: AtomicU64,
    pub errors: AtomicU64,
    pub broadcasts: AtomicU64,
    pub evictions: AtomicU64,
    pub clients: AtomicU64,
    pub last_fetch_ms: AtomicU64,
}

impl HubStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            clients: self.clients.load(Ordering::Relaxed),
            last_fetch_ms: self.last_fetch_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub fetches: u64,
    pub errors: u64,
    pub broadcasts: u64,
    pub evictions: u64,
    pub clients: u64,
    pub last_fetch_ms: u64,
}

/// Shortest poll interval the hub will run with.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Delay between the end of one poll and the next
    pub poll_interval: Duration,
    /// Buffer size for the registration channels
    pub ingress_buffer_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            ingress_buffer_size: 64,
        }
    }
}

/// Ingress for the transport layer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<ClientId>,
}

impl HubHandle {
    /// Ask the hub to start sending snapshots to `handle`.
    pub async fn register(&self, handle: ClientHandle) -> Result<(), HubError> {
        self.register_tx
            .send(handle)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Ask the hub to drop the client and close its queue.
    pub async fn unregister(&self, id: ClientId) -> Result<(), HubError> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| HubError::Stopped)
    }
}

/// The coordinating loop.
pub struct Hub<S> {
    source: S,
    reporter: Arc<dyn Reporter>,
    config: HubConfig,
    registry: Registry,
    stats: Arc<HubStats>,
    handle: HubHandle,
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<ClientId>,
}

impl<S: SnapshotSource> Hub<S> {
    /// Create a new hub.
    pub fn new(source: S, reporter: Arc<dyn Reporter>, mut config: HubConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        let buffer = config.ingress_buffer_size.max(1);
        let (register_tx, register_rx) = mpsc::channel(buffer);
        let (unregister_tx, unregister_rx) = mpsc::channel(buffer);

        Self {
            source,
            reporter,
            config,
            registry: Registry::new(),
            stats: Arc::new(HubStats::new()),
            handle: HubHandle {
                register_tx,
                unregister_tx,
            },
            register_rx,
            unregister_rx,
        }
    }

    /// Get an ingress handle for the transport layer.
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Get a reference to the hub stats.
    pub fn stats(&self) -> Arc<HubStats> {
        Arc::clone(&self.stats)
    }

    /// Serve forever.
    pub async fn run(mut self) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Hub started"
        );

        let timer = tokio::time::sleep(self.config.poll_interval);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                Some(handle) = self.register_rx.recv() => {
                    self.register(handle);
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.unregister(id);
                }
                () = &mut timer => {
                    self.tick().await;
                    timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.config.poll_interval);
                }
            }
        }
    }

    fn register(&mut self, handle: ClientHandle) {
        let id = handle.id();
        if self.registry.register(handle) {
            tracing::info!(client = %id, clients = self.registry.len(), "Client registered");
        }
        self.update_client_count();
    }

    fn unregister(&mut self, id: ClientId) {
        if self.registry.unregister(id) {
            tracing::info!(client = %id, clients = self.registry.len(), "Client unregistered");
        }
        self.update_client_count();
    }

    /// Handle one timer expiry: fetch and broadcast if anyone is listening.
    async fn tick(&mut self) {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if self.registry.is_empty() {
            tracing::trace!("No clients, skipping fetch");
            return;
        }

        let start = Instant::now();
        let result = self.source.fetch().await;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_fetch_ms
            .store(start.elapsed().as_millis() as u64, Ordering::Relaxed);

        match result {
            Ok(snapshot) => {
                let evicted = self.registry.broadcast(&snapshot);
                self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .evictions
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                self.update_client_count();

                tracing::debug!(
                    aircraft = snapshot.aircraft_count(),
                    clients = self.registry.len(),
                    evicted,
                    "Broadcast snapshot"
                );
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(&e);
            }
        }
    }

    fn update_client_count(&self) {
        self.stats
            .clients
            .store(self.registry.len() as u64, Ordering::Relaxed);
    }
}
