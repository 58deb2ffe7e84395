//! Feed subscription supervisor.
//!
//! Owns the lifecycle of the single live feed connection:
//!
//! ```text
//!              open ok                    address added
//! Connecting ──────────▶ Streaming ─────────────────────▶ Reconnecting
//!   ▲   │                    │                                 │
//!   │   │ ConnectionError    │ StreamError / remote close      │ drain old stream,
//!   │   ▼                    ▼                                 │ rebuild query
//!   └── Disconnected ◀───────┘                                 │
//!   ▲      (backoff)                                           │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The feed filter is fixed when a connection opens, so the only way to hear
//! about a newly subscribed address is a fresh connection with a rebuilt
//! query. At most one connection attempt is in flight at a time. Before an
//! old connection is dropped, every event it has already buffered is
//! forwarded; nothing is lost because a restart was requested.
//!
//! Decoded transactions go, in arrival order, through a bounded channel to
//! the dispatch loop (see [`crate::dispatcher::run_dispatch_loop`]), tagged
//! with the connection epoch they came from.

use {
    super::{
        connection::{FeedSource, FeedStream, StreamError},
        decoder::{FeedEvent, Tx},
        error_handler::ExponentialBackoff,
        query::FeedQuery,
    },
    crate::{
        address_set::AddressSet,
        dispatcher::{run_dispatch_loop, TxDispatcher},
    },
    futures::{FutureExt, StreamExt},
    std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound of the supervisor → dispatcher queue
    pub channel_buffer: usize,
    /// How many recent transaction hashes the dispatch loop remembers
    pub dedup_window: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            channel_buffer: 1_000,
            dedup_window: 10_000,
        }
    }
}

/// A decoded transaction and the connection epoch that delivered it.
#[derive(Debug, Clone)]
pub struct EpochTx {
    pub epoch: u64,
    pub tx: Tx,
}

#[derive(Debug, Default)]
pub struct SupervisorStats {
    connections_opened: AtomicU64,
    connection_failures: AtomicU64,
    stream_failures: AtomicU64,
    forced_reconnects: AtomicU64,
}

impl SupervisorStats {
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    pub fn connection_failures(&self) -> u64 {
        self.connection_failures.load(Ordering::Relaxed)
    }

    pub fn stream_failures(&self) -> u64 {
        self.stream_failures.load(Ordering::Relaxed)
    }

    pub fn forced_reconnects(&self) -> u64 {
        self.forced_reconnects.load(Ordering::Relaxed)
    }
}

/// Running supervisor and dispatch loop.
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SupervisorState>,
    stats: Arc<SupervisorStats>,
    supervisor_task: JoinHandle<()>,
    dispatch_task: JoinHandle<u64>,
}

impl SupervisorHandle {
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> Arc<SupervisorStats> {
        self.stats.clone()
    }

    /// Stop reconnecting, cancel the live connection after forwarding what it
    /// already buffered, and wait for the dispatch loop to finish every queued
    /// transaction. Returns how many transactions the dispatch loop handled.
    pub async fn shutdown(self) -> u64 {
        log::info!("🛑 Shutting down feed supervisor");
        self.shutdown.send_replace(true);

        if let Err(e) = self.supervisor_task.await {
            log::error!("Feed supervisor task failed: {}", e);
        }

        match self.dispatch_task.await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                log::error!("Dispatch task failed: {}", e);
                0
            }
        }
    }
}

/// Start the supervisor and its dispatch loop on the current runtime.
pub fn spawn_supervisor(
    source: Arc<dyn FeedSource>,
    addresses: Arc<AddressSet>,
    dispatcher: Arc<TxDispatcher>,
    config: SupervisorConfig,
) -> SupervisorHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(SupervisorState::Disconnected);
    let (output, dispatch_rx) = mpsc::channel(config.channel_buffer.max(1));
    let stats = Arc::new(SupervisorStats::default());

    let dispatch_task = tokio::spawn(run_dispatch_loop(dispatch_rx, dispatcher, config.dedup_window));

    let supervisor = Supervisor {
        source,
        addresses,
        backoff: ExponentialBackoff::new(config.initial_backoff, config.max_backoff),
        output,
        state: state_tx,
        shutdown: shutdown_rx,
        stats: stats.clone(),
        epoch: 0,
    };
    let supervisor_task = tokio::spawn(supervisor.run());

    SupervisorHandle {
        shutdown: shutdown_tx,
        state: state_rx,
        stats,
        supervisor_task,
        dispatch_task,
    }
}

/// The dispatch loop hung up; nothing more can be delivered.
struct DispatcherGone;

enum StreamOutcome {
    AddressesChanged,
    Failed(StreamError),
    Shutdown,
    DispatcherGone,
}

struct Supervisor {
    source: Arc<dyn FeedSource>,
    addresses: Arc<AddressSet>,
    backoff: ExponentialBackoff,
    output: mpsc::Sender<EpochTx>,
    state: watch::Sender<SupervisorState>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<SupervisorStats>,
    epoch: u64,
}

impl Supervisor {
    async fn run(mut self) {
        let mut changes = self.addresses.changes();
        let mut shutdown = self.shutdown.clone();
        log::info!("📡 Feed supervisor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.addresses.is_empty() {
                log::info!("No subscribed addresses yet, waiting for the first subscription");
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = next_change(&mut changes) => continue,
                }
            }

            self.set_state(SupervisorState::Connecting);
            // Anything added after this point triggers another reconnect.
            changes.borrow_and_update();
            let query = FeedQuery::for_addresses(self.addresses.addresses());
            log::info!("🔌 Connecting to feed ({} addresses)", query.addresses().len());

            let opened = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                opened = self.source.open(&query) => opened,
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    self.stats.connection_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("❌ Feed connection failed: {}", e);
                    self.set_state(SupervisorState::Disconnected);
                    if !self.wait_before_retry(&mut changes, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.epoch += 1;
            self.backoff.reset();
            self.stats.connections_opened.fetch_add(1, Ordering::Relaxed);
            self.set_state(SupervisorState::Streaming);
            log::info!("✅ Feed connected (epoch {})", self.epoch);

            match self.stream_events(&mut stream, &mut changes, &mut shutdown).await {
                StreamOutcome::AddressesChanged => {
                    self.stats.forced_reconnects.fetch_add(1, Ordering::Relaxed);
                    self.set_state(SupervisorState::Reconnecting);
                    match self.drain(&mut stream).await {
                        Ok(drained) => log::info!(
                            "🔄 Address set changed, reconnecting ({} buffered transactions forwarded from epoch {})",
                            drained,
                            self.epoch
                        ),
                        Err(DispatcherGone) => break,
                    }
                }
                StreamOutcome::Failed(e) => {
                    self.stats.stream_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("❌ Feed stream ended (epoch {}): {}", self.epoch, e);
                    self.set_state(SupervisorState::Disconnected);
                    if !self.wait_before_retry(&mut changes, &mut shutdown).await {
                        break;
                    }
                }
                StreamOutcome::Shutdown => {
                    let _ = self.drain(&mut stream).await;
                    break;
                }
                StreamOutcome::DispatcherGone => {
                    log::error!("Dispatch loop is gone, stopping feed supervisor");
                    break;
                }
            }
        }

        self.set_state(SupervisorState::Disconnected);
        log::info!("Feed supervisor stopped");
    }

    async fn stream_events(
        &mut self,
        stream: &mut FeedStream,
        changes: &mut watch::Receiver<u64>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamOutcome {
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return StreamOutcome::Shutdown,
                _ = next_change(changes) => return StreamOutcome::AddressesChanged,
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        if self.forward(event).await.is_err() {
                            return StreamOutcome::DispatcherGone;
                        }
                    }
                    Some(Err(e)) => return StreamOutcome::Failed(e),
                    None => return StreamOutcome::Failed(StreamError::Closed),
                },
            }
        }
    }

    /// Forward every event the stream can yield without waiting.
    async fn drain(&mut self, stream: &mut FeedStream) -> Result<usize, DispatcherGone> {
        let mut drained = 0;
        while let Some(Some(Ok(event))) = stream.next().now_or_never() {
            drained += self.forward(event).await?;
        }
        Ok(drained)
    }

    async fn forward(&mut self, event: FeedEvent) -> Result<usize, DispatcherGone> {
        match event {
            FeedEvent::Opened => {
                log::debug!("Feed acknowledged subscription (epoch {})", self.epoch);
                Ok(0)
            }
            FeedEvent::Transactions(txs) => {
                let count = txs.len();
                for tx in txs {
                    self.output
                        .send(EpochTx { epoch: self.epoch, tx })
                        .await
                        .map_err(|_| DispatcherGone)?;
                }
                Ok(count)
            }
            FeedEvent::Unrecognized { kind } => {
                log::warn!("Ignoring unrecognized feed message type: {}", kind);
                Ok(0)
            }
            FeedEvent::Malformed { reason } => {
                log::warn!("Skipping malformed feed message: {}", reason);
                Ok(0)
            }
        }
    }

    /// Back off before the next attempt. A new subscription cuts the wait
    /// short. Returns false on shutdown.
    async fn wait_before_retry(
        &mut self,
        changes: &mut watch::Receiver<u64>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let delay = self.backoff.next_delay();
        log::warn!(
            "⏳ Retry attempt {} in {}ms",
            self.backoff.attempts(),
            delay.as_millis()
        );

        tokio::select! {
            _ = wait_for_shutdown(shutdown) => false,
            _ = tokio::time::sleep(delay) => true,
            _ = next_change(changes) => {
                log::info!("Address set changed while disconnected, retrying now");
                true
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Supervisor state {:?} → {:?}", previous, state);
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn next_change(changes: &mut watch::Receiver<u64>) {
    if changes.changed().await.is_err() {
        // The address set is gone; it will never change again.
        std::future::pending::<()>().await;
    }
}
