//! Lifecycle manager for the delivery workers of one zone.
//!
//! This module defines the [`WorkerPool`] struct, which creates the zone's
//! workers with a staggered start, reports their diagnostics on a slow
//! interval and enforces an all-or-nothing failure policy: the first worker
//! error tears the whole pool down, and recovery is left to whatever
//! supervises the process.
//!
//! All pool state (the live set and the `closing` flag) is owned by the task
//! running [`WorkerPool::run`]. Timers and workers reach it only by sending
//! [`PoolEvent`]s, so no locking is involved.

use super::worker::{ErrorSignal, PoolEvent, Worker, WorkerContext, WorkerFactory};
use crate::sender::{channel::CommandSender, rewrite::AddressRewriter};
use core::time::Duration;
use rand::Rng;
use std::{collections::BTreeMap, sync::Arc, time::SystemTime};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tokio_util::sync::CancellationToken;
use zone_sender_core::{Error, ZoneDescriptor};

/// Upper bound of the random delay before each worker is created.
pub const DEFAULT_STARTUP_JITTER: Duration = Duration::from_millis(1500);

/// Interval between liveness reports.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Timing knobs of a [`WorkerPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub startup_jitter: Duration,
    pub liveness_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            startup_jitter: DEFAULT_STARTUP_JITTER,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }
}

/// Why [`WorkerPool::run`] returned. The pool is always torn down by then.
#[derive(Debug)]
pub enum PoolExit {
    /// Shutdown was requested from outside.
    Shutdown,
    /// A worker failed and took the pool down with it.
    WorkerFailed { ordinal: usize, error: Error },
}

/// Shared inputs handed to every worker the pool creates.
struct Launch {
    zone: Arc<ZoneDescriptor>,
    client_id: Arc<str>,
    commands: CommandSender,
    rewriter: Arc<dyn AddressRewriter>,
}

struct Slot<W> {
    worker: W,
    /// Cancelled to detach the worker's error subscription.
    listener: CancellationToken,
}

/// The set of delivery workers of one zone.
pub struct WorkerPool<F: WorkerFactory> {
    factory: F,
    settings: PoolSettings,
    workers: BTreeMap<usize, Slot<F::Worker>>,
    closing: bool,
    launch: Option<Launch>,
    timers: Vec<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events_rx: mpsc::UnboundedReceiver<PoolEvent>,
}

impl<F: WorkerFactory> WorkerPool<F> {
    pub fn new(factory: F, settings: PoolSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            settings,
            workers: BTreeMap::new(),
            closing: false,
            launch: None,
            timers: Vec::new(),
            events_tx,
            events_rx,
        }
    }

    /// Schedules creation of `zone.concurrency` workers.
    ///
    /// Each worker gets an independently drawn delay in
    /// `0..=startup_jitter`, so processes started together do not hit the
    /// queue server in lockstep. Workers are numbered from 1 and join the live
    /// set the moment they are created, which happens inside
    /// [`run`](Self::run).
    ///
    /// Does nothing once the pool is closing.
    pub fn start(
        &mut self,
        zone: Arc<ZoneDescriptor>,
        client_id: Arc<str>,
        commands: CommandSender,
        rewriter: Arc<dyn AddressRewriter>,
    ) {
        if self.closing {
            tracing::debug!(zone = %zone.name, "Pool is closing, not starting workers");
            return;
        }

        tracing::info!(
            zone = %zone.name,
            concurrency = zone.concurrency,
            "Starting {} workers",
            zone.concurrency
        );

        let jitter_ms = u64::try_from(self.settings.startup_jitter.as_millis()).unwrap_or(u64::MAX);
        let mut rng = rand::rng();
        for ordinal in 1..=zone.concurrency {
            let delay = Duration::from_millis(rng.random_range(0..=jitter_ms));
            let events = self.events_tx.clone();
            self.timers.push(tokio::spawn(async move {
                sleep(delay).await;
                let _ = events.send(PoolEvent::Spawn { ordinal });
            }));
        }

        self.launch = Some(Launch {
            zone,
            client_id,
            commands,
            rewriter,
        });
    }

    /// Runs the pool until it is torn down.
    ///
    /// - Creates workers as their start delays elapse.
    /// - Emits a liveness report every `liveness_interval`.
    /// - On the first worker error, tears the pool down and returns
    ///   [`PoolExit::WorkerFailed`].
    /// - When `shutdown` is cancelled, tears the pool down and returns
    ///   [`PoolExit::Shutdown`].
    pub async fn run(&mut self, shutdown: CancellationToken) -> PoolExit {
        let period = self.settings.liveness_interval;
        let mut liveness = interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!(live = self.workers.len(), "Shutdown requested");
                    self.teardown();
                    return PoolExit::Shutdown;
                }
                Some(event) = self.events_rx.recv() => {
                    if let Some(exit) = self.handle(event) {
                        return exit;
                    }
                }
                _ = liveness.tick() => self.report_liveness(),
            }
        }
    }

    /// Applies one event. Returns the exit reason when it tore the pool down.
    pub(crate) fn handle(&mut self, event: PoolEvent) -> Option<PoolExit> {
        match event {
            PoolEvent::Spawn { ordinal } => {
                self.spawn_worker(ordinal);
                None
            }
            PoolEvent::Failed { ordinal, error } => {
                if self.closing {
                    tracing::debug!(ordinal, "Pool already closing, ignoring: {error}");
                    return None;
                }
                tracing::error!(ordinal, "Worker failed, tearing down pool: {error}");
                self.teardown();
                Some(PoolExit::WorkerFailed { ordinal, error })
            }
        }
    }

    fn spawn_worker(&mut self, ordinal: usize) {
        if self.closing {
            tracing::debug!(ordinal, "Pool is closing, worker not created");
            return;
        }
        let Some(launch) = &self.launch else {
            return;
        };

        let listener = CancellationToken::new();
        let ctx = WorkerContext {
            client_id: Arc::clone(&launch.client_id),
            ordinal,
            zone: Arc::clone(&launch.zone),
            commands: launch.commands.clone(),
            rewriter: Arc::clone(&launch.rewriter),
            errors: ErrorSignal::new(ordinal, listener.clone(), self.events_tx.clone()),
        };

        let worker = self.factory.create(ctx);
        self.workers.insert(ordinal, Slot { worker, listener });
        tracing::debug!(ordinal, live = self.workers.len(), "Worker created");
    }

    /// Collapses the pool: marks it closing, detaches every error listener,
    /// closes every worker once and empties the live set. Idempotent.
    pub fn teardown(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;

        for timer in self.timers.drain(..) {
            timer.abort();
        }
        for slot in self.workers.values() {
            slot.listener.cancel();
        }
        for (ordinal, slot) in &mut self.workers {
            tracing::debug!(ordinal, "Closing worker");
            slot.worker.close();
        }
        self.workers.clear();

        tracing::info!("Worker pool torn down");
    }

    fn report_liveness(&self) {
        let unix_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        tracing::info!(unix_ms, live = self.workers.len(), "Liveness tick");

        for slot in self.workers.values() {
            slot.worker.emit_diagnostics();
        }
    }

    pub const fn is_closing(&self) -> bool {
        self.closing
    }

    /// Number of workers currently live.
    pub fn live(&self) -> usize {
        self.workers.len()
    }

    /// Ordinals of the live workers, ascending.
    pub fn ordinals(&self) -> Vec<usize> {
        self.workers.keys().copied().collect()
    }
}
