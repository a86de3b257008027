use crate::sender::{channel::CommandSender, rewrite::AddressRewriter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zone_sender_core::{Error, ZoneDescriptor};

/// A running delivery unit owned by the [`WorkerPool`](super::WorkerPool).
///
/// Workers are constructed through a [`WorkerFactory`] and run on their own
/// tasks; the pool only ever talks to them through these two calls.
pub trait Worker: Send + 'static {
    /// Asks the worker to stop. Called at most once, during teardown.
    fn close(&mut self);

    /// Emits the worker's internal timer/diagnostic state to the log.
    fn emit_diagnostics(&self);
}

/// Builds one worker from its [`WorkerContext`].
///
/// Implemented for any `FnMut(WorkerContext) -> W`, so a constructor function
/// such as [`PollingWorker::spawn`](super::PollingWorker::spawn) can be passed
/// directly.
pub trait WorkerFactory: Send + 'static {
    type Worker: Worker;

    fn create(&mut self, ctx: WorkerContext) -> Self::Worker;
}

impl<F, W> WorkerFactory for F
where
    F: FnMut(WorkerContext) -> W + Send + 'static,
    W: Worker,
{
    type Worker = W;

    fn create(&mut self, ctx: WorkerContext) -> W {
        self(ctx)
    }
}

/// Everything a worker is constructed with.
pub struct WorkerContext {
    /// Identity of this sender process, shared by all of its workers.
    pub client_id: Arc<str>,
    /// 1-based position of this worker within the zone.
    pub ordinal: usize,
    pub zone: Arc<ZoneDescriptor>,
    /// Handle to the shared command channel.
    pub commands: CommandSender,
    pub rewriter: Arc<dyn AddressRewriter>,
    /// Where the worker reports an unrecoverable failure.
    pub errors: ErrorSignal,
}

/// Events flowing into the pool's control loop.
#[derive(Debug)]
pub(crate) enum PoolEvent {
    /// A staggered start delay elapsed; create this worker.
    Spawn { ordinal: usize },
    /// A worker reported an unrecoverable failure.
    Failed { ordinal: usize, error: Error },
}

/// A worker's subscription to the pool's error listener.
///
/// The pool detaches every subscription before it closes the workers, so an
/// error raised while tearing down never reaches the pool again.
#[derive(Clone, Debug)]
pub struct ErrorSignal {
    ordinal: usize,
    detached: CancellationToken,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl ErrorSignal {
    pub(crate) const fn new(
        ordinal: usize,
        detached: CancellationToken,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Self {
        Self {
            ordinal,
            detached,
            events,
        }
    }

    /// Reports an unrecoverable failure of this worker.
    ///
    /// Returns `false` when the listener has already been detached (the pool
    /// is tearing down or gone) and the error was dropped.
    pub fn raise(&self, error: Error) -> bool {
        if self.is_detached() {
            tracing::debug!(ordinal = self.ordinal, "Error after detach ignored: {error}");
            return false;
        }
        self.events
            .send(PoolEvent::Failed {
                ordinal: self.ordinal,
                error,
            })
            .is_ok()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.is_cancelled()
    }

    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }
}
