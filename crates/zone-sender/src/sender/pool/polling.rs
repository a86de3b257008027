use super::worker::{Worker, WorkerContext};
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use zone_sender_core::{Command, CommandError, Error};

/// Pause after an empty or rejected poll.
pub const IDLE_BACKOFF: Duration = Duration::from_secs(2);

/// How long a handed-back delivery stays deferred, in milliseconds.
pub const DEFER_TTL_MS: u64 = 5 * 60 * 1000;

const DEFER_RESPONSE: &str = "451 Transfer handler unavailable for this zone";

/// Delivery identifiers echoed back when a delivery is returned to the queue.
const DELIVERY_KEYS: [&str; 3] = ["id", "seq", "_lock"];

#[derive(Default)]
struct WorkerStats {
    polls: AtomicU64,
    fetched: AtomicU64,
    rejected: AtomicU64,
}

/// Default delivery worker: queue plumbing without a transfer stage.
///
/// Repeatedly asks the queue server for work with `GET`. Every delivery it
/// receives is handed straight back with `DEFER` so a transfer-capable sender
/// can pick it up, after resolving the rewritten return path it would have
/// used.
///
/// - Rejected requests are logged and retried after [`IDLE_BACKOFF`].
/// - If the command channel stops, the worker raises its error signal, which
///   tears down the pool.
pub struct PollingWorker {
    ordinal: usize,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
    started: Instant,
}

impl PollingWorker {
    /// Starts the polling loop on its own task.
    pub fn spawn(ctx: WorkerContext) -> Self {
        let cancel = CancellationToken::new();
        let stats = Arc::new(WorkerStats::default());
        let ordinal = ctx.ordinal;

        tokio::spawn(poll_loop(ctx, cancel.clone(), Arc::clone(&stats)));

        Self {
            ordinal,
            cancel,
            stats,
            started: Instant::now(),
        }
    }
}

impl Worker for PollingWorker {
    fn close(&mut self) {
        tracing::debug!(ordinal = self.ordinal, "Closing polling worker");
        self.cancel.cancel();
    }

    fn emit_diagnostics(&self) {
        tracing::info!(
            ordinal = self.ordinal,
            polls = self.stats.polls.load(Ordering::Relaxed),
            fetched = self.stats.fetched.load(Ordering::Relaxed),
            rejected = self.stats.rejected.load(Ordering::Relaxed),
            uptime_secs = self.started.elapsed().as_secs(),
            "Worker timers"
        );
    }
}

async fn poll_loop(ctx: WorkerContext, cancel: CancellationToken, stats: Arc<WorkerStats>) {
    let ordinal = ctx.ordinal;
    tracing::trace!(ordinal, client = %ctx.client_id, zone = %ctx.zone.name, "Worker started");

    loop {
        let reply = tokio::select! {
            () = cancel.cancelled() => break,
            reply = ctx.commands.send("GET") => reply,
        };
        stats.polls.fetch_add(1, Ordering::Relaxed);

        let command = match reply {
            Ok(Some(delivery)) => {
                stats.fetched.fetch_add(1, Ordering::Relaxed);
                log_return_path(&ctx, &delivery);
                defer_command(&delivery)
            }
            Ok(None) => {
                if idle(&cancel).await {
                    continue;
                }
                break;
            }
            Err(e @ CommandError::Rejected(_)) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ordinal, "GET rejected: {e}");
                if idle(&cancel).await {
                    continue;
                }
                break;
            }
            Err(CommandError::Abandoned) => {
                channel_stopped(&ctx);
                break;
            }
        };

        let reply = tokio::select! {
            () = cancel.cancelled() => break,
            reply = ctx.commands.send(command) => reply,
        };
        match reply {
            Ok(_) => {}
            Err(CommandError::Abandoned) => {
                channel_stopped(&ctx);
                break;
            }
            Err(e) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ordinal, "DEFER rejected: {e}");
            }
        }
    }

    tracing::trace!(ordinal, "Worker stopped");
}

/// Sleeps for [`IDLE_BACKOFF`]. Returns `false` if cancelled meanwhile.
async fn idle(cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = sleep(IDLE_BACKOFF) => true,
    }
}

fn channel_stopped(ctx: &WorkerContext) {
    let error = Error::ChannelError {
        context: format!("worker {} lost the command channel", ctx.ordinal),
    };
    ctx.errors.raise(error);
}

fn log_return_path(ctx: &WorkerContext, delivery: &Value) {
    let Some(from) = delivery.get("from").and_then(Value::as_str) else {
        return;
    };
    match ctx.rewriter.forward(from) {
        Ok(return_path) => {
            tracing::debug!(ordinal = ctx.ordinal, from, %return_path, "Fetched delivery");
        }
        Err(e) => tracing::debug!(ordinal = ctx.ordinal, from, "No return path: {e}"),
    }
}

/// Builds the `DEFER` command returning `delivery` to the queue.
fn defer_command(delivery: &Value) -> Command {
    let mut command = Command::new("DEFER")
        .with("ttl", DEFER_TTL_MS)
        .with("response", DEFER_RESPONSE);
    for key in DELIVERY_KEYS {
        if let Some(value) = delivery.get(key) {
            command = command.with(key, value.clone());
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{
        channel::{CommandSender, Outgoing},
        pool::worker::{ErrorSignal, PoolEvent},
        rewrite::SrsRewriter,
    };
    use serde_json::json;
    use tokio::sync::mpsc;
    use zone_sender_core::ZoneDescriptor;

    fn context(commands: CommandSender) -> (WorkerContext, mpsc::UnboundedReceiver<PoolEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            client_id: Arc::from("c0ffee"),
            ordinal: 1,
            zone: Arc::new(ZoneDescriptor::new("us", 1)),
            commands,
            rewriter: Arc::new(SrsRewriter::new("secret", "bounces.example.net")),
            errors: ErrorSignal::new(1, CancellationToken::new(), events_tx),
        };
        (ctx, events_rx)
    }

    #[test]
    fn defer_echoes_delivery_identifiers() {
        let delivery = json!({
            "id": "18f2a",
            "seq": "002",
            "_lock": "lock-1",
            "from": "alice@origin.example",
            "recipient": "bob@dest.example",
        });
        let command = defer_command(&delivery);
        assert_eq!(command.action(), "DEFER");
        assert_eq!(command.field("id"), Some(&json!("18f2a")));
        assert_eq!(command.field("seq"), Some(&json!("002")));
        assert_eq!(command.field("_lock"), Some(&json!("lock-1")));
        assert_eq!(command.field("ttl"), Some(&json!(DEFER_TTL_MS)));
        assert!(command.field("recipient").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_defers_and_stops_on_close() {
        let (commands, mut requests) = CommandSender::pair();
        let (ctx, _events) = context(commands);
        let mut worker = PollingWorker::spawn(ctx);

        let Outgoing { command, completion } = requests.recv().await.unwrap();
        assert_eq!(command.action(), "GET");
        completion
            .send(Ok(Some(json!({"id": "18f2a", "seq": "001", "from": "a@b.example"}))))
            .unwrap();

        let Outgoing { command, completion } = requests.recv().await.unwrap();
        assert_eq!(command.action(), "DEFER");
        assert_eq!(command.field("id"), Some(&json!("18f2a")));
        completion.send(Ok(None)).unwrap();

        let Outgoing { command, completion } = requests.recv().await.unwrap();
        assert_eq!(command.action(), "GET");
        completion.send(Ok(None)).unwrap();

        // Idles, then polls again.
        let Outgoing {
            command,
            completion: _pending,
        } = requests.recv().await.unwrap();
        assert_eq!(command.action(), "GET");

        worker.close();
        assert!(requests.recv().await.is_none());
        assert_eq!(worker.stats.polls.load(Ordering::Relaxed), 2);
        assert_eq!(worker.stats.fetched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_local_to_the_request() {
        let (commands, mut requests) = CommandSender::pair();
        let (ctx, mut events) = context(commands);
        let mut worker = PollingWorker::spawn(ctx);

        let Outgoing { completion, .. } = requests.recv().await.unwrap();
        completion
            .send(Err(CommandError::Rejected(json!("queue paused"))))
            .unwrap();

        let Outgoing {
            command,
            completion: _pending,
        } = requests.recv().await.unwrap();
        assert_eq!(command.action(), "GET");
        assert!(events.try_recv().is_err());
        assert_eq!(worker.stats.rejected.load(Ordering::Relaxed), 1);

        worker.close();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_channel_raises_worker_error() {
        let (commands, mut requests) = CommandSender::pair();
        let (ctx, mut events) = context(commands);
        let _worker = PollingWorker::spawn(ctx);

        let Outgoing { completion, .. } = requests.recv().await.unwrap();
        drop(completion);

        match events.recv().await {
            Some(PoolEvent::Failed { ordinal, error }) => {
                assert_eq!(ordinal, 1);
                assert!(matches!(error, Error::ChannelError { .. }));
            }
            other => panic!("expected worker failure, got {other:?}"),
        }
    }
}
