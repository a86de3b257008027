//! Connection supervision for one sender process.
//!
//! A session owns the single queue server connection for its whole life:
//!
//! 1. `HELLO` is queued before anything else, announcing zone and identity.
//! 2. The [`CommandChannel`] dispatcher and the frame writer run against the
//!    connection while the [`WorkerPool`] runs its workers.
//! 3. Whichever ends first decides the outcome. A pool exit (shutdown or
//!    worker failure) closes the connection deliberately. A connection that
//!    ends while the pool is still open is fatal and reported as
//!    [`Error::ConnectionLost`]. There is no reconnect.

use crate::sender::{
    channel::{CommandChannel, CommandSender, run_dispatcher},
    config::SenderConfig,
    pool::{PollingWorker, PoolExit, PoolSettings, WorkerFactory, WorkerPool},
    rewrite::AddressRewriter,
    transport,
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    signal,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use zone_sender_core::{EXIT_WORKER_FAILURE, Error, Hello, ZoneDescriptor};

/// Everything a session needs besides the connection itself.
pub struct Session<F> {
    pub zone: Arc<ZoneDescriptor>,
    pub client_id: Arc<str>,
    pub rewriter: Arc<dyn AddressRewriter>,
    pub factory: F,
    pub settings: PoolSettings,
}

/// How a session ended without a connection failure.
#[derive(Debug)]
pub enum SessionEnd {
    /// Graceful shutdown on request.
    Shutdown,
    /// A worker failed and the pool was torn down.
    WorkerFailed { ordinal: usize, error: Error },
}

impl SessionEnd {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Shutdown => 0,
            Self::WorkerFailed { .. } => EXIT_WORKER_FAILURE,
        }
    }
}

impl From<PoolExit> for SessionEnd {
    fn from(exit: PoolExit) -> Self {
        match exit {
            PoolExit::Shutdown => Self::Shutdown,
            PoolExit::WorkerFailed { ordinal, error } => Self::WorkerFailed { ordinal, error },
        }
    }
}

enum Ended {
    Pool(PoolExit),
    Connection(Result<(), Error>),
}

/// Connects to the configured queue server and runs the zone's default
/// workers until shutdown or a fatal condition.
pub async fn run(config: SenderConfig, shutdown: CancellationToken) -> Result<SessionEnd, Error> {
    let pid = std::process::id();
    let zone = Arc::new(config.zone);

    let connected = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            tracing::info!(zone = %zone.name, pid, "Shutdown requested before connecting");
            return Ok(SessionEnd::Shutdown);
        }
        connected = transport::connect(&config.queue_server) => connected,
    };
    let stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(zone = %zone.name, pid, "Could not connect to queue server: {e}");
            return Err(e);
        }
    };
    tracing::info!(
        zone = %zone.name,
        pid,
        addr = %config.queue_server,
        client = %config.client_id,
        "Connected to queue server"
    );

    let session = Session {
        zone,
        client_id: Arc::from(config.client_id),
        rewriter: Arc::new(config.rewriter),
        factory: PollingWorker::spawn,
        settings: config.pool,
    };
    run_session(stream, session, shutdown).await
}

/// Runs one session over an established connection.
///
/// Returns [`Error::ConnectionLost`] when the connection ends, or fails,
/// while the pool is still open. Requests in flight at that point are never
/// answered.
pub async fn run_session<T, F>(
    io: T,
    session: Session<F>,
    shutdown: CancellationToken,
) -> Result<SessionEnd, Error>
where
    T: AsyncRead + AsyncWrite,
    F: WorkerFactory,
{
    let Session {
        zone,
        client_id,
        rewriter,
        factory,
        settings,
    } = session;
    let pid = std::process::id();

    let (sink, inbound) = transport::split(io);
    let (outbox, frames) = mpsc::unbounded_channel();

    // The receiver is still held here, so queueing cannot fail.
    let _ = outbox.send(Hello::new(zone.name.clone(), client_id.to_string()).into_frame());

    let channel = CommandChannel::new(outbox);
    let (commands, requests) = CommandSender::pair();

    let mut pool = WorkerPool::new(factory, settings);
    pool.start(Arc::clone(&zone), client_id, commands, rewriter);

    let ended = tokio::select! {
        biased;
        exit = pool.run(shutdown) => Ended::Pool(exit),
        result = run_dispatcher(channel, requests, inbound) => Ended::Connection(result),
        result = transport::pump_outbox(frames, sink) => Ended::Connection(result),
    };

    match ended {
        Ended::Pool(exit) => {
            tracing::info!(zone = %zone.name, pid, "Closing connection to queue server");
            Ok(exit.into())
        }
        Ended::Connection(result) => {
            if let Err(e) = result {
                tracing::debug!(zone = %zone.name, pid, "Connection failed: {e}");
            }
            tracing::error!(
                zone = %zone.name,
                pid,
                "Connection to queue server closed unexpectedly"
            );
            pool.teardown();
            Err(Error::ConnectionLost)
        }
    }
}

/// Cancels `shutdown` on Ctrl+C or SIGTERM.
pub async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, closing worker pool...");
    shutdown.cancel();
}
