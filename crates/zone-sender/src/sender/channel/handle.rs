use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::sync::{mpsc, oneshot};
use zone_sender_core::{Command, CommandError, Reply};

use super::Completion;

/// A request on its way from a worker to the dispatcher task.
#[derive(Debug)]
pub struct Outgoing {
    pub command: Command,
    pub completion: Completion,
}

/// Cloneable handle through which workers issue commands.
///
/// Sending only enqueues the request for the dispatcher task that owns the
/// [`CommandChannel`](super::CommandChannel); the reply is awaited through the
/// returned [`PendingReply`].
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl CommandSender {
    /// Creates a sender and the receiving end consumed by
    /// [`run_dispatcher`](super::run_dispatcher).
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Issues `command` and returns a future resolving to its reply.
    ///
    /// Dropping the returned future does not cancel the request; the response
    /// is simply discarded when it arrives.
    pub fn send(&self, command: impl Into<Command>) -> PendingReply {
        let (completion, rx) = oneshot::channel();
        let outgoing = Outgoing {
            command: command.into(),
            completion,
        };
        if self.tx.send(outgoing).is_err() {
            tracing::debug!("Dispatcher stopped, command not sent");
        }
        PendingReply { rx }
    }

    /// Whether the dispatcher task has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The eventual reply to one command.
#[derive(Debug)]
#[must_use = "the reply is only observed by awaiting it"]
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
}

impl Future for PendingReply {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(reply) => Poll::Ready(reply),
            Err(_) => Poll::Ready(Err(CommandError::Abandoned)),
        }
    }
}
