use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use zone_sender_core::{Command, Reply, RequestId, Response};

/// Completion handle for one in-flight request.
///
/// Resolving it hands the [`Reply`] to whichever task awaits the paired
/// receiver; that task observes it on its own next poll, never inside the
/// call that resolved it.
pub type Completion = oneshot::Sender<Reply>;

/// Correlates outbound commands with inbound responses.
///
/// Owns the id allocator and the pending map. Ids start at 1, grow by one per
/// [`send`](Self::send) and are never reused, so a pending id always belongs
/// to exactly one unanswered command.
///
/// Requests that are never answered stay pending for the life of the channel.
/// Nothing times out or evicts them.
pub struct CommandChannel {
    last_id: RequestId,
    pending: HashMap<RequestId, Completion>,
    outbox: mpsc::UnboundedSender<Value>,
}

impl CommandChannel {
    /// Creates a channel that writes tagged frames to `outbox`.
    pub fn new(outbox: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            last_id: 0,
            pending: HashMap::new(),
            outbox,
        }
    }

    /// Tags `command` with the next id, records `completion` and queues the
    /// frame for the connection. Returns the assigned id.
    ///
    /// Never blocks. If the writer side is already gone the request stays
    /// pending; the closed connection is reported separately by the
    /// supervisor.
    pub fn send(&mut self, command: Command, completion: Completion) -> RequestId {
        self.last_id += 1;
        let req = self.last_id;

        tracing::trace!(req, cmd = command.action(), "Sending command");
        self.pending.insert(req, completion);

        if self.outbox.send(command.into_frame(req)).is_err() {
            tracing::warn!(req, "Outbox closed, request left pending");
        }
        req
    }

    /// Routes one inbound message to the request it answers.
    ///
    /// Returns `true` when a pending request was resolved. Messages without a
    /// `req`, or whose `req` is not pending (duplicates, strays), are dropped
    /// without touching the pending map.
    pub fn on_inbound(&mut self, message: Response) -> bool {
        let Some(req) = message.req else {
            tracing::debug!("Ignoring uncorrelated message");
            return false;
        };

        let Some(completion) = self.pending.remove(&req) else {
            tracing::debug!(req, "Ignoring response for unknown request");
            return false;
        };

        tracing::trace!(req, "Resolving response");
        // The caller may have stopped waiting; that is not our concern.
        let _ = completion.send(message.into_reply());
        true
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, req: RequestId) -> bool {
        self.pending.contains_key(&req)
    }

    /// The most recently assigned id, or 0 before the first send.
    pub const fn last_id(&self) -> RequestId {
        self.last_id
    }
}
