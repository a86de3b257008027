//! Command correlation over the single queue server connection.
//!
//! Many workers issue requests concurrently, but there is only one physical
//! connection. [`CommandChannel`] tags each outbound [`Command`] with a fresh
//! correlation id and remembers who is waiting for it; responses are routed
//! back purely by id, so they may arrive in any order.
//!
//! The channel state is owned by exactly one task ([`run_dispatcher`]).
//! Workers never touch it directly; they hold a cloneable [`CommandSender`]
//! that forwards requests to that task, which keeps the pending map free of
//! locks.
//!
//! [`Command`]: zone_sender_core::Command

mod correlation;
mod dispatcher;
mod handle;

pub use correlation::{CommandChannel, Completion};
pub use dispatcher::run_dispatcher;
pub use handle::{CommandSender, Outgoing};
