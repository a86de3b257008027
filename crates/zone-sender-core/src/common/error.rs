//! Error types for the zone sender process.
//!
//! This module defines two error types with different reach:
//!
//! - [`Error`]: process-level failures. Every variant except the transport and
//!   codec plumbing is fatal for the sender process, and each maps to a stable
//!   exit code via [`Error::exit_code`] so the supervising process can tell
//!   them apart.
//! - [`CommandError`]: the failure of one correlated request. It is delivered
//!   only to the caller that issued the request and never escalates on its
//!   own.
//!
//! ## Error Cases
//! - `UnknownZone`: the requested zone is not present in the configuration.
//! - `InvalidConfig`: the configuration file could not be read or parsed.
//! - `Connect`: the initial connection to the queue server failed.
//! - `ConnectionLost`: the queue server closed the connection while the
//!   process was not shutting down.
//! - `Transport` / `Codec`: framing and JSON failures on the connection.
//! - `ChannelError`: an internal channel between tasks was closed.
//! - `WorkerFailed`: a delivery worker reported an unrecoverable failure.
//! - `InvalidAddress`: the rewriter was handed something that is not an
//!   address.

use crate::types::{
    EXIT_CONNECT_FAILED, EXIT_CONNECTION_LOST, EXIT_INVALID_CONFIG, EXIT_UNKNOWN_ZONE,
    EXIT_WORKER_FAILURE,
};
use serde_json::Value;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified process-level error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The zone named on the command line is not configured.
    #[error("Unknown zone {zone:?}")]
    UnknownZone { zone: String },

    /// The configuration file is missing, unreadable or malformed.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The queue server could not be reached.
    #[error("Could not connect to queue server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The queue server went away while the process was not closing.
    #[error("Connection to queue server closed unexpectedly")]
    ConnectionLost,

    /// I/O failure on an established connection.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A frame could not be encoded or decoded as JSON.
    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A delivery worker gave up.
    #[error("Worker {ordinal} failed: {reason}")]
    WorkerFailed { ordinal: usize, reason: String },

    /// The rewriter could not split the value into local part and domain.
    #[error("Invalid address {address:?}")]
    InvalidAddress { address: String },
}

impl Error {
    /// Exit status the process terminates with when this error is fatal.
    ///
    /// Codes are part of the contract with the supervising process and must
    /// not be renumbered.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownZone { .. } => EXIT_UNKNOWN_ZONE,
            Self::InvalidConfig { .. } => EXIT_INVALID_CONFIG,
            Self::Connect { .. } => EXIT_CONNECT_FAILED,
            Self::ConnectionLost | Self::Transport(_) | Self::Codec(_) => EXIT_CONNECTION_LOST,
            Self::ChannelError { .. } | Self::WorkerFailed { .. } | Self::InvalidAddress { .. } => {
                EXIT_WORKER_FAILURE
            }
        }
    }
}

/// Failure of a single correlated request.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
pub enum CommandError {
    /// The queue server answered with an `error` field.
    ///
    /// The value is passed through untouched; it is usually a string but may
    /// be a structured object.
    #[error("Rejected by queue server: {}", describe(.0))]
    Rejected(Value),

    /// The completion was dropped before an answer arrived, which only happens
    /// once the command channel itself has stopped.
    #[error("Command channel stopped before a response arrived")]
    Abandoned,
}

impl CommandError {
    /// Human readable rejection text, if this is a rejection.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Rejected(value) => Some(describe(value)),
            Self::Abandoned => None,
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
