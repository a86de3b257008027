//! # Shared Types and Constants
//!
//! - [`RequestId`]: the correlation id carried in the `req` field
//! - [`ZoneDescriptor`]: the resolved settings of the zone a process serves
//! - `EXIT_*`: the exit codes the process terminates with on fatal conditions

use serde::Deserialize;

/// Correlation id tying one outbound command to its inbound response.
///
/// Ids are allocated from a single counter per process, start at 1 and are
/// never reused.
pub type RequestId = u64;

/// Immutable description of the sending zone served by this process.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ZoneDescriptor {
    /// Zone name as announced to the queue server.
    pub name: String,
    /// Number of delivery workers to run.
    pub concurrency: usize,
    /// Optional log filter overriding the process default.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl ZoneDescriptor {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency,
            log_level: None,
        }
    }
}

/// The configuration file could not be read or parsed.
pub const EXIT_INVALID_CONFIG: u8 = 4;

/// The requested zone is not configured.
pub const EXIT_UNKNOWN_ZONE: u8 = 5;

/// The initial connection to the queue server failed.
pub const EXIT_CONNECT_FAILED: u8 = 6;

/// The queue server closed the connection while the process was not closing.
pub const EXIT_CONNECTION_LOST: u8 = 7;

/// A delivery worker failed and the whole pool was torn down.
pub const EXIT_WORKER_FAILURE: u8 = 8;
