//! Worker process internals.
//!
//! ## Structure
//!
//! - [`channel`] - correlation of commands and responses over the shared
//!   connection.
//! - [`pool`] - delivery worker lifecycle and the default polling worker.
//! - [`supervisor`] - connection supervision and process-fatal conditions.
//! - [`transport`] - framed TCP connection to the queue server.
//! - [`rewrite`] - return-path rewriting handed to every worker.
//! - [`config`] / [`telemetry`] - process configuration and logging.

pub mod channel;
pub mod config;
pub mod pool;
pub mod rewrite;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
