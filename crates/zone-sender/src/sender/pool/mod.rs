//! Delivery worker pool.
//!
//! - [`manager`] - [`WorkerPool`]: staggered startup, fail-fast teardown and
//!   liveness reporting.
//! - [`worker`] - the contract between the pool and a worker.
//! - [`polling`] - [`PollingWorker`], the worker the process runs by default.

pub mod manager;
pub mod polling;
pub mod worker;

pub use manager::{PoolExit, PoolSettings, WorkerPool};
pub use polling::PollingWorker;
pub use worker::{ErrorSignal, Worker, WorkerContext, WorkerFactory};
