pub mod error;
pub mod protocol;
pub mod types;

pub use error::{CommandError, Error, Result};
pub use protocol::{Command, Hello, Reply, Response};
pub use types::*;
