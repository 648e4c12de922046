//! Client side transport core.
//!
//! [`protocol`] multiplexes many outstanding requests over one connection
//! and runs their completions on a worker pool. [`copy`] builds file
//! transfer jobs on top of it.
pub mod config;
pub mod copy;
mod error;
pub mod protocol;

pub use config::Config;
pub use error::{Error, Status};
