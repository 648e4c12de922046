use std::io;

use thiserror::Error;

use crate::protocol::StreamId;

/// Outcome of an asynchronous operation as seen by a completion handler.
pub type Status = Result<(), Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no more free stream ids on this connection")]
    NoMoreFreeIds,

    #[error("dispatcher queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("dispatcher has been stopped")]
    DispatcherStopped,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid locator '{0}'")]
    InvalidLocator(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("unable to open {locator}: {source}")]
    TransferOpenFailed {
        locator: String,
        #[source]
        source: io::Error,
    },

    #[error("transfer i/o failed on {locator}: {source}")]
    TransferIoFailed {
        locator: String,
        #[source]
        source: io::Error,
    },

    #[error("validation failed for {locator}: {reason}")]
    TransferValidationFailed { locator: String, reason: String },

    #[error("operation on stream {0} expired")]
    OperationExpired(StreamId),

    #[error("server error {code}: {message}")]
    ErrorResponse { code: u16, message: String },

    #[error("connection broken: {0}")]
    ConnectionBroken(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("copy job has already been run")]
    AlreadyRun,

    #[error("failed to encode frame: {0}")]
    Serialize(#[from] bincode::error::EncodeError),

    #[error("failed to decode frame: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),

    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit code a command line tool should report for this error.
    pub fn shell_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidLocator(_)
            | Error::NotSupported(_)
            | Error::AlreadyRun => 50,
            Error::TransferOpenFailed { .. }
            | Error::TransferIoFailed { .. }
            | Error::TransferValidationFailed { .. }
            | Error::OperationExpired(_) => 51,
            Error::Cancelled => 53,
            Error::ErrorResponse { .. } => 54,
            _ => 52,
        }
    }

    pub(crate) fn open_failed(locator: impl ToString, source: io::Error) -> Self {
        Error::TransferOpenFailed {
            locator: locator.to_string(),
            source,
        }
    }

    pub(crate) fn io_failed(locator: impl ToString, source: io::Error) -> Self {
        Error::TransferIoFailed {
            locator: locator.to_string(),
            source,
        }
    }

    pub(crate) fn validation_failed(locator: impl ToString, reason: impl Into<String>) -> Self {
        Error::TransferValidationFailed {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }
}
