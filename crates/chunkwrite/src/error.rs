// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use thiserror::Error;

/// Any error that may arise while producing chunks, writing them to the sink or finalizing
/// the output file.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The storage layer failed to open, write, flush or close the output file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No chunk became available within the wait bound.
    ///
    /// This is not fatal for the write loop, which keeps polling the source.
    #[error("no chunk available after waiting {waited:?}")]
    ProducerTimeout {
        /// How long the consumer waited before giving up.
        waited: Duration,
    },

    /// The wait on the chunk queue was interrupted and can never complete, because every
    /// producer handle has been dropped and the queue is empty.
    #[error("chunk wait interrupted: all producers are gone")]
    InterruptedWait,

    /// An API contract was violated, e.g. a completion reported an offset that does not
    /// match the write in flight.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The operation was canceled because the sink was already closed by the time it ran.
    #[error("operation canceled")]
    Canceled,
}

/// A specialized `Result` for chunk writing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents the error as a standard I/O error, for callers that interoperate with
/// libraries expecting one.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(error) => error,
            Error::ProducerTimeout { .. } => Self::new(std::io::ErrorKind::TimedOut, value),
            Error::InterruptedWait => Self::new(std::io::ErrorKind::Interrupted, value),
            _ => Self::other(value),
        }
    }
}
