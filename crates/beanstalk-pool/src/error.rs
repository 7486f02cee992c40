//! Error types for the producer pool.
//!
//! This module defines the central [`Error`] enum, which captures every
//! failure a caller of the pool can observe. Errors are grouped by origin:
//!
//! - Construction: [`Error::NoEndpoints`], [`Error::Connect`].
//! - Connection level: [`Error::Io`], [`Error::Timeout`],
//!   [`Error::ConnectionClosed`].
//! - Broker rejections: [`Error::Buried`], [`Error::JobTooBig`],
//!   [`Error::Draining`] and the general protocol errors.
//! - Dispatch: [`Error::ChannelError`], [`Error::RequestCancelled`].
//! - Lifecycle: [`Error::PoolStopped`].
//!
//! The pool itself never wraps or retries these; whatever a producer reports
//! is what the caller of [`ProducerPool::put`](crate::ProducerPool::put)
//! receives.

use std::{io, sync::Arc};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the producer pool and its collaborators.
#[derive(Clone, thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The pool was asked to start without any endpoint.
    #[error("No endpoints configured")]
    NoEndpoints,

    /// A producer could not open its connection.
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading from or writing to the broker failed.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// A network operation did not complete within the configured timeout.
    #[error("Timed out: {context}")]
    Timeout { context: String },

    /// The broker closed the connection in the middle of an exchange.
    #[error("Connection closed by broker")]
    ConnectionClosed,

    /// The job was accepted but buried because the broker ran out of memory
    /// growing its priority queue.
    #[error("Job {id} was buried")]
    Buried { id: u64 },

    /// The job body exceeds the broker's `max-job-size`.
    #[error("Job too big")]
    JobTooBig,

    /// The broker is in drain mode and refuses new jobs.
    #[error("Broker is draining")]
    Draining,

    /// The job body was not terminated with `\r\n`.
    #[error("Expected CRLF after job body")]
    ExpectedCrlf,

    #[error("Broker out of memory")]
    OutOfMemory,

    #[error("Broker internal error")]
    InternalError,

    #[error("Bad command format")]
    BadFormat,

    #[error("Unknown command")]
    UnknownCommand,

    /// The broker replied with a line that is not valid for the command.
    #[error("Unexpected response: {line:?}")]
    UnexpectedResponse { line: String },

    /// The caller supplied an argument the protocol cannot carry.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Internal channel send/receive failure (e.g. no producer is listening).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The producer dropped the request without answering it.
    #[error("Request cancelled")]
    RequestCancelled,

    /// The pool has been stopped and no longer accepts jobs.
    #[error("Pool is stopped")]
    PoolStopped,
}

impl Error {
    /// Returns `true` when the connection that produced this error can no
    /// longer be trusted and has to be re-established.
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Timeout { .. }
                | Self::ConnectionClosed
                | Self::ExpectedCrlf
                | Self::UnexpectedResponse { .. }
                | Self::BadFormat
                | Self::UnknownCommand
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
