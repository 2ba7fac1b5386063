//! Error types for link and motion operations.

use crate::motion::OperationKind;
use rfbench_common::axis::Axis;
use std::io;
use thiserror::Error;

/// Why a transport attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportCause {
    /// Attempt exceeded its timeout.
    #[error("timed out")]
    Timeout,

    /// Peer refused the connection.
    #[error("connection refused")]
    Refused,

    /// Peer closed or reset the connection.
    #[error("connection closed by peer")]
    Closed,

    /// No connection and no known peer to reconnect to.
    #[error("not connected")]
    NotConnected,

    /// All attempts finished without a single byte of response.
    #[error("empty response")]
    EmptyResponse,

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportCause {
    /// Classify a socket error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportCause::Timeout,
            io::ErrorKind::ConnectionRefused => TransportCause::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportCause::Closed,
            _ => TransportCause::Io(err.to_string()),
        }
    }

    /// Connection-class failures drop the socket and reconnect before the next attempt.
    #[inline]
    pub fn is_connection_class(&self) -> bool {
        matches!(self, TransportCause::Refused | TransportCause::Closed)
    }
}

/// Errors crossing the link boundary. Never panics, always returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Network-level failure after the retry budget was spent.
    #[error("transport error after {attempts} attempt(s): {cause}")]
    Transport {
        /// Last observed cause
        cause: TransportCause,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Encode/decode fault. Retrying cannot help, so none is made.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LinkError {
    /// Transport failure with the given cause.
    pub fn transport(cause: TransportCause, attempts: u32) -> Self {
        LinkError::Transport { cause, attempts }
    }

    /// Transport cause, if this is a transport error.
    pub fn cause(&self) -> Option<&TransportCause> {
        match self {
            LinkError::Transport { cause, .. } => Some(cause),
            LinkError::Protocol(_) => None,
        }
    }

    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, LinkError::Transport { .. })
    }
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Failures of a motion operation, reported through the completion event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MotionError {
    /// Confirmations did not arrive in time.
    #[error("{kind} {axis} not confirmed within {timeout_s}s")]
    OperationTimeout {
        axis: Axis,
        kind: OperationKind,
        timeout_s: u64,
    },

    /// The motion command could not be delivered.
    #[error("{kind} {axis} command failed: {source}")]
    Dispatch {
        axis: Axis,
        kind: OperationKind,
        #[source]
        source: LinkError,
    },

    /// The motion service task is gone.
    #[error("motion service stopped")]
    ServiceStopped,
}
