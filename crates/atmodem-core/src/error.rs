//! Error types for the modem session.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure of a raw [`Transport`](crate::transport::Transport) primitive.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No bytes arrived within the read timeout. Expected while idle.
    #[error("read timed out")]
    Timeout,
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Errors surfaced to callers of the session and correlator.
///
/// A device answering `ERROR` to an `ExactOk` command is not an error: it is
/// reported as `false` so callers can branch on it.
#[derive(Debug, Error)]
pub enum ModemError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No terminating line arrived for the outstanding command.
    #[error("no response to `{command}` within {waited:?}")]
    Timeout {
        command: String,
        waited: Duration,
        /// Lines captured before the deadline.
        partial: Vec<String>,
    },

    /// A multi-line response did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Rejected before anything was written to the device.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T, E = ModemError> = std::result::Result<T, E>;
