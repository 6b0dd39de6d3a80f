use std::time::Duration;

use thiserror::Error;

use super::codec::Position;
use super::motion::MotionGoal;

/// Errors that can occur while driving the mill.
///
/// Each variant identifies which contract was violated: the location
/// configuration, the response grammar, motion convergence, or the
/// underlying serial link.
#[derive(Error, Debug)]
pub enum CncError {
    /// Low-level I/O failure (port open, write, read, disconnect).
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Response from the controller doesn't match the expected format.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Missing or malformed location, or invalid session settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Polled position did not reach the goal before the timeout expired.
    #[error("Motion timeout after {timeout:?}: goal {goal}, last position {last}")]
    MotionTimeout {
        /// Commanded goal
        goal: MotionGoal,
        /// Last position reported by the controller
        last: Position,
        /// Timeout that was exceeded
        timeout: Duration,
    },
}

impl From<serialport::Error> for CncError {
    fn from(err: serialport::Error) -> Self {
        CncError::Transport(err.into())
    }
}

/// Result type for mill operations.
pub type CncResult<T> = Result<T, CncError>;
