use std::fmt;
use std::time::Duration;

/// Errors raised while executing, supervising or dispatching work.
///
/// Missing the deadline is not represented here: stragglers are an expected
/// outcome and are answered with default values instead of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkError {
    /// A recoverable fault of a single execution (simulated I/O, timeouts upstream)
    Transient { reason: String },
    /// The sink rejected a write
    Sink { reason: String },
    /// A permanent failure; retrying cannot help
    Rejected { reason: String },
    /// A failure the worker does not know how to handle
    Unexpected { reason: String },
    /// The worker failed too often within its restart window
    RestartBudgetExceeded { attempts: u32, window: Duration },
    /// Channel operation failed
    ChannelError { reason: String },
    /// The coordinator or recorder could not be started
    StartupFailed { reason: String },
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkError::Transient { reason } => {
                write!(f, "Transient failure: {}", reason)
            }
            WorkError::Sink { reason } => {
                write!(f, "Sink failure: {}", reason)
            }
            WorkError::Rejected { reason } => {
                write!(f, "Work rejected: {}", reason)
            }
            WorkError::Unexpected { reason } => {
                write!(f, "Unexpected failure: {}", reason)
            }
            WorkError::RestartBudgetExceeded { attempts, window } => {
                write!(
                    f,
                    "Restart budget exceeded: {} restarts within {:?}",
                    attempts, window
                )
            }
            WorkError::ChannelError { reason } => {
                write!(f, "Channel operation failed: {}", reason)
            }
            WorkError::StartupFailed { reason } => {
                write!(f, "Failed to start: {}", reason)
            }
        }
    }
}

impl std::error::Error for WorkError {}

/// Result type for worker operations
pub type TallyResult<T> = Result<T, WorkError>;
