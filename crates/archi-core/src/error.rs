use thiserror::Error;

use crate::iteration::IterationId;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the job lifecycle.
///
/// Every variant carries owned text so errors can be cloned into poller state
/// and broadcast to several listeners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session expired or not authorized: {0}")]
    Auth(String),

    #[error("Iteration {0} not found")]
    NotFound(IterationId),

    #[error("Connection to the generation service failed: {0}")]
    Transport(String),

    #[error("Generation service error: {0}")]
    Service(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Gave up waiting for iteration {id} after {attempts} polls")]
    Timeout { id: IterationId, attempts: u32 },

    #[error("Could not persist session: {0}")]
    Storage(String),

    #[error("Could not render sketch: {0}")]
    Render(String),
}

impl Error {
    /// Short machine-friendly label, used in logs and lifecycle events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::Service(_) => "service",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Storage(_) => "storage",
            Self::Render(_) => "render",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
