use crate::traits::ServiceError;

/// Hard failures of a turn. Per-call tool problems never end up here; they
/// travel to the remote side inside `ToolOutput`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("user input must not be empty")]
    EmptyInput,

    #[error("tool batch incomplete: expected {expected} outputs, produced {produced}")]
    BatchIncomplete { expected: usize, produced: usize },

    #[error("duplicate tool call id '{0}' in one batch")]
    DuplicateCallId(String),

    #[error("remote run violated protocol: {0}")]
    Protocol(String),

    #[error("tool output submission rejected for run {run_id}: {reason}")]
    SubmissionRejected { run_id: String, reason: String },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    TransportExhausted {
        operation: &'static str,
        attempts: u32,
        last: String,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
