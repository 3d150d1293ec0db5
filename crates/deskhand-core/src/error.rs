use thiserror::Error;

/// Reasons a spawn is refused before any task is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("No executor configured for sub-agent tasks")]
    NoExecutor,

    #[error("Instructions must not be empty")]
    EmptyInstructions,

    #[error("Timeout {requested_ms}ms is below the minimum of {min_ms}ms")]
    TimeoutTooShort { requested_ms: u64, min_ms: u64 },

    #[error("Timeout {requested_ms}ms exceeds the maximum of {max_ms}ms")]
    TimeoutTooLong { requested_ms: u64, max_ms: u64 },

    #[error("Maximum concurrent agents ({limit}) reached, retry once a task finishes")]
    ConcurrencyLimit { limit: usize },
}

impl SpawnError {
    /// Coarse category, for callers that report rejections without matching variants.
    pub fn kind(&self) -> &'static str {
        match self {
            SpawnError::NoExecutor => "configuration",
            SpawnError::EmptyInstructions
            | SpawnError::TimeoutTooShort { .. }
            | SpawnError::TimeoutTooLong { .. } => "validation",
            SpawnError::ConcurrencyLimit { .. } => "admission",
        }
    }
}
