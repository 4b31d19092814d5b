use thiserror::Error;

use crate::events::Stage;
use crate::pool::MAX_BATCHES;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown system: {0}")]
    UnknownSystem(String),

    #[error("Batch limit exceeded: at most {max} snapshots per run")]
    BatchLimitExceeded { max: usize },

    #[error("Invalid batch index {index}: only {count} batches loaded")]
    InvalidBatchIndex { index: usize, count: usize },

    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an UnknownSystem error from any name-ish input
    pub fn unknown_system(name: impl Into<String>) -> Self {
        Self::UnknownSystem(name.into())
    }

    pub fn batch_limit() -> Self {
        Self::BatchLimitExceeded { max: MAX_BATCHES }
    }

    /// Create an Invariant error; these indicate bugs and are never recovered
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Wrap this error with the pipeline stage it surfaced in
    pub(crate) fn in_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tag_is_displayed() {
        let err = Error::invariant("collapse tally mismatch").in_stage(Stage::Static);
        let text = err.to_string();
        assert!(text.starts_with("static stage failed"), "{}", text);
    }
}
