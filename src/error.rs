use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedactError {
    /// A restore operator with no matching save.
    #[error("unbalanced graphics state: restore at operator {index} with empty stack")]
    StateStack { index: usize },
    #[error("operator `{operator}` has no known geometric effect")]
    UnsupportedOperator { operator: String },
    #[error("no width metrics for font `{font}`")]
    FontMetricsMissing { font: String },
    #[error("image {object} cannot be decoded: {reason}")]
    ImageDecode { object: String, reason: String },
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid redaction location: {0}")]
    InvalidLocation(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("worker pool error: {0}")]
    WorkerPool(String),
    #[error("redaction cancelled")]
    Cancelled,
    #[error("redaction timed out")]
    TimedOut,
}

impl RedactError {
    /// Errors that are answered by overpainting the page instead of failing it.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            RedactError::StateStack { .. } | RedactError::UnsupportedOperator { .. }
        )
    }
}
