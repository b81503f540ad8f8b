use thiserror::Error;

/// Engine-level failures surfaced to the caller.
///
/// Program-level failures (compile errors, timeouts, memory kills, runtime
/// errors, wrong answers) are never `Err` values: they are reported inside
/// the per-test outcomes so the caller can distinguish "your code is wrong"
/// from "the judge is unavailable".
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("execution service at capacity ({pending} requests pending, limit {limit})")]
    ServiceBusy { pending: usize, limit: usize },

    #[error("execution backend failure: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal(message.into())
    }

    /// Whether the caller may retry the request later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ServiceBusy { .. } | EngineError::Internal(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(!EngineError::Validation("empty code".into()).is_retryable());
        assert!(!EngineError::UnsupportedLanguage("cobol".into()).is_retryable());
        assert!(EngineError::ServiceBusy {
            pending: 65,
            limit: 64
        }
        .is_retryable());
        assert!(EngineError::internal("spawn failed").is_retryable());
    }
}
