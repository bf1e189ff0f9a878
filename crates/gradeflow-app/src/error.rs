// Error type surfaced by the session and the grading coordinator.

use thiserror::Error;

use gradeflow_core::{ErrorKind, StoreError};
use gradeflow_llm::ProviderError;

use crate::backend::BackendError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Carries the deadline in seconds when the coordinator enforced it.
    #[error("provider did not answer {}", within(.0))]
    ProviderTimeout(Option<u64>),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("submission {0} is already being graded")]
    AlreadyGrading(i64),

    #[error("could not persist: {0}")]
    Persistence(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),
}

fn within(secs: &Option<u64>) -> String {
    match secs {
        Some(secs) => format!("within {secs} seconds"),
        None => "before the connection timed out".to_string(),
    }
}

impl GradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GradeError::Validation(_) => ErrorKind::Validation,
            GradeError::NotFound(_) => ErrorKind::NotFound,
            GradeError::ProviderUnreachable(_) => ErrorKind::ProviderUnreachable,
            GradeError::ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            GradeError::Provider(_) => ErrorKind::ProviderError,
            GradeError::AlreadyGrading(_) => ErrorKind::AlreadyGrading,
            GradeError::Persistence(_) | GradeError::BackendUnreachable(_) => {
                ErrorKind::Persistence
            }
        }
    }
}

impl From<ProviderError> for GradeError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unreachable(msg) => GradeError::ProviderUnreachable(msg),
            ProviderError::Timeout => GradeError::ProviderTimeout(None),
            ProviderError::MissingCredential(kind) => GradeError::Validation(format!(
                "{} needs an API key (set one with `config set` or {})",
                kind.display_name(),
                kind.credential_env_var().unwrap_or("an environment variable")
            )),
            other => GradeError::Provider(other.to_string()),
        }
    }
}

impl From<StoreError> for GradeError {
    fn from(e: StoreError) -> Self {
        GradeError::NotFound(e.to_string())
    }
}

impl From<BackendError> for GradeError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(what) => GradeError::NotFound(what),
            BackendError::Unreachable(msg) => GradeError::BackendUnreachable(msg),
            other => GradeError::Persistence(other.to_string()),
        }
    }
}
