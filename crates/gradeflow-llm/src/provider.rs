// The grading provider seam: request shape, trait and error type.

use async_trait::async_trait;
use thiserror::Error;

use gradeflow_core::{
    Assignment, AssignmentId, CodeFile, ErrorKind, GradeResult, ProviderKind, Submission,
    SubmissionId,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider timed out")]
    Timeout,

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("no credential configured for {0}")]
    MissingCredential(ProviderKind),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unreachable(_) => ErrorKind::ProviderUnreachable,
            ProviderError::Timeout => ErrorKind::ProviderTimeout,
            ProviderError::Status { .. } | ProviderError::Malformed(_) => ErrorKind::ProviderError,
            ProviderError::MissingCredential(_) => ErrorKind::Validation,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ProviderError::Unreachable(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// GradingRequest
// ---------------------------------------------------------------------------

/// Everything a provider needs to grade one submission.
#[derive(Debug, Clone)]
pub struct GradingRequest {
    pub assignment_id: AssignmentId,
    pub submission_id: SubmissionId,
    pub rubric: String,
    pub syllabus: Option<String>,
    pub student_name: String,
    pub canvas_id: Option<String>,
    pub code_files: Vec<CodeFile>,
    /// `(filename, ocr_text)` for each screenshot, in submission order.
    pub screenshots: Vec<(String, String)>,
}

impl GradingRequest {
    pub fn new(assignment: &Assignment, submission: &Submission) -> Self {
        GradingRequest {
            assignment_id: assignment.id,
            submission_id: submission.id,
            rubric: assignment.rubric_text.clone(),
            syllabus: assignment
                .syllabus_text
                .clone()
                .filter(|s| !s.trim().is_empty()),
            student_name: submission.student_name.clone(),
            canvas_id: submission.canvas_id.clone(),
            code_files: submission.code_files.clone(),
            screenshots: submission
                .screenshots
                .iter()
                .map(|s| (s.filename.clone(), s.ocr_text.clone()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// GradingProvider
// ---------------------------------------------------------------------------

/// Something that turns a [`GradingRequest`] into a [`GradeResult`].
///
/// Implementations make exactly one upstream call per `grade` and do not
/// apply their own overall deadline; callers wrap the future in a timeout.
#[async_trait]
pub trait GradingProvider: Send + Sync {
    /// Short label for logs, e.g. `openai/gpt-4o-mini`.
    fn name(&self) -> String;

    async fn grade(&self, request: &GradingRequest) -> Result<GradeResult, ProviderError>;
}
