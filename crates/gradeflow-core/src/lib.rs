// Core grading-session state: the submission model, the in-memory store,
// grade-sheet export, the provider catalog and configuration files.

pub mod catalog;
pub mod config;
pub mod export;
pub mod model;
pub mod store;

pub use catalog::ProviderKind;
pub use export::{ExportProjector, GradeSheetRow};
pub use model::{
    Assignment, AssignmentId, AssignmentSummary, CodeFile, CodeQuality, Confidence, ErrorKind,
    GradeResult, GradeTier, GradingState, RequirementCheck, Screenshot, Submission, SubmissionId,
};
pub use store::{StoreError, SubmissionStore};
