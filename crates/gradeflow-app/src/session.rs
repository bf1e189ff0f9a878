// A grading session: the open assignment, its submissions and the operations
// a grader performs on them.
//
// Human decisions (final grade, feedback edits) go through here; AI grading
// is delegated to the coordinator. Everything shares one `SubmissionStore`.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use gradeflow_core::config::GradingSettings;
use gradeflow_core::export::write_csv;
use gradeflow_core::{
    AssignmentId, AssignmentSummary, ExportProjector, GradeResult, GradeSheetRow, GradeTier,
    Submission, SubmissionId, SubmissionStore,
};

use crate::backend::{Backend, ImportSummary, NewAssignment};
use crate::coordinator::{BatchReport, GradingCoordinator, GradingProgress};
use crate::error::GradeError;
use crate::registry::ProviderResolver;

pub struct GradingSession {
    backend: Arc<dyn Backend>,
    store: Arc<SubmissionStore>,
    coordinator: GradingCoordinator,
}

impl GradingSession {
    pub fn new(
        backend: Arc<dyn Backend>,
        resolver: Arc<dyn ProviderResolver>,
        grading: &GradingSettings,
    ) -> Self {
        Self::build(backend, resolver, grading, None)
    }

    /// Like [`new`](Self::new), with batch progress sent to `progress`.
    pub fn with_progress(
        backend: Arc<dyn Backend>,
        resolver: Arc<dyn ProviderResolver>,
        grading: &GradingSettings,
        progress: tokio::sync::mpsc::Sender<GradingProgress>,
    ) -> Self {
        Self::build(backend, resolver, grading, Some(progress))
    }

    fn build(
        backend: Arc<dyn Backend>,
        resolver: Arc<dyn ProviderResolver>,
        grading: &GradingSettings,
        progress: Option<tokio::sync::mpsc::Sender<GradingProgress>>,
    ) -> Self {
        let store = Arc::new(SubmissionStore::new());
        let mut coordinator = GradingCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            resolver,
            grading.max_concurrent,
            grading.provider_timeout(),
        );
        if let Some(tx) = progress {
            coordinator = coordinator.with_progress(tx);
        }
        GradingSession {
            backend,
            store,
            coordinator,
        }
    }

    pub fn store(&self) -> &Arc<SubmissionStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &GradingCoordinator {
        &self.coordinator
    }

    pub fn current_assignment(&self) -> Option<AssignmentId> {
        self.store.current_assignment()
    }

    fn open_id(&self) -> Result<AssignmentId, GradeError> {
        self.current_assignment()
            .ok_or_else(|| GradeError::NotFound("no assignment is open".into()))
    }

    // -- Assignments --

    pub async fn list_assignments(&self) -> Result<Vec<AssignmentSummary>, GradeError> {
        Ok(self.backend.list_assignments().await?)
    }

    /// Load `id` and its submissions into the store, replacing whatever was
    /// open. Grading still running for the previous assignment is discarded.
    pub async fn open_assignment(
        &self,
        id: AssignmentId,
    ) -> Result<Vec<Arc<Submission>>, GradeError> {
        let assignment = self.backend.get_assignment(id).await?;
        let submissions = self.backend.list_submissions(id).await?;
        info!(
            "Opened assignment {} ({}) with {} submissions",
            id,
            assignment.name,
            submissions.len()
        );
        Ok(self.store.load(id, submissions))
    }

    pub async fn create_assignment(
        &self,
        name: &str,
        rubric: &str,
        syllabus: Option<&str>,
    ) -> Result<AssignmentId, GradeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GradeError::Validation("assignment name is empty".into()));
        }
        if rubric.trim().is_empty() {
            return Err(GradeError::Validation("rubric is empty".into()));
        }

        let new = NewAssignment {
            name: name.to_string(),
            rubric_text: rubric.to_string(),
            syllabus_text: syllabus
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
        };
        let id = self
            .backend
            .create_assignment(&new)
            .await
            .map_err(|e| GradeError::Persistence(e.to_string()))?;
        info!("Created assignment {} ({})", id, name);
        Ok(id)
    }

    /// Upload a `.zip` of student files. Reloads the store when `id` is the
    /// open assignment.
    pub async fn import_archive(
        &self,
        id: AssignmentId,
        path: &Path,
    ) -> Result<ImportSummary, GradeError> {
        if !path.is_file() {
            return Err(GradeError::Validation(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return Err(GradeError::Validation(format!(
                "{} is not a .zip archive",
                path.display()
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| GradeError::Validation(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("submissions.zip");
        let summary = self.backend.import_archive(id, file_name, bytes).await?;
        info!("Imported {} students into assignment {}", summary.imported, id);

        if self.current_assignment() == Some(id) {
            self.open_assignment(id).await?;
        }
        Ok(summary)
    }

    // -- Human review --

    /// Record the grader's grade. The backend is written first; the store
    /// only changes once that succeeds.
    pub async fn set_final_grade(
        &self,
        submission_id: SubmissionId,
        grade: GradeTier,
    ) -> Result<Arc<Submission>, GradeError> {
        self.store.get(submission_id)?;
        if let Err(e) = self.backend.set_final_grade(submission_id, grade).await {
            warn!("Final grade for submission {} not saved: {}", submission_id, e);
            return Err(GradeError::Persistence(e.to_string()));
        }
        let updated = self.store.set_final_grade(submission_id, grade)?;
        info!("Submission {} final grade set to {}", submission_id, grade);
        Ok(updated)
    }

    /// Replace the feedback shown and exported for a submission. Blank text
    /// restores the AI feedback.
    pub fn edit_feedback(
        &self,
        submission_id: SubmissionId,
        feedback: &str,
    ) -> Result<Arc<Submission>, GradeError> {
        let feedback = (!feedback.trim().is_empty()).then(|| feedback.to_string());
        Ok(self.store.set_feedback(submission_id, feedback)?)
    }

    // -- AI grading --

    pub async fn grade_one(&self, submission_id: SubmissionId) -> Result<GradeResult, GradeError> {
        let id = self.open_id()?;
        self.coordinator.grade_one(id, submission_id).await
    }

    pub async fn grade_all(&self) -> Result<BatchReport, GradeError> {
        let id = self.open_id()?;
        self.coordinator.grade_all(id).await
    }

    /// Ask the backend to grade every ungraded submission itself. Only a
    /// count comes back, so the open assignment is reloaded afterwards.
    pub async fn grade_all_server_side(&self, id: AssignmentId) -> Result<usize, GradeError> {
        let graded = self.backend.grade_all(id).await?;
        info!("Backend graded {} submissions of assignment {}", graded, id);
        if self.current_assignment() == Some(id) {
            self.open_assignment(id).await?;
        }
        Ok(graded)
    }

    // -- Export --

    pub fn export_rows(&self) -> Result<Vec<GradeSheetRow>, GradeError> {
        let id = self.open_id()?;
        Ok(ExportProjector::project(&self.store, id)?)
    }

    /// Write the grade sheet for the open assignment to `path`.
    pub fn export_csv(&self, path: &Path) -> Result<usize, GradeError> {
        let rows = self.export_rows()?;
        let file = std::fs::File::create(path)
            .map_err(|e| GradeError::Persistence(format!("{}: {e}", path.display())))?;
        write_csv(&rows, file).map_err(|e| GradeError::Persistence(e.to_string()))?;
        info!("Exported {} rows to {}", rows.len(), path.display());
        Ok(rows.len())
    }

    /// The backend's own CSV export, unmodified.
    pub async fn export_server_csv(&self, id: AssignmentId) -> Result<String, GradeError> {
        Ok(self.backend.export_csv(id).await?)
    }
}
