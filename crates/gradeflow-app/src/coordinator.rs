// AI grading of one submission or a whole assignment.
//
// Results are written back through the store's assignment-scoped methods, so
// a result that arrives after the store moved to another assignment is
// dropped instead of landing on the wrong record. A batch notices the switch
// before admitting each submission and stops early.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gradeflow_core::{
    Assignment, AssignmentId, ErrorKind, GradeResult, GradingState, StoreError, Submission,
    SubmissionId, SubmissionStore,
};
use gradeflow_llm::{GradingProvider, GradingRequest};

use crate::backend::Backend;
use crate::error::GradeError;
use crate::registry::ProviderResolver;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub submission_id: SubmissionId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of a `grade_all` run.
///
/// `graded_count + failures.len() + discarded == attempted`. Submissions never
/// admitted because the assignment changed are not counted as attempted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub assignment_id: AssignmentId,
    pub total: usize,
    pub attempted: usize,
    pub graded_count: usize,
    pub failures: Vec<BatchFailure>,
    /// Results dropped because the store moved to another assignment.
    pub discarded: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressOutcome {
    Graded,
    Failed(ErrorKind),
    Discarded,
    Skipped,
}

/// Sent once per submission as a batch progresses.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingProgress {
    pub completed: usize,
    pub total: usize,
    pub submission_id: SubmissionId,
    pub outcome: ProgressOutcome,
}

enum ItemOutcome {
    Graded,
    Failed(GradeError),
    /// Result dropped; `stale` when the store moved to another assignment
    /// rather than the submission disappearing from a reload.
    Discarded { stale: bool },
    Skipped,
}

// ---------------------------------------------------------------------------
// In-flight tracking
// ---------------------------------------------------------------------------

type InFlight = Arc<Mutex<HashSet<SubmissionId>>>;

/// Holds a submission's in-flight slot until dropped.
struct InFlightGuard {
    set: InFlight,
    id: SubmissionId,
}

impl InFlightGuard {
    fn claim(set: &InFlight, id: SubmissionId) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
        inserted.then(|| InFlightGuard {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// GradingCoordinator
// ---------------------------------------------------------------------------

pub struct GradingCoordinator {
    store: Arc<SubmissionStore>,
    backend: Arc<dyn Backend>,
    resolver: Arc<dyn ProviderResolver>,
    max_concurrent: usize,
    timeout: Duration,
    in_flight: InFlight,
    progress: Option<mpsc::Sender<GradingProgress>>,
}

impl GradingCoordinator {
    pub fn new(
        store: Arc<SubmissionStore>,
        backend: Arc<dyn Backend>,
        resolver: Arc<dyn ProviderResolver>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        GradingCoordinator {
            store,
            backend,
            resolver,
            max_concurrent: max_concurrent.max(1),
            timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            progress: None,
        }
    }

    /// Report batch progress on `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<GradingProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn is_grading(&self, id: SubmissionId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Grade one submission and store the result.
    ///
    /// On failure the previous grade is kept and the submission is marked
    /// `GradeFailed`.
    pub async fn grade_one(
        &self,
        assignment_id: AssignmentId,
        submission_id: SubmissionId,
    ) -> Result<GradeResult, GradeError> {
        self.ensure_loaded(assignment_id)?;
        let submission = self.store.get(submission_id)?;
        let _guard = InFlightGuard::claim(&self.in_flight, submission_id)
            .ok_or(GradeError::AlreadyGrading(submission_id.0))?;

        let assignment = self.backend.get_assignment(assignment_id).await?;
        let provider = self.resolver.resolve()?;

        self.store
            .set_grading_state_for(assignment_id, submission_id, GradingState::Grading)?;
        info!(
            "Grading submission {} ({}) with {}",
            submission_id,
            submission.student_name,
            provider.name()
        );

        let request = GradingRequest::new(&assignment, &submission);
        match self.call_provider(provider.as_ref(), &request).await {
            Ok(result) => {
                match self
                    .store
                    .apply_grade_result_for(assignment_id, submission_id, result.clone())
                {
                    Ok(_) => info!(
                        "Submission {} graded: {} ({:?})",
                        submission_id, result.recommended_grade, result.confidence
                    ),
                    Err(e) => debug!("Dropping grade for submission {}: {}", submission_id, e),
                }
                Ok(result)
            }
            Err(e) => {
                warn!("Grading submission {} failed: {}", submission_id, e);
                self.mark_failed(assignment_id, submission_id, e.kind());
                Err(e)
            }
        }
    }

    /// Grade every submission of the open assignment, at most
    /// `max_concurrent` at a time.
    ///
    /// Per-submission failures go into the report. Only setup problems (the
    /// assignment is not open, its context cannot be fetched, no provider can
    /// be resolved) return `Err`.
    pub async fn grade_all(&self, assignment_id: AssignmentId) -> Result<BatchReport, GradeError> {
        self.ensure_loaded(assignment_id)?;
        let assignment = self.backend.get_assignment(assignment_id).await?;
        let provider = self.resolver.resolve()?;

        let snapshot = self.store.list();
        let total = snapshot.len();
        let started_at = Utc::now();
        info!(
            "Batch grading {} submissions for assignment {} with {} (max {} concurrent)",
            total,
            assignment_id,
            provider.name(),
            self.max_concurrent
        );

        let mut report = BatchReport {
            assignment_id,
            total,
            attempted: 0,
            graded_count: 0,
            failures: Vec::new(),
            discarded: 0,
            cancelled: false,
            started_at,
            finished_at: started_at,
        };

        let assignment = &assignment;
        let provider = provider.as_ref();
        let mut outcomes = stream::iter(snapshot)
            .map(|submission| {
                // Runs when buffer_unordered admits the item.
                let admitted = self.store.current_assignment() == Some(assignment_id);
                async move {
                    let id = submission.id;
                    if !admitted {
                        return (id, ItemOutcome::Skipped);
                    }
                    let outcome = self
                        .grade_in_batch(assignment, provider, &submission)
                        .await;
                    (id, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent);

        let mut completed = 0;
        while let Some((submission_id, outcome)) = outcomes.next().await {
            completed += 1;
            let progress = match outcome {
                ItemOutcome::Graded => {
                    report.attempted += 1;
                    report.graded_count += 1;
                    ProgressOutcome::Graded
                }
                ItemOutcome::Failed(e) => {
                    report.attempted += 1;
                    let kind = e.kind();
                    report.failures.push(BatchFailure {
                        submission_id,
                        kind,
                        message: e.to_string(),
                    });
                    ProgressOutcome::Failed(kind)
                }
                ItemOutcome::Discarded { stale } => {
                    report.attempted += 1;
                    report.discarded += 1;
                    report.cancelled |= stale;
                    ProgressOutcome::Discarded
                }
                ItemOutcome::Skipped => {
                    report.cancelled = true;
                    ProgressOutcome::Skipped
                }
            };
            if let Some(tx) = &self.progress {
                let _ = tx
                    .send(GradingProgress {
                        completed,
                        total,
                        submission_id,
                        outcome: progress,
                    })
                    .await;
            }
        }

        report.finished_at = Utc::now();
        if report.cancelled {
            info!(
                "Batch for assignment {} stopped after the assignment changed: {} graded, {} discarded, {} not started",
                assignment_id,
                report.graded_count,
                report.discarded,
                total - report.attempted
            );
        } else {
            info!(
                "Batch for assignment {} done: {}/{} graded, {} failed, {} discarded",
                assignment_id,
                report.graded_count,
                total,
                report.failures.len(),
                report.discarded
            );
        }
        Ok(report)
    }

    async fn grade_in_batch(
        &self,
        assignment: &Assignment,
        provider: &dyn GradingProvider,
        submission: &Submission,
    ) -> ItemOutcome {
        let assignment_id = assignment.id;
        let id = submission.id;
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, id) else {
            return ItemOutcome::Failed(GradeError::AlreadyGrading(id.0));
        };

        match self
            .store
            .set_grading_state_for(assignment_id, id, GradingState::Grading)
        {
            Ok(_) => {}
            Err(StoreError::Stale { .. }) => return ItemOutcome::Skipped,
            Err(e) => return ItemOutcome::Failed(e.into()),
        }

        let request = GradingRequest::new(assignment, submission);
        match self.call_provider(provider, &request).await {
            Ok(result) => match self.store.apply_grade_result_for(assignment_id, id, result) {
                Ok(_) => ItemOutcome::Graded,
                Err(e) => {
                    debug!("Discarding result for submission {}: {}", id, e);
                    ItemOutcome::Discarded {
                        stale: matches!(e, StoreError::Stale { .. }),
                    }
                }
            },
            Err(e) => {
                if self.store.current_assignment() != Some(assignment_id) {
                    debug!("Discarding failure for submission {}: {}", id, e);
                    return ItemOutcome::Discarded { stale: true };
                }
                warn!("Grading submission {} failed: {}", id, e);
                self.mark_failed(assignment_id, id, e.kind());
                ItemOutcome::Failed(e)
            }
        }
    }

    /// One provider call under the configured deadline.
    async fn call_provider(
        &self,
        provider: &dyn GradingProvider,
        request: &GradingRequest,
    ) -> Result<GradeResult, GradeError> {
        match tokio::time::timeout(self.timeout, provider.grade(request)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(GradeError::ProviderTimeout(Some(self.timeout.as_secs()))),
        }
    }

    fn mark_failed(&self, assignment_id: AssignmentId, id: SubmissionId, kind: ErrorKind) {
        if let Err(e) =
            self.store
                .set_grading_state_for(assignment_id, id, GradingState::GradeFailed(kind))
        {
            debug!("Could not record failure for submission {}: {}", id, e);
        }
    }

    fn ensure_loaded(&self, assignment_id: AssignmentId) -> Result<(), GradeError> {
        if self.store.current_assignment() == Some(assignment_id) {
            Ok(())
        } else {
            Err(GradeError::NotFound(format!(
                "assignment {assignment_id} is not open"
            )))
        }
    }
}
