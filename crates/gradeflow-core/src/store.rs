// In-memory submission store for the active assignment.
//
// The store is the single source of truth for grading state during a session.
// Records are held as `Arc<Submission>` and every mutation builds a new record
// and swaps the pointer, so a reader never observes a half-written submission.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{AssignmentId, GradeResult, GradeTier, GradingState, Submission, SubmissionId};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("submission {0} not found in the active assignment")]
    NotFound(SubmissionId),

    /// The store was reloaded for another assignment after the caller
    /// captured its scope.
    #[error("store moved from assignment {expected} to {actual:?}")]
    Stale {
        expected: AssignmentId,
        actual: Option<AssignmentId>,
    },

    #[error("assignment {0} is not loaded")]
    AssignmentNotLoaded(AssignmentId),
}

// ---------------------------------------------------------------------------
// SubmissionStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    assignment: Option<AssignmentId>,
    /// Submissions in import order.
    records: Vec<Arc<Submission>>,
    index: HashMap<SubmissionId, usize>,
}

/// Submissions for the currently open assignment.
#[derive(Default)]
pub struct SubmissionStore {
    inner: RwLock<Inner>,
}

impl SubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Writers only swap whole `Arc`s, so a poisoned lock still guards a
    // consistent collection.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole collection with `submissions` for `assignment`.
    ///
    /// Import order is preserved. Submissions that already carry a grade
    /// start in `Graded`; everything else starts `Ungraded`. Any grading work
    /// scoped to the previous assignment becomes stale.
    pub fn load(
        &self,
        assignment: AssignmentId,
        submissions: Vec<Submission>,
    ) -> Vec<Arc<Submission>> {
        let records: Vec<Arc<Submission>> = submissions
            .into_iter()
            .map(|mut sub| {
                sub.grading = if sub.grade.is_some() {
                    GradingState::Graded
                } else {
                    GradingState::Ungraded
                };
                Arc::new(sub)
            })
            .collect();
        let index = records
            .iter()
            .enumerate()
            .map(|(i, sub)| (sub.id, i))
            .collect();

        let mut inner = self.write();
        let previous = inner.assignment.replace(assignment);
        inner.records = records.clone();
        inner.index = index;
        info!(
            "Loaded {} submissions for assignment {} (previous: {:?})",
            records.len(),
            assignment,
            previous
        );
        records
    }

    /// The assignment the store currently holds, if any.
    pub fn current_assignment(&self) -> Option<AssignmentId> {
        self.read().assignment
    }

    /// All submissions in import order.
    pub fn list(&self) -> Vec<Arc<Submission>> {
        self.read().records.clone()
    }

    /// The active assignment and its submissions, read under one lock.
    pub fn snapshot(&self) -> (Option<AssignmentId>, Vec<Arc<Submission>>) {
        let inner = self.read();
        (inner.assignment, inner.records.clone())
    }

    pub fn get(&self, id: SubmissionId) -> Result<Arc<Submission>, StoreError> {
        let inner = self.read();
        inner
            .index
            .get(&id)
            .map(|&i| Arc::clone(&inner.records[i]))
            .ok_or(StoreError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Replace `grade` with `result` and mark the submission `Graded`.
    /// `final_grade` is never touched.
    pub fn apply_grade_result(
        &self,
        id: SubmissionId,
        result: GradeResult,
    ) -> Result<Arc<Submission>, StoreError> {
        self.replace_with(None, id, |sub| {
            sub.grade = Some(result);
            sub.grading = GradingState::Graded;
        })
    }

    /// Like [`apply_grade_result`](Self::apply_grade_result), but only if
    /// the store still holds `assignment`. The check and the write happen
    /// under the same lock.
    pub fn apply_grade_result_for(
        &self,
        assignment: AssignmentId,
        id: SubmissionId,
        result: GradeResult,
    ) -> Result<Arc<Submission>, StoreError> {
        self.replace_with(Some(assignment), id, |sub| {
            sub.grade = Some(result);
            sub.grading = GradingState::Graded;
        })
    }

    /// Record the grader's decision. Independent of any AI state.
    pub fn set_final_grade(
        &self,
        id: SubmissionId,
        grade: GradeTier,
    ) -> Result<Arc<Submission>, StoreError> {
        self.replace_with(None, id, |sub| sub.final_grade = Some(grade))
    }

    /// Store (or clear, with `None`) the grader's edited feedback.
    pub fn set_feedback(
        &self,
        id: SubmissionId,
        feedback: Option<String>,
    ) -> Result<Arc<Submission>, StoreError> {
        self.replace_with(None, id, |sub| sub.feedback_override = feedback)
    }

    pub fn set_grading_state(
        &self,
        id: SubmissionId,
        state: GradingState,
    ) -> Result<Arc<Submission>, StoreError> {
        self.replace_with(None, id, |sub| sub.grading = state)
    }

    pub fn set_grading_state_for(
        &self,
        assignment: AssignmentId,
        id: SubmissionId,
        state: GradingState,
    ) -> Result<Arc<Submission>, StoreError> {
        self.replace_with(Some(assignment), id, |sub| sub.grading = state)
    }

    /// Copy the record for `id`, let `f` modify the copy, and swap it in.
    fn replace_with<F>(
        &self,
        expected: Option<AssignmentId>,
        id: SubmissionId,
        f: F,
    ) -> Result<Arc<Submission>, StoreError>
    where
        F: FnOnce(&mut Submission),
    {
        let mut inner = self.write();
        if let Some(expected) = expected {
            if inner.assignment != Some(expected) {
                debug!(
                    "Rejecting update for submission {}: store is on {:?}, caller expected {}",
                    id, inner.assignment, expected
                );
                return Err(StoreError::Stale {
                    expected,
                    actual: inner.assignment,
                });
            }
        }
        let Some(&i) = inner.index.get(&id) else {
            return Err(StoreError::NotFound(id));
        };
        let mut updated = Submission::clone(&inner.records[i]);
        f(&mut updated);
        let updated = Arc::new(updated);
        inner.records[i] = Arc::clone(&updated);
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
