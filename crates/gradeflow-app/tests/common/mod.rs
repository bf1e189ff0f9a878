// Shared fixtures for the gradeflow-app integration tests: an in-memory
// backend and scriptable grading providers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use gradeflow_app::backend::{
    Backend, BackendError, ImportSummary, ImportedStudent, NewAssignment, RemoteProvider,
    RemoteProviderConfig,
};
use gradeflow_app::{FixedProvider, GradingSession};
use gradeflow_core::config::GradingSettings;
use gradeflow_core::{
    Assignment, AssignmentId, AssignmentSummary, CodeQuality, Confidence, GradeResult, GradeTier,
    Submission, SubmissionId,
};
use gradeflow_llm::{GradingProvider, GradingRequest, ProviderError};

pub const LAB_1: AssignmentId = AssignmentId(1);
pub const LAB_2: AssignmentId = AssignmentId(2);

// ---------------------------------------------------------------------------
// Grade results
// ---------------------------------------------------------------------------

pub fn result(tier: GradeTier, feedback: &str) -> GradeResult {
    GradeResult {
        recommended_grade: tier,
        confidence: Confidence::High,
        meets_requirements: vec![],
        code_quality: CodeQuality::default(),
        feedback: feedback.to_string(),
        ta_notes: String::new(),
    }
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    assignments: Vec<Assignment>,
    submissions: HashMap<AssignmentId, Vec<Submission>>,
    final_grades: Vec<(SubmissionId, GradeTier)>,
    next_id: i64,
}

/// In-memory stand-in for the storage backend.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    pub fail_final_grade: Mutex<bool>,
    pub imports: AtomicUsize,
}

impl FakeBackend {
    /// Two assignments: LAB_1 with `lab1` students, LAB_2 with `lab2`.
    pub fn with_rosters(lab1: &[&str], lab2: &[&str]) -> Arc<Self> {
        let backend = FakeBackend::default();
        {
            let mut state = backend.state.lock().unwrap();
            for (id, names, offset) in [(LAB_1, lab1, 100), (LAB_2, lab2, 200)] {
                state.assignments.push(Assignment {
                    id,
                    name: format!("Lab {}", id.0),
                    rubric_text: "Write a function add(a, b) that returns the sum.".into(),
                    syllabus_text: None,
                });
                let subs = names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let mut sub = Submission::new(SubmissionId(offset + i as i64), *name);
                        sub.canvas_id = Some(format!("{}", 9000 + offset + i as i64));
                        sub
                    })
                    .collect();
                state.submissions.insert(id, subs);
            }
            state.next_id = 3;
        }
        Arc::new(backend)
    }

    pub fn final_grades(&self) -> Vec<(SubmissionId, GradeTier)> {
        self.state.lock().unwrap().final_grades.clone()
    }

    pub fn add_submission(&self, assignment: AssignmentId, sub: Submission) {
        self.state
            .lock()
            .unwrap()
            .submissions
            .entry(assignment)
            .or_default()
            .push(sub);
    }

    /// Drop a submission, as if it was deleted between two loads.
    pub fn remove_submission(&self, id: SubmissionId) {
        let mut state = self.state.lock().unwrap();
        for subs in state.submissions.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_providers(&self) -> Result<Vec<RemoteProvider>, BackendError> {
        Ok(vec![RemoteProvider {
            id: "ollama".into(),
            name: "Ollama (local)".into(),
            requires_key: false,
        }])
    }

    async fn get_provider_config(&self) -> Result<RemoteProviderConfig, BackendError> {
        Ok(RemoteProviderConfig::default())
    }

    async fn set_provider_config(&self, _provider: &str, _model: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn create_assignment(&self, new: &NewAssignment) -> Result<AssignmentId, BackendError> {
        let mut state = self.state.lock().unwrap();
        let id = AssignmentId(state.next_id);
        state.next_id += 1;
        state.assignments.push(Assignment {
            id,
            name: new.name.clone(),
            rubric_text: new.rubric_text.clone(),
            syllabus_text: new.syllabus_text.clone(),
        });
        Ok(id)
    }

    async fn list_assignments(&self) -> Result<Vec<AssignmentSummary>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .assignments
            .iter()
            .map(|a| AssignmentSummary {
                id: a.id,
                name: a.name.clone(),
            })
            .collect())
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment, BackendError> {
        let state = self.state.lock().unwrap();
        state
            .assignments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("assignment {id}")))
    }

    async fn import_archive(
        &self,
        id: AssignmentId,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<ImportSummary, BackendError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        let sub_id = SubmissionId(500 + self.imports.load(Ordering::SeqCst) as i64);
        self.add_submission(id, Submission::new(sub_id, "Imported Student"));
        Ok(ImportSummary {
            imported: 1,
            students: vec![ImportedStudent {
                student: "Imported Student".into(),
                canvas_id: None,
                submission_id: sub_id,
                files_count: 1,
                code_files: 1,
                screenshots: 0,
            }],
        })
    }

    async fn list_submissions(&self, id: AssignmentId) -> Result<Vec<Submission>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state.submissions.get(&id).cloned().unwrap_or_default())
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Submission, BackendError> {
        let state = self.state.lock().unwrap();
        state
            .submissions
            .values()
            .flatten()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("submission {id}")))
    }

    async fn grade_submission(
        &self,
        _assignment: AssignmentId,
        _submission: SubmissionId,
    ) -> Result<GradeResult, BackendError> {
        Ok(result(GradeTier::Full, "graded by backend"))
    }

    async fn grade_all(&self, assignment: AssignmentId) -> Result<usize, BackendError> {
        let mut state = self.state.lock().unwrap();
        let subs = state.submissions.entry(assignment).or_default();
        let mut graded = 0;
        for sub in subs.iter_mut().filter(|s| s.grade.is_none()) {
            sub.grade = Some(result(GradeTier::Half, "graded by backend"));
            graded += 1;
        }
        Ok(graded)
    }

    async fn set_final_grade(
        &self,
        submission: SubmissionId,
        grade: GradeTier,
    ) -> Result<(), BackendError> {
        if *self.fail_final_grade.lock().unwrap() {
            return Err(BackendError::Status {
                status: 500,
                body: "database is locked".into(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .final_grades
            .push((submission, grade));
        Ok(())
    }

    async fn export_csv(&self, _assignment: AssignmentId) -> Result<String, BackendError> {
        Ok("Student Name,Canvas ID,Final Grade\n".into())
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// What a `ScriptedProvider` does for one call.
#[derive(Clone)]
pub enum Script {
    Grade(GradeTier),
    Fail(ProviderError),
    /// Sleep, then grade. Use with a paused clock.
    Slow(Duration, GradeTier),
}

/// Answers per submission from a script, defaulting to a Full grade.
/// Scripts queued for a submission are consumed in order.
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<SubmissionId, Vec<Script>>>,
    default_delay: Duration,
    pub calls: AtomicUsize,
    pub current: AtomicUsize,
    pub max_seen: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every call without a script sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(ScriptedProvider {
            scripts: Mutex::new(HashMap::new()),
            default_delay: delay,
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, id: SubmissionId, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push(script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self, id: SubmissionId) -> Option<Script> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(&id)?;
        (!queue.is_empty()).then(|| queue.remove(0))
    }
}

#[async_trait]
impl GradingProvider for ScriptedProvider {
    fn name(&self) -> String {
        "scripted".into()
    }

    async fn grade(&self, request: &GradingRequest) -> Result<GradeResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);

        let script = self
            .next_script(request.submission_id)
            .unwrap_or(Script::Slow(self.default_delay, GradeTier::Full));
        let outcome = match script {
            Script::Grade(tier) => Ok(result(tier, &format!("ai says {tier}"))),
            Script::Fail(e) => Err(e),
            Script::Slow(delay, tier) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(result(tier, &format!("ai says {tier}")))
            }
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn grading_settings(max_concurrent: usize, timeout_secs: u64) -> GradingSettings {
    GradingSettings {
        max_concurrent,
        provider_timeout_secs: timeout_secs,
        max_tokens: 1000,
        mode: Default::default(),
    }
}

pub fn session(
    backend: Arc<FakeBackend>,
    provider: Arc<ScriptedProvider>,
    max_concurrent: usize,
) -> GradingSession {
    session_with_timeout(backend, provider, max_concurrent, 60)
}

pub fn session_with_timeout(
    backend: Arc<FakeBackend>,
    provider: Arc<ScriptedProvider>,
    max_concurrent: usize,
    timeout_secs: u64,
) -> GradingSession {
    GradingSession::new(
        backend,
        Arc::new(FixedProvider(provider)),
        &grading_settings(max_concurrent, timeout_secs),
    )
}

