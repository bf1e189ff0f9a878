// Client for the storage backend's REST API.
//
// The backend owns assignments, submissions and persisted grades. `Backend`
// is the seam the session and coordinator talk through; `HttpBackend` is the
// reqwest implementation and `BackendGrader` exposes the backend's own grade
// endpoint as a `GradingProvider`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use gradeflow_core::{
    Assignment, AssignmentId, AssignmentSummary, CodeFile, GradeResult, GradeTier, Screenshot,
    Submission, SubmissionId,
};
use gradeflow_llm::{parse_grade_response, GradingProvider, GradingRequest, ProviderError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend request timed out")]
    Timeout,

    #[error("{0} not found")]
    NotFound(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Unreachable(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A provider as advertised by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteProvider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub requires_key: bool,
}

/// The backend's own provider selection (used by server-side grading).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteProviderConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAssignment {
    pub name: String,
    pub rubric_text: String,
    pub syllabus_text: Option<String>,
}

/// One student created by an archive import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedStudent {
    pub student: String,
    #[serde(default)]
    pub canvas_id: Option<String>,
    pub submission_id: SubmissionId,
    #[serde(default)]
    pub files_count: usize,
    #[serde(default)]
    pub code_files: usize,
    #[serde(default)]
    pub screenshots: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    #[serde(default)]
    pub students: Vec<ImportedStudent>,
}

#[derive(Deserialize)]
struct ProvidersResponse {
    providers: Vec<RemoteProvider>,
}

#[derive(Deserialize)]
struct CreatedResponse {
    assignment_id: AssignmentId,
}

#[derive(Deserialize)]
struct GradedResponse {
    graded: usize,
}

/// Submission as stored by the backend. Grades are loosely typed there, so
/// they are normalized on the way in.
#[derive(Deserialize)]
struct RawSubmission {
    id: SubmissionId,
    student_name: String,
    #[serde(default)]
    canvas_id: Option<Value>,
    #[serde(default)]
    code_files: Vec<CodeFile>,
    #[serde(default)]
    screenshots: Vec<Screenshot>,
    #[serde(default)]
    grade: Option<Value>,
    #[serde(default)]
    final_grade: Option<f64>,
}

impl From<RawSubmission> for Submission {
    fn from(raw: RawSubmission) -> Self {
        let mut sub = Submission::new(raw.id, raw.student_name);
        sub.canvas_id = match raw.canvas_id {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        sub.code_files = raw.code_files;
        sub.screenshots = raw.screenshots;
        sub.grade = raw.grade.filter(|v| !v.is_null()).map(grade_from_value);
        sub.final_grade = raw.final_grade.map(GradeTier::nearest);
        sub
    }
}

fn grade_from_value(value: Value) -> GradeResult {
    match value {
        Value::String(s) => parse_grade_response(&s),
        other => parse_grade_response(&other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_providers(&self) -> Result<Vec<RemoteProvider>, BackendError>;

    async fn get_provider_config(&self) -> Result<RemoteProviderConfig, BackendError>;

    async fn set_provider_config(&self, provider: &str, model: &str) -> Result<(), BackendError>;

    async fn create_assignment(&self, new: &NewAssignment) -> Result<AssignmentId, BackendError>;

    async fn list_assignments(&self) -> Result<Vec<AssignmentSummary>, BackendError>;

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment, BackendError>;

    /// Upload a zip of student files. The backend splits it per student.
    async fn import_archive(
        &self,
        id: AssignmentId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImportSummary, BackendError>;

    async fn list_submissions(&self, id: AssignmentId) -> Result<Vec<Submission>, BackendError>;

    async fn get_submission(&self, id: SubmissionId) -> Result<Submission, BackendError>;

    /// Grade one submission server side. The backend also stores the result.
    async fn grade_submission(
        &self,
        assignment: AssignmentId,
        submission: SubmissionId,
    ) -> Result<GradeResult, BackendError>;

    /// Grade every ungraded submission server side. Only a count comes back.
    async fn grade_all(&self, assignment: AssignmentId) -> Result<usize, BackendError>;

    async fn set_final_grade(
        &self,
        submission: SubmissionId,
        grade: GradeTier,
    ) -> Result<(), BackendError>;

    /// The backend's own CSV export.
    async fn export_csv(&self, assignment: AssignmentId) -> Result<String, BackendError>;
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        HttpBackend {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Map a non-2xx response to an error; 404 names `what`.
    async fn check(
        response: reqwest::Response,
        what: impl FnOnce() -> String,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(what()));
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Backend returned {status}: {body}");
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: impl FnOnce() -> String,
    ) -> Result<T, BackendError> {
        let url = self.url(path);
        debug!("GET {url}");
        let response = self.http.get(&url).send().await?;
        let response = Self::check(response, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_providers(&self) -> Result<Vec<RemoteProvider>, BackendError> {
        let resp: ProvidersResponse = self.get_json("providers", || "providers".into()).await?;
        Ok(resp.providers)
    }

    async fn get_provider_config(&self) -> Result<RemoteProviderConfig, BackendError> {
        self.get_json("config/provider", || "provider config".into())
            .await
    }

    async fn set_provider_config(&self, provider: &str, model: &str) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.url("config/provider"))
            .form(&[("provider", provider), ("model", model)])
            .send()
            .await?;
        Self::check(response, || "provider config".into()).await?;
        Ok(())
    }

    async fn create_assignment(&self, new: &NewAssignment) -> Result<AssignmentId, BackendError> {
        let mut form = reqwest::multipart::Form::new()
            .text("name", new.name.clone())
            .part(
                "rubric_file",
                reqwest::multipart::Part::text(new.rubric_text.clone()).file_name("rubric.txt"),
            );
        if let Some(syllabus) = &new.syllabus_text {
            form = form.part(
                "syllabus_file",
                reqwest::multipart::Part::text(syllabus.clone()).file_name("syllabus.txt"),
            );
        }

        let response = self
            .http
            .post(self.url("assignments"))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check(response, || "assignments".into()).await?;
        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(created.assignment_id)
    }

    async fn list_assignments(&self) -> Result<Vec<AssignmentSummary>, BackendError> {
        self.get_json("assignments", || "assignments".into()).await
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment, BackendError> {
        self.get_json(&format!("assignments/{id}"), || format!("assignment {id}"))
            .await
    }

    async fn import_archive(
        &self,
        id: AssignmentId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImportSummary, BackendError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/zip")
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("archive", part);

        let response = self
            .http
            .post(self.url(&format!("assignments/{id}/import-folder")))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check(response, || format!("assignment {id}")).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn list_submissions(&self, id: AssignmentId) -> Result<Vec<Submission>, BackendError> {
        let raw: Vec<RawSubmission> = self
            .get_json(&format!("assignments/{id}/submissions"), || {
                format!("assignment {id}")
            })
            .await?;
        Ok(raw.into_iter().map(Submission::from).collect())
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Submission, BackendError> {
        let raw: RawSubmission = self
            .get_json(&format!("submissions/{id}"), || format!("submission {id}"))
            .await?;
        Ok(raw.into())
    }

    async fn grade_submission(
        &self,
        assignment: AssignmentId,
        submission: SubmissionId,
    ) -> Result<GradeResult, BackendError> {
        let response = self
            .http
            .post(self.url(&format!("assignments/{assignment}/grade/{submission}")))
            .send()
            .await?;
        let response = Self::check(response, || format!("submission {submission}")).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(grade_from_value(value))
    }

    async fn grade_all(&self, assignment: AssignmentId) -> Result<usize, BackendError> {
        let response = self
            .http
            .post(self.url(&format!("assignments/{assignment}/grade-all")))
            .send()
            .await?;
        let response = Self::check(response, || format!("assignment {assignment}")).await?;
        let graded: GradedResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(graded.graded)
    }

    async fn set_final_grade(
        &self,
        submission: SubmissionId,
        grade: GradeTier,
    ) -> Result<(), BackendError> {
        let response = self
            .http
            .put(self.url(&format!("submissions/{submission}/grade")))
            .json(&serde_json::json!({ "grade": grade }))
            .send()
            .await?;
        Self::check(response, || format!("submission {submission}")).await?;
        Ok(())
    }

    async fn export_csv(&self, assignment: AssignmentId) -> Result<String, BackendError> {
        let response = self
            .http
            .get(self.url(&format!("assignments/{assignment}/export")))
            .send()
            .await?;
        let response = Self::check(response, || format!("assignment {assignment}")).await?;
        Ok(response.text().await?)
    }
}

// ---------------------------------------------------------------------------
// BackendGrader
// ---------------------------------------------------------------------------

/// Grades through the backend's per-submission endpoint.
pub struct BackendGrader {
    backend: Arc<dyn Backend>,
}

impl BackendGrader {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        BackendGrader { backend }
    }
}

#[async_trait]
impl GradingProvider for BackendGrader {
    fn name(&self) -> String {
        "backend".to_string()
    }

    async fn grade(&self, request: &GradingRequest) -> Result<GradeResult, ProviderError> {
        self.backend
            .grade_submission(request.assignment_id, request.submission_id)
            .await
            .map_err(|e| match e {
                BackendError::Unreachable(msg) => ProviderError::Unreachable(msg),
                BackendError::Timeout => ProviderError::Timeout,
                BackendError::NotFound(what) => ProviderError::Status {
                    status: 404,
                    body: format!("{what} not found"),
                },
                BackendError::Status { status, body } => ProviderError::Status { status, body },
                BackendError::Decode(msg) => ProviderError::Malformed(msg),
            })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gradeflow_core::Confidence;
    use httpmock::prelude::*;
    use serde_json::json;

    fn backend(server: &MockServer) -> HttpBackend {
        HttpBackend::new(reqwest::Client::new(), server.url("/api"))
    }

    #[test]
    fn raw_submission_is_normalized() {
        let raw: RawSubmission = serde_json::from_value(json!({
            "id": 7,
            "student_name": "Grace Hopper",
            "canvas_id": 12345,
            "code_files": [
                {"filename": "main.py", "raw_code": "print(1)", "line_count": 1, "functions": []}
            ],
            "screenshots": [],
            "grade": {"recommended_grade": 90, "confidence": "HIGH", "feedback": "good"},
            "final_grade": null
        }))
        .unwrap();
        let sub = Submission::from(raw);
        assert_eq!(sub.id, SubmissionId(7));
        assert_eq!(sub.canvas_id.as_deref(), Some("12345"));
        let grade = sub.grade.unwrap();
        assert_eq!(grade.recommended_grade, GradeTier::Full);
        assert_eq!(grade.confidence, Confidence::High);
        assert_eq!(sub.final_grade, None);
    }

    #[test]
    fn stored_grade_as_json_string_is_parsed() {
        let raw: RawSubmission = serde_json::from_value(json!({
            "id": 1,
            "student_name": "A",
            "grade": "{\"recommended_grade\": 0}",
            "final_grade": 50
        }))
        .unwrap();
        let sub = Submission::from(raw);
        assert_eq!(sub.grade.unwrap().recommended_grade, GradeTier::Zero);
        assert_eq!(sub.final_grade, Some(GradeTier::Half));
    }

    #[tokio::test]
    async fn get_assignment_and_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/assignments/1");
                then.status(200).json_body(json!({
                    "id": 1, "name": "Lab 1", "rubric_text": "Print hello", "syllabus_text": null
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/assignments/2");
                then.status(404).json_body(json!({"detail": "Assignment not found"}));
            })
            .await;

        let backend = backend(&server);
        let a = backend.get_assignment(AssignmentId(1)).await.unwrap();
        assert_eq!(a.name, "Lab 1");
        assert_eq!(a.syllabus_text, None);

        let err = backend.get_assignment(AssignmentId(2)).await.unwrap_err();
        assert_eq!(err, BackendError::NotFound("assignment 2".into()));
    }

    #[tokio::test]
    async fn list_submissions_preserves_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/assignments/3/submissions");
                then.status(200).json_body(json!([
                    {"id": 10, "student_name": "Zed"},
                    {"id": 4, "student_name": "Amy", "canvas_id": "77"}
                ]));
            })
            .await;

        let subs = backend(&server)
            .list_submissions(AssignmentId(3))
            .await
            .unwrap();
        let names: Vec<&str> = subs.iter().map(|s| s.student_name.as_str()).collect();
        assert_eq!(names, vec!["Zed", "Amy"]);
        assert_eq!(subs[1].canvas_id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn set_final_grade_sends_bare_integer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/api/submissions/5/grade")
                    .json_body(json!({"grade": 100}));
                then.status(200).json_body(json!({"status": "ok"}));
            })
            .await;

        backend(&server)
            .set_final_grade(SubmissionId(5), GradeTier::Full)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/assignments/1/grade-all");
                then.status(500).body("Internal Server Error");
            })
            .await;

        let err = backend(&server).grade_all(AssignmentId(1)).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Status {
                status: 500,
                body: "Internal Server Error".into()
            }
        );
    }

    #[tokio::test]
    async fn create_assignment_posts_multipart() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/assignments")
                    .body_contains("name=\"rubric_file\"")
                    .body_contains("Print hello");
                then.status(200).json_body(json!({"assignment_id": 42}));
            })
            .await;

        let id = backend(&server)
            .create_assignment(&NewAssignment {
                name: "Lab 1".into(),
                rubric_text: "Print hello".into(),
                syllabus_text: None,
            })
            .await
            .unwrap();
        assert_eq!(id, AssignmentId(42));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn backend_grader_maps_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/assignments/1/grade/2");
                then.status(502).body("bad gateway");
            })
            .await;

        let grader = BackendGrader::new(Arc::new(backend(&server)));
        let request = GradingRequest {
            assignment_id: AssignmentId(1),
            submission_id: SubmissionId(2),
            rubric: String::new(),
            syllabus: None,
            student_name: "A".into(),
            canvas_id: None,
            code_files: vec![],
            screenshots: vec![],
        };
        let err = grader.grade(&request).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Status {
                status: 502,
                body: "bad gateway".into()
            }
        );
    }
}
