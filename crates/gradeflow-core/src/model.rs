// Domain model: assignments, submissions, and AI grade results.
//
// Wire field names follow the backend's JSON (snake_case). Fields marked
// `#[serde(skip)]` are client-local session state that the backend never
// sends or receives.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Backend identity of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub i64);

/// Backend identity of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub i64);

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Grade tiers
// ---------------------------------------------------------------------------

/// One of the three fixed grade values. No continuous scale is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum GradeTier {
    Zero,
    Half,
    Full,
}

impl GradeTier {
    pub const ALL: [GradeTier; 3] = [GradeTier::Zero, GradeTier::Half, GradeTier::Full];

    pub fn points(self) -> u8 {
        match self {
            GradeTier::Zero => 0,
            GradeTier::Half => 50,
            GradeTier::Full => 100,
        }
    }

    /// Snap an arbitrary score onto the nearest tier: below 25 is 0, below
    /// 75 is 50, anything else is 100.
    pub fn nearest(score: f64) -> GradeTier {
        if score < 25.0 {
            GradeTier::Zero
        } else if score < 75.0 {
            GradeTier::Half
        } else {
            GradeTier::Full
        }
    }
}

impl TryFrom<i64> for GradeTier {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GradeTier::Zero),
            50 => Ok(GradeTier::Half),
            100 => Ok(GradeTier::Full),
            other => Err(format!("grade must be 0, 50 or 100, got {other}")),
        }
    }
}

impl From<GradeTier> for i64 {
    fn from(tier: GradeTier) -> i64 {
        i64::from(tier.points())
    }
}

impl fmt::Display for GradeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.points())
    }
}

impl std::str::FromStr for GradeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid grade `{s}`"))?;
        GradeTier::try_from(value)
    }
}

/// How confident the grader was in its recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

// ---------------------------------------------------------------------------
// GradeResult
// ---------------------------------------------------------------------------

/// One rubric requirement and whether the submission met it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementCheck {
    pub requirement: String,
    pub met: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodeQuality {
    #[serde(default)]
    pub runs: bool,
    #[serde(default)]
    pub logic_correct: bool,
    #[serde(default)]
    pub style_acceptable: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// The outcome of one AI grading call.
///
/// Treated as a value: every grading call produces a fresh `GradeResult` that
/// replaces the previous one on the submission wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub recommended_grade: GradeTier,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub meets_requirements: Vec<RequirementCheck>,
    #[serde(default)]
    pub code_quality: CodeQuality,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub ta_notes: String,
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Entry in the backend's assignment listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub id: AssignmentId,
    pub name: String,
}

/// Full assignment details, including the grading context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub name: String,
    #[serde(default)]
    pub rubric_text: String,
    #[serde(default)]
    pub syllabus_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A single source file from a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFile {
    pub filename: String,
    pub raw_code: String,
    #[serde(default)]
    pub line_count: usize,
    /// Function names found in the file. Informational only.
    #[serde(default)]
    pub functions: Vec<String>,
}

/// A screenshot from a submission with its OCR-extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub filename: String,
    #[serde(default)]
    pub ocr_text: String,
    /// Base64 image payload, passed through untouched.
    #[serde(default)]
    pub image_data: String,
}

/// Failure categories shared by grading, batch reports and state tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ProviderUnreachable,
    ProviderTimeout,
    ProviderError,
    AlreadyGrading,
    Persistence,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProviderUnreachable => "provider_unreachable",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::AlreadyGrading => "already_grading",
            ErrorKind::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

/// Where a submission sits on the AI grading axis.
///
/// `Ungraded -> Grading -> {Graded, GradeFailed}`; either terminal state
/// re-enters `Grading` on the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradingState {
    #[default]
    Ungraded,
    Grading,
    Graded,
    GradeFailed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub student_name: String,
    /// External roster identifier (Canvas user id).
    #[serde(default)]
    pub canvas_id: Option<String>,
    #[serde(default)]
    pub code_files: Vec<CodeFile>,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(default)]
    pub grade: Option<GradeResult>,
    /// Human-set grade. Authoritative over `grade` for display and export.
    #[serde(default)]
    pub final_grade: Option<GradeTier>,
    /// Feedback text edited by the grader in this session.
    #[serde(skip)]
    pub feedback_override: Option<String>,
    #[serde(skip)]
    pub grading: GradingState,
}

impl Submission {
    /// Create an ungraded submission with no files.
    pub fn new(id: SubmissionId, student_name: impl Into<String>) -> Self {
        Submission {
            id,
            student_name: student_name.into(),
            canvas_id: None,
            code_files: Vec::new(),
            screenshots: Vec::new(),
            grade: None,
            final_grade: None,
            feedback_override: None,
            grading: GradingState::Ungraded,
        }
    }

    /// The grade used for display and export: the human grade if set, else
    /// the AI recommendation, else 50.
    ///
    /// Defaulting to 50 is intentional: an ungraded submission is assumed to
    /// deserve partial credit until someone looks at it.
    pub fn effective_grade(&self) -> GradeTier {
        self.final_grade
            .or_else(|| self.grade.as_ref().map(|g| g.recommended_grade))
            .unwrap_or(GradeTier::Half)
    }

    /// Feedback for the student: the human edit, else the AI feedback, else
    /// empty.
    pub fn feedback_text(&self) -> &str {
        self.feedback_override
            .as_deref()
            .or_else(|| self.grade.as_ref().map(|g| g.feedback.as_str()))
            .unwrap_or("")
    }

    pub fn is_reviewed(&self) -> bool {
        self.final_grade.is_some()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tier: GradeTier, feedback: &str) -> GradeResult {
        GradeResult {
            recommended_grade: tier,
            confidence: Confidence::High,
            meets_requirements: vec![],
            code_quality: CodeQuality::default(),
            feedback: feedback.into(),
            ta_notes: String::new(),
        }
    }

    #[test]
    fn effective_grade_defaults_to_partial_credit() {
        let sub = Submission::new(SubmissionId(1), "Ada");
        assert_eq!(sub.effective_grade(), GradeTier::Half);
    }

    #[test]
    fn effective_grade_uses_recommendation_when_unreviewed() {
        let mut sub = Submission::new(SubmissionId(1), "Ada");
        sub.grade = Some(result(GradeTier::Full, ""));
        assert_eq!(sub.effective_grade(), GradeTier::Full);
    }

    #[test]
    fn final_grade_wins_over_recommendation() {
        let mut sub = Submission::new(SubmissionId(1), "Ada");
        sub.grade = Some(result(GradeTier::Full, ""));
        sub.final_grade = Some(GradeTier::Zero);
        assert_eq!(sub.effective_grade(), GradeTier::Zero);
        assert!(sub.is_reviewed());
    }

    #[test]
    fn feedback_prefers_human_edit() {
        let mut sub = Submission::new(SubmissionId(1), "Ada");
        assert_eq!(sub.feedback_text(), "");
        sub.grade = Some(result(GradeTier::Full, "ai says nice"));
        assert_eq!(sub.feedback_text(), "ai says nice");
        sub.feedback_override = Some("see me after class".into());
        assert_eq!(sub.feedback_text(), "see me after class");
    }

    #[test]
    fn grade_tier_rejects_off_scale_values() {
        assert_eq!(GradeTier::try_from(50), Ok(GradeTier::Half));
        assert!(GradeTier::try_from(75).is_err());
        assert!(serde_json::from_str::<GradeTier>("42").is_err());
        assert_eq!(serde_json::to_string(&GradeTier::Full).unwrap(), "100");
    }

    #[test]
    fn grade_tier_nearest_boundaries() {
        assert_eq!(GradeTier::nearest(24.9), GradeTier::Zero);
        assert_eq!(GradeTier::nearest(25.0), GradeTier::Half);
        assert_eq!(GradeTier::nearest(74.0), GradeTier::Half);
        assert_eq!(GradeTier::nearest(75.0), GradeTier::Full);
    }

    #[test]
    fn grade_tier_from_str() {
        assert_eq!("100".parse::<GradeTier>(), Ok(GradeTier::Full));
        assert!("full".parse::<GradeTier>().is_err());
    }

    #[test]
    fn deserializes_backend_submission() {
        let json = r#"{
            "id": 7,
            "student_name": "Maria Elena Garcia",
            "canvas_id": "67890",
            "code_files": [
                {"filename": "main.py", "raw_code": "print(1)", "line_count": 1,
                 "has_main": false, "imports": [], "functions": []}
            ],
            "screenshots": [
                {"filename": "out.png", "ocr_text": "1", "image_data": "aGk="}
            ],
            "grade": {
                "recommended_grade": 50,
                "confidence": "low",
                "feedback": "raw reply",
                "ta_notes": "Auto-grading returned non-JSON response, manual review needed"
            },
            "final_grade": null
        }"#;
        let sub: Submission = serde_json::from_str(json).unwrap();
        assert_eq!(sub.id, SubmissionId(7));
        assert_eq!(sub.canvas_id.as_deref(), Some("67890"));
        assert_eq!(sub.code_files.len(), 1);
        let grade = sub.grade.as_ref().unwrap();
        assert_eq!(grade.recommended_grade, GradeTier::Half);
        assert_eq!(grade.confidence, Confidence::Low);
        assert!(grade.meets_requirements.is_empty());
        assert_eq!(sub.final_grade, None);
        assert_eq!(sub.grading, GradingState::Ungraded);
    }
}
