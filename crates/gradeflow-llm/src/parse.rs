// Turning a model's reply into a GradeResult.
//
// Models wrap JSON in code fences, drift off the 0/50/100 scale and sometimes
// answer in prose. Off-scale grades snap to the nearest tier; a reply with no
// usable JSON becomes a low-confidence 50 that asks the TA to review by hand.

use serde_json::Value;
use tracing::warn;

use gradeflow_core::{CodeQuality, Confidence, GradeResult, GradeTier};

pub const MANUAL_REVIEW_NOTE: &str =
    "Auto-grading returned non-JSON response, manual review needed";

/// Parse a model reply. Never fails; see the module notes for the fallback.
pub fn parse_grade_response(raw: &str) -> GradeResult {
    let clean = strip_code_fence(raw);

    let value = serde_json::from_str::<Value>(&clean)
        .ok()
        .filter(Value::is_object)
        .or_else(|| extract_json_object(&clean));

    let Some(mut value) = value else {
        warn!("Grading reply was not JSON, falling back to manual review");
        return fallback(raw);
    };

    normalize(&mut value);
    match serde_json::from_value::<GradeResult>(value) {
        Ok(result) => result,
        Err(e) => {
            warn!("Grading reply did not match the expected shape: {e}");
            fallback(raw)
        }
    }
}

/// Remove a surrounding Markdown fence, including a `json` language tag.
pub(crate) fn strip_code_fence(raw: &str) -> String {
    let clean = raw.trim();
    if !clean.starts_with("```") {
        return clean.to_string();
    }
    let mut lines: Vec<&str> = clean.lines().collect();
    lines.remove(0);
    if lines.last().map(|l| l.trim()) == Some("```") {
        lines.pop();
    }
    let body = lines.join("\n");
    let body = body.trim();
    body.strip_prefix("json").unwrap_or(body).trim().to_string()
}

/// Last resort: the text between the first `{` and the last `}`.
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Coerce loosely-typed fields so they deserialize into `GradeResult`.
fn normalize(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    let score = match obj.get("recommended_grade") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let tier = score.map(GradeTier::nearest).unwrap_or(GradeTier::Half);
    obj.insert("recommended_grade".into(), Value::from(tier.points()));

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());
    match confidence.as_deref() {
        Some(level @ ("high" | "medium" | "low")) => {
            obj.insert("confidence".into(), Value::from(level));
        }
        _ => {
            obj.remove("confidence");
        }
    }

    for key in ["meets_requirements", "code_quality", "feedback", "ta_notes"] {
        if obj.get(key).is_some_and(Value::is_null) {
            obj.remove(key);
        }
    }
}

fn fallback(raw: &str) -> GradeResult {
    GradeResult {
        recommended_grade: GradeTier::Half,
        confidence: Confidence::Low,
        meets_requirements: Vec::new(),
        code_quality: CodeQuality::default(),
        feedback: raw.trim().to_string(),
        ta_notes: MANUAL_REVIEW_NOTE.to_string(),
    }
}
