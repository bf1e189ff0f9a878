// Grade-sheet projection and CSV output.

use std::io::Write;

use serde::Serialize;

use crate::model::{AssignmentId, GradeTier};
use crate::store::{StoreError, SubmissionStore};

/// One row of the exported grade sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeSheetRow {
    pub student_name: String,
    /// External roster id, empty when the submission has none.
    pub external_id: String,
    pub effective_grade: GradeTier,
    pub feedback_text: String,
}

/// Flat CSV record. Column names are what the grade book import expects.
#[derive(Serialize)]
struct CsvRecord<'a> {
    #[serde(rename = "Student Name")]
    student_name: &'a str,
    #[serde(rename = "Canvas ID")]
    canvas_id: &'a str,
    #[serde(rename = "Grade")]
    grade: u8,
    #[serde(rename = "Feedback")]
    feedback: &'a str,
}

/// Derives the exportable grade sheet from a [`SubmissionStore`].
pub struct ExportProjector;

impl ExportProjector {
    /// Project every submission of `assignment` into a row, in import order.
    ///
    /// Rows are never re-sorted, so two exports with no mutation in between
    /// are identical.
    pub fn project(
        store: &SubmissionStore,
        assignment: AssignmentId,
    ) -> Result<Vec<GradeSheetRow>, StoreError> {
        let (current, records) = store.snapshot();
        if current != Some(assignment) {
            return Err(StoreError::AssignmentNotLoaded(assignment));
        }
        Ok(records
            .iter()
            .map(|sub| GradeSheetRow {
                student_name: sub.student_name.clone(),
                external_id: sub.canvas_id.clone().unwrap_or_default(),
                effective_grade: sub.effective_grade(),
                feedback_text: sub.feedback_text().to_string(),
            })
            .collect())
    }
}

/// Write `rows` as CSV with a header line.
pub fn write_csv<W: Write>(rows: &[GradeSheetRow], writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        wtr.write_record(["Student Name", "Canvas ID", "Grade", "Feedback"])?;
    }
    for row in rows {
        wtr.serialize(CsvRecord {
            student_name: &row.student_name,
            canvas_id: &row.external_id,
            grade: row.effective_grade.points(),
            feedback: &row.feedback_text,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeQuality, Confidence, GradeResult, Submission, SubmissionId};

    fn loaded_store() -> SubmissionStore {
        let store = SubmissionStore::new();
        let mut zed = Submission::new(SubmissionId(1), "Zed Young");
        zed.canvas_id = Some("11111".into());
        let amy = Submission::new(SubmissionId(2), "Amy Adams");
        store.load(AssignmentId(4), vec![zed, amy]);
        store
            .apply_grade_result(
                SubmissionId(1),
                GradeResult {
                    recommended_grade: GradeTier::Full,
                    confidence: Confidence::High,
                    meets_requirements: vec![],
                    code_quality: CodeQuality::default(),
                    feedback: "Nice work, \"clean\" code".into(),
                    ta_notes: String::new(),
                },
            )
            .unwrap();
        store
    }

    #[test]
    fn rows_follow_import_order_not_name() {
        let store = loaded_store();
        let rows = ExportProjector::project(&store, AssignmentId(4)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].student_name, "Zed Young");
        assert_eq!(rows[0].external_id, "11111");
        assert_eq!(rows[0].effective_grade, GradeTier::Full);
        assert_eq!(rows[1].student_name, "Amy Adams");
        assert_eq!(rows[1].external_id, "");
        assert_eq!(rows[1].effective_grade, GradeTier::Half);
        assert_eq!(rows[1].feedback_text, "");
    }

    #[test]
    fn projection_is_repeatable() {
        let store = loaded_store();
        let first = ExportProjector::project(&store, AssignmentId(4)).unwrap();
        let second = ExportProjector::project(&store, AssignmentId(4)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn projection_reflects_human_overrides() {
        let store = loaded_store();
        store.set_final_grade(SubmissionId(1), GradeTier::Half).unwrap();
        store
            .set_feedback(SubmissionId(1), Some("Missing docstrings".into()))
            .unwrap();
        let rows = ExportProjector::project(&store, AssignmentId(4)).unwrap();
        assert_eq!(rows[0].effective_grade, GradeTier::Half);
        assert_eq!(rows[0].feedback_text, "Missing docstrings");
    }

    #[test]
    fn projecting_other_assignment_fails() {
        let store = loaded_store();
        assert_eq!(
            ExportProjector::project(&store, AssignmentId(5)),
            Err(StoreError::AssignmentNotLoaded(AssignmentId(5)))
        );
    }

    #[test]
    fn projection_never_mixes_assignments_during_reload() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let roster = |prefix: &str| -> Vec<Submission> {
            (0..3)
                .map(|i| Submission::new(SubmissionId(i), format!("{prefix} {i}")))
                .collect()
        };
        let store = Arc::new(SubmissionStore::new());
        store.load(AssignmentId(4), roster("Lab4"));
        let done = Arc::new(AtomicBool::new(false));

        let reloader = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            let (lab4, lab5) = (roster("Lab4"), roster("Lab5"));
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    store.load(AssignmentId(5), lab5.clone());
                    store.load(AssignmentId(4), lab4.clone());
                }
            })
        };

        for _ in 0..5_000 {
            if let Ok(rows) = ExportProjector::project(&store, AssignmentId(4)) {
                assert!(
                    rows.iter().all(|r| r.student_name.starts_with("Lab4")),
                    "{rows:?}"
                );
            }
        }
        done.store(true, Ordering::Relaxed);
        reloader.join().unwrap();
    }

    #[test]
    fn csv_output_quotes_feedback() {
        let store = loaded_store();
        let rows = ExportProjector::project(&store, AssignmentId(4)).unwrap();
        let mut buf = Vec::new();
        write_csv(&rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Student Name,Canvas ID,Grade,Feedback");
        assert_eq!(lines[1], "Zed Young,11111,100,\"Nice work, \"\"clean\"\" code\"");
        assert_eq!(lines[2], "Amy Adams,,50,");
    }

    #[test]
    fn csv_output_for_empty_sheet_has_header() {
        let mut buf = Vec::new();
        write_csv(&[], &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "Student Name,Canvas ID,Grade,Feedback\n");
    }
}
