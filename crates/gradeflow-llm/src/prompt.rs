// Prompt construction for grading requests.
//
// The system prompt carries the rubric, optional course context, the three-tier
// scale and the exact JSON shape expected back. The user prompt carries the
// student's code and screenshot OCR text.

use std::fmt::Write;

use crate::provider::GradingRequest;

/// Build the system prompt for one assignment.
pub fn system_prompt(rubric: &str, syllabus: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("You are a TA grading student code submissions for a programming course.\n\n");
    out.push_str("RUBRIC/REQUIREMENTS:\n");
    out.push_str(rubric.trim());
    out.push_str("\n\n");

    if let Some(syllabus) = syllabus {
        out.push_str("COURSE CONTEXT:\n");
        out.push_str(syllabus.trim());
        out.push_str("\n\n");
    }

    out.push_str(
        "GRADING SCALE:\n\
         - 100: Meets all requirements, code runs correctly, demonstrates understanding\n\
         - 50: Partial completion, significant issues but shows effort/partial understanding\n\
         - 0: Not submitted, completely non-functional, or shows no understanding\n\
         \n\
         YOUR TASK:\n\
         1. Analyze the submitted code against requirements\n\
         2. Check if screenshots demonstrate working output (if provided)\n\
         3. Recommend a grade tier (0, 50, or 100)\n\
         4. Provide specific feedback for the student\n\
         \n\
         RESPOND IN THIS EXACT JSON FORMAT:\n\
         {\n\
         \x20   \"recommended_grade\": <0 or 50 or 100>,\n\
         \x20   \"confidence\": <\"high\" or \"medium\" or \"low\">,\n\
         \x20   \"meets_requirements\": [\n\
         \x20       {\"requirement\": \"description\", \"met\": true/false, \"notes\": \"specifics\"}\n\
         \x20   ],\n\
         \x20   \"code_quality\": {\n\
         \x20       \"runs\": true/false,\n\
         \x20       \"logic_correct\": true/false,\n\
         \x20       \"style_acceptable\": true/false,\n\
         \x20       \"issues\": [\"issue1\", \"issue2\"]\n\
         \x20   },\n\
         \x20   \"feedback\": \"Constructive feedback paragraph for student\",\n\
         \x20   \"ta_notes\": \"Private notes for TA about edge cases or concerns\"\n\
         }",
    );
    out
}

/// Build the user prompt describing one submission.
pub fn submission_prompt(request: &GradingRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "STUDENT: {}", request.student_name);
    if let Some(canvas_id) = &request.canvas_id {
        let _ = writeln!(out, "CANVAS ID: {canvas_id}");
    }
    out.push('\n');

    for file in &request.code_files {
        let _ = writeln!(out, "--- FILE: {} ---", file.filename);
        let _ = writeln!(
            out,
            "```{}\n{}\n```\n",
            fence_language(&file.filename),
            file.raw_code
        );
    }

    if request.code_files.is_empty() {
        out.push_str("NO CODE FILES SUBMITTED\n\n");
    }

    if !request.screenshots.is_empty() {
        out.push_str("SCREENSHOT OUTPUT:\n");
        for (i, (filename, ocr_text)) in request.screenshots.iter().enumerate() {
            let _ = writeln!(out, "Screenshot {} ({}):", i + 1, filename);
            let _ = writeln!(out, "  Detected text/output: {ocr_text}\n");
        }
    }

    out
}

/// Markdown fence tag for a filename, by extension.
fn fence_language(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "py" => "python",
        Some(ext) if ext == "java" => "java",
        Some(ext) if ext == "js" => "javascript",
        Some(ext) if ext == "rs" => "rust",
        Some(ext) if ext == "c" || ext == "h" => "c",
        Some(ext) if ext == "cpp" || ext == "cc" || ext == "hpp" => "cpp",
        _ => "",
    }
}
