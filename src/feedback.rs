//! Formats verification failures into a follow-up prompt for the model.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::util::{resolve_repo_path, truncate};
use crate::verify::VerifyResult;

const DEFAULT_CONTEXT_LINES: usize = 5;
const DEFAULT_MAX_TEST_OUTPUT: usize = 4096;

#[derive(Debug, Clone)]
pub struct FormatConfig {
    /// Workspace root; code context is only ever read from inside it.
    pub work_dir: PathBuf,
    /// Lines of context above and below each error line.
    pub context_lines: usize,
    /// Maximum characters of test output to include.
    pub max_test_output: usize,
}

impl FormatConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            context_lines: DEFAULT_CONTEXT_LINES,
            max_test_output: DEFAULT_MAX_TEST_OUTPUT,
        }
    }
}

/// Produce the retry prompt: instruction preamble, modified files so far,
/// per-error code context, raw outputs when nothing parsed, and truncated
/// test output.
pub fn format_errors(result: &VerifyResult, modified_files: &[String], cfg: &FormatConfig) -> String {
    let mut buf = String::new();

    buf.push_str(
        "The previous edits produced errors. Please fix them using the same search/replace edit format.\n\n",
    );

    if !modified_files.is_empty() {
        buf.push_str("## Modified Files\n\n");
        for f in modified_files {
            let _ = writeln!(buf, "- {}", f);
        }
        buf.push('\n');
    }

    if !result.errors.is_empty() {
        buf.push_str("## Compiler Errors\n\n");
        for e in &result.errors {
            let _ = writeln!(buf, "### {}\n", e);
            let context = code_context(&cfg.work_dir, &e.file_path, e.line, cfg.context_lines);
            if !context.is_empty() {
                buf.push_str("```\n");
                buf.push_str(&context);
                buf.push_str("```\n\n");
            }
        }
    }

    // Raw build output when the failure produced nothing parseable.
    if !result.build_ok && result.errors.is_empty() && !result.build_out.is_empty() {
        buf.push_str("## Build Output\n\n```\n");
        buf.push_str(&result.build_out);
        buf.push_str("```\n\n");
    }

    if !result.check_ok && !result.check_out.is_empty() {
        buf.push_str("## Check Output\n\n```\n");
        buf.push_str(&result.check_out);
        buf.push_str("```\n\n");
    }

    if !result.test_ok && !result.test_out.is_empty() {
        let mut test_out = result.test_out.clone();
        if test_out.chars().count() > cfg.max_test_output {
            test_out = format!(
                "{}\n... (truncated)",
                truncate(&test_out, cfg.max_test_output)
            );
        }
        buf.push_str("## Test Output\n\n```\n");
        buf.push_str(&test_out);
        buf.push_str("```\n\n");
    }

    buf
}

/// Numbered source lines around an error, the error line marked with `> `.
/// Paths that resolve outside the workspace yield no context.
fn code_context(work_dir: &Path, file_path: &str, error_line: usize, context_lines: usize) -> String {
    let Ok(resolved) = resolve_repo_path(work_dir, Path::new(file_path)) else {
        return String::new();
    };
    let Ok(content) = fs::read_to_string(&resolved.absolute) else {
        return String::new();
    };

    let lines: Vec<&str> = content.split('\n').collect();
    let start = error_line.saturating_sub(context_lines + 1);
    let end = (error_line + context_lines).min(lines.len());

    let mut buf = String::new();
    for (i, line) in lines.iter().enumerate().take(end).skip(start) {
        let line_num = i + 1;
        let marker = if line_num == error_line { "> " } else { "  " };
        let _ = writeln!(buf, "{}{:4} │ {}", marker, line_num, line);
    }

    buf
}
