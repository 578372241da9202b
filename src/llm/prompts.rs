//! System prompt text and conversation assembly.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use super::ChatMessage;
use crate::index::Language;

/// Files larger than this never go into the prompt.
const MAX_CONTEXT_FILE_SIZE: u64 = 32 * 1024;

/// Fixed system prompt describing the edit format the parser accepts.
pub const SYSTEM_PROMPT: &str = "\
You are an expert software engineer working inside a user's repository.
You receive a repository map, relevant file contents, and a task.

Respond with edits in search/replace blocks, one block per change:

path/to/file.ext
<<<<<<< SEARCH
exact lines to find
=======
replacement lines
>>>>>>> REPLACE

Rules:
- The SEARCH text must match the current file contents exactly.
- Keep each block small; prefer several focused blocks over one large one.
- The line immediately before <<<<<<< SEARCH must be the file path.
- To append to a file, leave the SEARCH section empty.
- Only edit files that exist in the repository, and explain your changes
  briefly outside the blocks.
";

/// A file included in the prompt context.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub path: String,
    pub content: String,
}

/// Assemble the initial conversation: repo map, file contents, then the
/// task prompt as the final user message.
pub fn build_initial_messages(
    repo_map: &str,
    files: &[FileContext],
    user_prompt: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    if !repo_map.is_empty() {
        messages.push(ChatMessage::user(format!(
            "## Repository Map\n\n{}",
            repo_map
        )));
    }

    if !files.is_empty() {
        let mut buf = String::from("## File Contents\n\n");
        for f in files {
            buf.push_str(&format_file_content(f));
            buf.push('\n');
        }
        messages.push(ChatMessage::user(buf));
    }

    messages.push(ChatMessage::user(user_prompt.to_string()));
    messages
}

/// Extend a conversation with the assistant's previous response and the
/// formatted error feedback as the next user message.
pub fn build_retry_messages(
    prev_messages: &[ChatMessage],
    assistant_response: &str,
    error_output: &str,
) -> Vec<ChatMessage> {
    let mut messages = prev_messages.to_vec();
    messages.push(ChatMessage::assistant(assistant_response.to_string()));
    messages.push(ChatMessage::user(format!(
        "## Errors\n\nThe previous edits produced the following errors. Please fix them:\n\n{}",
        error_output
    )));
    messages
}

/// Collect source files under the size cap for prompt context, skipping the
/// extractor's ignore set. Markdown is included alongside recognized
/// source extensions.
pub fn collect_context_files(work_dir: &Path) -> Vec<FileContext> {
    const IGNORE_DIRS: &[&str] = &[
        ".git",
        "target",
        "node_modules",
        "vendor",
        "dist",
        "build",
        "__pycache__",
    ];

    let mut files = Vec::new();

    let walker = WalkDir::new(work_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .map(|name| IGNORE_DIRS.contains(&name))
                    .unwrap_or(false))
        });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_markdown = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        if Language::from_path(entry.path()) == Language::Unknown && !is_markdown {
            continue;
        }

        if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_CONTEXT_FILE_SIZE {
            continue;
        }

        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };

        let path = entry
            .path()
            .strip_prefix(work_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();

        files.push(FileContext { path, content });
    }

    files
}

/// A file rendered with a path header and numbered lines.
fn format_file_content(f: &FileContext) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "### {}\n", f.path);
    for (i, line) in f.content.split('\n').enumerate() {
        let _ = writeln!(buf, "{:4} │ {}", i + 1, line);
    }
    buf
}
