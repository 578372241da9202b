//! Parses LLM response text into [`Edit`]s.
//!
//! The recognized block syntax is
//!
//! ```text
//! path/to/file.rs
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//!
//! Malformed blocks are collected as [`ParseError`]s rather than aborting
//! the parse; everything outside blocks accumulates as reasoning text.

use thiserror::Error;

use super::Edit;

const MARKER_SEARCH: &str = "<<<<<<< SEARCH";
const MARKER_DIVIDER: &str = "=======";
const MARKER_REPLACE: &str = ">>>>>>> REPLACE";

/// A malformed edit block in the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number of the block's SEARCH marker.
    pub position: usize,
    /// Raw text of the malformed block.
    pub raw_text: String,
    pub message: String,
}

/// The response contained no edit blocks at all.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no edit blocks found in response")]
pub struct NoEditsFound;

/// Outcome of parsing an LLM response.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub edits: Vec<Edit>,
    pub parse_errors: Vec<ParseError>,
    /// Non-block text from the response, trimmed.
    pub reasoning_text: String,
    /// Total blocks attempted.
    pub blocks_found: usize,
    /// Blocks that produced valid edits.
    pub blocks_parsed: usize,
}

/// Extract edit blocks from a response. Returns [`NoEditsFound`] when the
/// input trims to empty or contains no SEARCH markers.
pub fn parse(response: &str) -> Result<ParseResult, NoEditsFound> {
    if response.trim().is_empty() {
        return Err(NoEditsFound);
    }

    let lines: Vec<&str> = response.split('\n').collect();
    let mut result = ParseResult::default();
    let mut reasoning: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let search_idx = match (i..lines.len()).find(|&j| is_marker(lines[j], MARKER_SEARCH)) {
            Some(idx) => idx,
            None => {
                // No more blocks; the rest is reasoning.
                reasoning.extend(&lines[i..]);
                break;
            }
        };

        // Everything before the block is reasoning, except the line
        // immediately preceding the marker, which is the file path.
        let file_path = if search_idx > 0 {
            let path_line = search_idx - 1;
            if path_line > i {
                reasoning.extend(&lines[i..path_line]);
            }
            extract_file_path(lines[path_line])
        } else {
            String::new()
        };

        i = search_idx + 1;
        result.blocks_found += 1;

        let mut search_text = String::new();
        let mut found_divider = false;
        while i < lines.len() {
            if is_marker(lines[i], MARKER_DIVIDER) {
                found_divider = true;
                i += 1;
                break;
            }
            if !search_text.is_empty() {
                search_text.push('\n');
            }
            search_text.push_str(lines[i]);
            i += 1;
        }

        if !found_divider {
            result.parse_errors.push(ParseError {
                position: search_idx + 1,
                raw_text: reconstruct_block(&lines, search_idx, i),
                message: "missing ======= divider".to_string(),
            });
            continue;
        }

        let mut replace_text = String::new();
        let mut found_replace = false;
        while i < lines.len() {
            if is_marker(lines[i], MARKER_REPLACE) {
                found_replace = true;
                i += 1;
                break;
            }
            if !replace_text.is_empty() {
                replace_text.push('\n');
            }
            replace_text.push_str(lines[i]);
            i += 1;
        }

        if !found_replace {
            result.parse_errors.push(ParseError {
                position: search_idx + 1,
                raw_text: reconstruct_block(&lines, search_idx, i),
                message: "unclosed block: missing >>>>>>> REPLACE".to_string(),
            });
            continue;
        }

        // Consume a trailing markdown fence wrapping the block.
        if i < lines.len() && is_markdown_fence(lines[i]) {
            i += 1;
        }

        if file_path.is_empty() {
            result.parse_errors.push(ParseError {
                position: search_idx + 1,
                raw_text: reconstruct_block(&lines, search_idx, i),
                message: "missing file path".to_string(),
            });
            continue;
        }

        // The block format strips the final newline before each marker;
        // restore it for non-empty sides.
        if !search_text.is_empty() {
            search_text.push('\n');
        }
        if !replace_text.is_empty() {
            replace_text.push('\n');
        }

        result.edits.push(Edit {
            file_path,
            old_text: search_text,
            new_text: replace_text,
            is_create: false,
        });
        result.blocks_parsed += 1;
    }

    result.reasoning_text = reasoning.join("\n").trim().to_string();

    if result.blocks_found == 0 {
        return Err(NoEditsFound);
    }

    Ok(result)
}

/// Render edits back into block syntax. Useful for tests and for echoing
/// applied edits into logs.
pub fn format_blocks(edits: &[Edit]) -> String {
    let mut out = String::new();
    for edit in edits {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&edit.file_path);
        out.push('\n');
        out.push_str(MARKER_SEARCH);
        out.push('\n');
        out.push_str(&edit.old_text);
        out.push_str(MARKER_DIVIDER);
        out.push('\n');
        out.push_str(&edit.new_text);
        out.push_str(MARKER_REPLACE);
        out.push('\n');
    }
    out
}

/// Clean a candidate path line: strip surrounding backticks and whitespace.
/// A fence line or free text (spaces without a path separator) is no path.
fn extract_file_path(line: &str) -> String {
    let s = line.trim();

    if is_markdown_fence(s) {
        return String::new();
    }

    let s = s.trim_matches('`').trim();

    if s.contains([' ', '\t']) && !s.contains('/') {
        return String::new();
    }

    s.to_string()
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.trim() == marker
}

fn is_markdown_fence(line: &str) -> bool {
    line.trim().starts_with("```")
}

fn reconstruct_block(lines: &[&str], start: usize, end: usize) -> String {
    lines[start..end.min(lines.len())].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block() {
        let response = "Here is the fix:\n\nsrc/apply.rs\n<<<<<<< SEARCH\nfn apply() {\n    return;\n}\n=======\nfn apply() {\n    run();\n}\n>>>>>>> REPLACE";

        let result = parse(response).unwrap();
        assert_eq!(result.edits.len(), 1);
        assert_eq!(result.blocks_found, 1);
        assert_eq!(result.blocks_parsed, 1);
        assert_eq!(result.edits[0].file_path, "src/apply.rs");
        assert!(result.edits[0].old_text.contains("return;"));
        assert!(result.edits[0].new_text.contains("run();"));
        assert!(result.reasoning_text.contains("Here is the fix"));
    }

    #[test]
    fn test_multiple_blocks_in_order() {
        let response = "Updating two files:\n\nsrc/types.rs\n<<<<<<< SEARCH\nstruct Edit;\n=======\nstruct Edit { path: String }\n>>>>>>> REPLACE\n\nconfig.yaml\n<<<<<<< SEARCH\ntimeout: 30\n=======\ntimeout: 60\n>>>>>>> REPLACE";

        let result = parse(response).unwrap();
        assert_eq!(result.edits.len(), 2);
        assert_eq!(result.edits[0].file_path, "src/types.rs");
        assert_eq!(result.edits[1].file_path, "config.yaml");
        assert!(!result.reasoning_text.is_empty());
    }

    #[test]
    fn test_markdown_fences_consumed() {
        let response = "Here is the change:\n\n```\nsrc/apply.rs\n<<<<<<< SEARCH\nreturn;\n=======\nrun();\n>>>>>>> REPLACE\n```";

        let result = parse(response).unwrap();
        assert_eq!(result.edits.len(), 1);
        assert_eq!(result.edits[0].file_path, "src/apply.rs");
        assert_eq!(result.edits[0].old_text, "return;\n");
        assert_eq!(result.edits[0].new_text, "run();\n");
    }

    #[test]
    fn test_backticked_path() {
        let response = "`src/lib.rs`\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE";
        let result = parse(response).unwrap();
        assert_eq!(result.edits[0].file_path, "src/lib.rs");
    }

    #[test]
    fn test_empty_replacement_means_delete() {
        let response = "file.rs\n<<<<<<< SEARCH\ndead code\n=======\n>>>>>>> REPLACE";
        let result = parse(response).unwrap();
        assert_eq!(result.edits[0].old_text, "dead code\n");
        assert_eq!(result.edits[0].new_text, "");
    }

    #[test]
    fn test_empty_search_means_append() {
        let response = "file.rs\n<<<<<<< SEARCH\n=======\nnew content\n>>>>>>> REPLACE";
        let result = parse(response).unwrap();
        assert_eq!(result.edits[0].old_text, "");
        assert_eq!(result.edits[0].new_text, "new content\n");
    }

    #[test]
    fn test_missing_divider() {
        let response = "file.rs\n<<<<<<< SEARCH\nsome content";
        let result = parse(response).unwrap();
        assert!(result.edits.is_empty());
        assert_eq!(result.parse_errors.len(), 1);
        assert!(result.parse_errors[0].message.contains("divider"));
        assert_eq!(result.parse_errors[0].position, 2);
    }

    #[test]
    fn test_missing_replace_marker() {
        let response = "file.rs\n<<<<<<< SEARCH\nold\n=======\nnew";
        let result = parse(response).unwrap();
        assert!(result.edits.is_empty());
        assert_eq!(result.parse_errors.len(), 1);
        assert!(result.parse_errors[0].message.contains("unclosed block"));
        assert!(result.parse_errors[0].raw_text.contains("old"));
    }

    #[test]
    fn test_missing_file_path() {
        let response = "Some explanation sentence here\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE";
        let result = parse(response).unwrap();
        assert!(result.edits.is_empty());
        assert_eq!(result.parse_errors[0].message, "missing file path");
    }

    #[test]
    fn test_fence_line_is_not_a_path() {
        let response = "```\n<<<<<<< SEARCH\nold\n=======\nnew\n>>>>>>> REPLACE";
        let result = parse(response).unwrap();
        assert!(result.edits.is_empty());
        assert_eq!(result.parse_errors[0].message, "missing file path");
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(parse("").unwrap_err(), NoEditsFound);
        assert_eq!(parse("   \n\t\n").unwrap_err(), NoEditsFound);
    }

    #[test]
    fn test_no_blocks_is_distinguished() {
        assert_eq!(
            parse("Just some prose without any edits.").unwrap_err(),
            NoEditsFound
        );
    }

    #[test]
    fn test_block_accounting_invariant() {
        let response = "a.rs\n<<<<<<< SEARCH\nx\n=======\ny\n>>>>>>> REPLACE\n\nbroken block follows\n<<<<<<< SEARCH\nz";
        let result = parse(response).unwrap();
        assert_eq!(
            result.blocks_found,
            result.blocks_parsed + result.parse_errors.len()
        );
        assert_eq!(result.blocks_found, 2);
    }

    #[test]
    fn test_round_trip() {
        let edits = vec![
            Edit {
                file_path: "src/a.rs".to_string(),
                old_text: "old line\n".to_string(),
                new_text: "new line\n".to_string(),
                is_create: false,
            },
            Edit {
                file_path: "docs/b.md".to_string(),
                old_text: "alpha\nbeta\n".to_string(),
                new_text: "gamma\n".to_string(),
                is_create: false,
            },
        ];

        let rendered = format_blocks(&edits);
        let result = parse(&rendered).unwrap();
        assert_eq!(result.edits, edits);
    }

    #[test]
    fn test_markers_tolerate_surrounding_whitespace() {
        let response = "file.rs\n  <<<<<<< SEARCH  \nold\n =======\nnew\n >>>>>>> REPLACE ";
        let result = parse(response).unwrap();
        assert_eq!(result.edits.len(), 1);
    }
}
