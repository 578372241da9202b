//! Packs ranked symbols into a budget-bounded text block.

use std::fs;
use std::path::PathBuf;

use super::{RankedSymbol, RepoMap};
use crate::util::truncate;

const DEFAULT_TOKEN_BUDGET: f64 = 4096.0;
const DEFAULT_TOKEN_RATIO: f64 = 0.25;
const MAX_LINE_LENGTH: usize = 100;

#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Maximum estimated tokens for the map.
    pub token_budget: f64,
    /// Tokens per character.
    pub token_ratio: f64,
    /// Workspace root for reading signature lines.
    pub work_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            token_ratio: DEFAULT_TOKEN_RATIO,
            work_dir: None,
        }
    }
}

/// Render the repository map. Files appear in rank order, each as a
/// contiguous section; packing stops before the section that would blow the
/// budget. The header reports the counts actually packed.
pub fn render(
    ranked: &[RankedSymbol],
    total_files: usize,
    total_symbols: usize,
    cfg: &RenderConfig,
) -> RepoMap {
    let budget = if cfg.token_budget > 0.0 {
        cfg.token_budget
    } else {
        DEFAULT_TOKEN_BUDGET
    };
    let ratio = if cfg.token_ratio > 0.0 {
        cfg.token_ratio
    } else {
        DEFAULT_TOKEN_RATIO
    };

    // Group symbols by file, preserving rank order across files.
    let mut file_order: Vec<&str> = Vec::new();
    let mut file_symbols: std::collections::HashMap<&str, Vec<&RankedSymbol>> =
        std::collections::HashMap::new();
    for rs in ranked {
        let entry = file_symbols.entry(rs.file_path.as_str()).or_default();
        if entry.is_empty() {
            file_order.push(rs.file_path.as_str());
        }
        entry.push(rs);
    }

    // Reserve header space up front; the real header replaces it below.
    let header_reserve = 81usize;
    let mut body = String::new();
    let mut tokens_used = header_reserve as f64 * ratio;
    let mut files_shown = 0;
    let mut symbols_shown = 0;

    for file in file_order {
        let mut section = String::new();
        section.push_str(file);
        section.push('\n');

        let symbols = &file_symbols[file];
        for rs in symbols {
            let sig = if rs.signature.is_empty() {
                cfg.work_dir
                    .as_deref()
                    .map(|root| read_signature(root, &rs.file_path, rs.line))
                    .unwrap_or_default()
            } else {
                rs.signature.clone()
            };

            let line = if sig.is_empty() {
                format!("  {}", rs.name)
            } else {
                format!("  {}", sig)
            };
            section.push_str(&truncate(&line, MAX_LINE_LENGTH));
            section.push('\n');
        }

        let section_tokens = section.len() as f64 * ratio;
        if tokens_used + section_tokens > budget {
            break;
        }

        body.push_str(&section);
        tokens_used += section_tokens;
        files_shown += 1;
        symbols_shown += symbols.len();
    }

    let header = format!(
        "Repository map ({}/{} files, {}/{} symbols)",
        files_shown, total_files, symbols_shown, total_symbols
    );
    let text = format!("{}\n{}", header, body);
    let tokens_used = text.len() as f64 * ratio;

    RepoMap {
        text,
        file_count: files_shown,
        total_files,
        symbol_count: symbols_shown,
        total_symbols,
        tokens_used,
    }
}

/// The trimmed source line at a symbol's definition, capped for display.
fn read_signature(root: &std::path::Path, rel_path: &str, line: usize) -> String {
    let Ok(content) = fs::read_to_string(root.join(rel_path)) else {
        return String::new();
    };
    let Some(text) = content.split('\n').nth(line.saturating_sub(1)) else {
        return String::new();
    };
    truncate(text.trim(), MAX_LINE_LENGTH)
}
