//! Three-stage search text matching: exact, whitespace-normalized, fuzzy.

use super::MatchStage;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

/// Outcome of a single match attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Byte offset of the match start in the content.
    pub start: usize,
    /// Byte offset of the match end in the content.
    pub end: usize,
    pub stage: MatchStage,
    /// 1.0 for the exact and whitespace stages.
    pub similarity: f64,
}

/// Run the matching stages in order against `content`, returning the first
/// success. Later stages only run when earlier ones miss.
pub fn find_match(content: &str, search: &str, fuzzy_threshold: f64) -> Option<MatchResult> {
    if let Some(m) = exact_match(content, search) {
        return Some(m);
    }
    if let Some(m) = whitespace_normalized_match(content, search) {
        return Some(m);
    }
    fuzzy_match(content, search, fuzzy_threshold)
}

fn exact_match(content: &str, search: &str) -> Option<MatchResult> {
    if search.is_empty() {
        return None;
    }
    content.find(search).map(|idx| MatchResult {
        start: idx,
        end: idx + search.len(),
        stage: MatchStage::Exact,
        similarity: 1.0,
    })
}

/// Collapse whitespace in both sides, then compare line lists through a
/// sliding window. A hit maps back to the original byte range: from the
/// offset of the first matched line to the offset of the line after the
/// window, clamped to the content length.
fn whitespace_normalized_match(content: &str, search: &str) -> Option<MatchResult> {
    let norm_search = normalize_lines(search);
    if norm_search.is_empty() {
        return None;
    }

    let content_lines: Vec<&str> = content.split('\n').collect();
    let norm_content: Vec<String> = content_lines
        .iter()
        .map(|line| collapse_spaces(line.trim()))
        .collect();

    let search_len = norm_search.len();
    if search_len > norm_content.len() {
        return None;
    }

    for i in 0..=(norm_content.len() - search_len) {
        if norm_content[i..i + search_len] == norm_search[..] {
            let start = byte_offset_of_line(&content_lines, i);
            let end = byte_offset_of_line(&content_lines, i + search_len).min(content.len());
            return Some(MatchResult {
                start,
                end,
                stage: MatchStage::WhitespaceNormalized,
                similarity: 1.0,
            });
        }
    }

    None
}

/// Split into lines, drop the trailing empty line a terminal newline
/// produces, and normalize each line.
fn normalize_lines(s: &str) -> Vec<String> {
    let mut lines: Vec<&str> = s.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
        .iter()
        .map(|line| collapse_spaces(line.trim()))
        .collect()
}

/// Scan for the window most similar to the search text, accepting it only
/// at or above the threshold. Ties keep the earliest window.
fn fuzzy_match(content: &str, search: &str, threshold: f64) -> Option<MatchResult> {
    if search.is_empty() || content.is_empty() {
        return None;
    }

    let content_lines: Vec<&str> = content.split('\n').collect();
    let search_len = search.split('\n').count();

    if search_len > content_lines.len() {
        // Try the whole content as a single candidate.
        let sim = similarity(content, search);
        if sim >= threshold {
            return Some(MatchResult {
                start: 0,
                end: content.len(),
                stage: MatchStage::Fuzzy,
                similarity: sim,
            });
        }
        return None;
    }

    let mut best: Option<MatchResult> = None;
    for i in 0..=(content_lines.len() - search_len) {
        let candidate = content_lines[i..i + search_len].join("\n");
        let sim = similarity(&candidate, search);
        if sim >= threshold && best.as_ref().map(|b| sim > b.similarity).unwrap_or(true) {
            let start = byte_offset_of_line(&content_lines, i);
            best = Some(MatchResult {
                start,
                end: start + candidate.len(),
                stage: MatchStage::Fuzzy,
                similarity: sim,
            });
        }
    }

    best
}

/// Best partial match for diagnostics, ignoring the threshold.
/// Returns the closest text, its similarity, and 1-based line range.
pub fn find_closest_match(content: &str, search: &str) -> (String, f64, usize, usize) {
    if search.is_empty() || content.is_empty() {
        return (String::new(), 0.0, 0, 0);
    }

    let content_lines: Vec<&str> = content.split('\n').collect();
    let search_len = search.split('\n').count().min(content_lines.len());

    let mut best_sim = 0.0;
    let mut best_start = 0;

    for i in 0..=(content_lines.len() - search_len) {
        let candidate = content_lines[i..i + search_len].join("\n");
        let sim = similarity(&candidate, search);
        if sim > best_sim {
            best_sim = sim;
            best_start = i;
        }
    }

    if best_sim > 0.0 {
        let closest = content_lines[best_start..best_start + search_len].join("\n");
        (closest, best_sim, best_start + 1, best_start + search_len)
    } else {
        (String::new(), 0.0, 0, 0)
    }
}

/// Levenshtein similarity ratio: `1 - distance / max(len)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let distance = levenshtein(&a_chars, &b_chars);
    let max_len = a_chars.len().max(b_chars.len());
    1.0 - distance as f64 / max_len as f64
}

/// Two-row Levenshtein distance over chars.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Replace runs of spaces and tabs with a single space.
fn collapse_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c == ' ' || c == '\t' {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Byte offset of the start of line `idx` in the content the lines were
/// split from (each line contributes its length plus one newline).
fn byte_offset_of_line(lines: &[&str], idx: usize) -> usize {
    lines[..idx].iter().map(|l| l.len() + 1).sum()
}
