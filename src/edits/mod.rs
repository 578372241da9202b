//! Edit types, the applier contract, and extension-based routing.
//!
//! An [`Edit`] is a single file modification extracted from a model
//! response. The [`Router`] dispatches each edit to an [`Applier`] by file
//! extension: `.rs` files go to an optional structural applier when one is
//! plugged in, everything else goes to the plain-text applier.

pub mod apply;
pub mod matcher;
pub mod parse;

pub use apply::TextApplier;

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// A single file edit extracted from an LLM response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edit {
    /// Target path, workspace-relative (absolute paths inside the workspace
    /// are also accepted by the applier).
    pub file_path: String,
    /// Text to search for. Empty for create/append edits.
    pub old_text: String,
    /// Replacement text. May be empty.
    pub new_text: String,
    /// True when this edit creates a new file; the target must not exist.
    pub is_create: bool,
}

/// Which matching strategy located the search text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    Exact,
    WhitespaceNormalized,
    Fuzzy,
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStage::Exact => "exact",
            MatchStage::WhitespaceNormalized => "whitespace_normalized",
            MatchStage::Fuzzy => "fuzzy",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a successfully applied edit.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub file_path: String,
    pub stage: MatchStage,
    /// 1.0 for exact and whitespace-normalized matches.
    pub similarity: f64,
}

/// Why a match failed, with enough detail for the feedback formatter.
#[derive(Debug, Clone, Default)]
pub struct Diagnostic {
    pub file_path: String,
    pub search_text: String,
    /// Best partial match found; empty if none.
    pub closest_match: String,
    pub similarity: f64,
    /// 1-based line range of the closest match; 0 when absent.
    pub closest_line_start: usize,
    pub closest_line_end: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.closest_match.is_empty() {
            write!(f, "no match found in {}", self.file_path)
        } else {
            write!(
                f,
                "no match in {} (closest match at lines {}-{}, similarity {:.2})",
                self.file_path, self.closest_line_start, self.closest_line_end, self.similarity
            )
        }
    }
}

/// Failure modes of a single edit application.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{0}")]
    NoMatch(Diagnostic),
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("edit has empty search and replacement text for {0}")]
    EmptyEdit(String),
    #[error("{0}")]
    Io(String),
}

impl ApplyError {
    /// The diagnostic payload, when the failure was a match miss.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            ApplyError::NoMatch(d) => Some(d),
            _ => None,
        }
    }
}

/// Applies a single edit to the workspace. Implemented by the plain-text
/// applier and by any structural applier plugged into the router.
pub trait Applier: Send + Sync {
    fn apply(&self, edit: &Edit) -> Result<ApplyResult, ApplyError>;
}

/// Outcome of routing a batch of edits.
#[derive(Debug, Default)]
pub struct RouteResult {
    pub applied: Vec<ApplyResult>,
    /// Failures in edit order; application continues past each one.
    pub errors: Vec<ApplyError>,
}

/// Dispatches edits to an applier by lowercase file extension.
pub struct Router<'a> {
    /// Applier for `.rs` files. Falls back to `text` when absent.
    pub structural: Option<&'a dyn Applier>,
    pub text: &'a dyn Applier,
}

impl<'a> Router<'a> {
    pub fn new(text: &'a dyn Applier) -> Self {
        Self {
            structural: None,
            text,
        }
    }

    /// Apply each edit in list order. A failing edit records its error and
    /// the router continues with the next one; there is no rollback.
    pub fn apply_all(&self, edits: &[Edit]) -> RouteResult {
        let mut result = RouteResult::default();

        for edit in edits {
            let applier = self.applier_for(&edit.file_path);
            match applier.apply(edit) {
                Ok(applied) => result.applied.push(applied),
                Err(err) => {
                    tracing::debug!(file = %edit.file_path, error = %err, "edit failed");
                    result.errors.push(err);
                }
            }
        }

        result
    }

    fn applier_for(&self, file_path: &str) -> &dyn Applier {
        let ext = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if ext == "rs" {
            if let Some(structural) = self.structural {
                return structural;
            }
        }
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingApplier {
        label: &'static str,
        seen: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Applier for RecordingApplier {
        fn apply(&self, edit: &Edit) -> Result<ApplyResult, ApplyError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, edit.file_path));
            if self.fail_on == Some(edit.file_path.as_str()) {
                return Err(ApplyError::NoMatch(Diagnostic {
                    file_path: edit.file_path.clone(),
                    ..Default::default()
                }));
            }
            Ok(ApplyResult {
                file_path: edit.file_path.clone(),
                stage: MatchStage::Exact,
                similarity: 1.0,
            })
        }
    }

    fn edit(path: &str) -> Edit {
        Edit {
            file_path: path.to_string(),
            old_text: "a".to_string(),
            new_text: "b".to_string(),
            is_create: false,
        }
    }

    #[test]
    fn test_router_dispatches_by_extension() {
        let structural = RecordingApplier {
            label: "ast",
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let text = RecordingApplier {
            label: "text",
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let router = Router {
            structural: Some(&structural),
            text: &text,
        };

        router.apply_all(&[edit("src/lib.rs"), edit("README.md"), edit("a/b.RS")]);

        assert_eq!(
            *structural.seen.lock().unwrap(),
            vec!["ast:src/lib.rs", "ast:a/b.RS"]
        );
        assert_eq!(*text.seen.lock().unwrap(), vec!["text:README.md"]);
    }

    #[test]
    fn test_router_without_structural_falls_back() {
        let text = RecordingApplier {
            label: "text",
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let router = Router::new(&text);
        router.apply_all(&[edit("src/lib.rs")]);
        assert_eq!(*text.seen.lock().unwrap(), vec!["text:src/lib.rs"]);
    }

    #[test]
    fn test_router_continues_past_failures() {
        let text = RecordingApplier {
            label: "text",
            seen: Mutex::new(Vec::new()),
            fail_on: Some("bad.md"),
        };
        let router = Router::new(&text);
        let result = router.apply_all(&[edit("bad.md"), edit("good.md")]);

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.applied.len(), 1);
        assert_eq!(result.applied[0].file_path, "good.md");
        assert!(result.errors[0].diagnostic().is_some());
    }
}
