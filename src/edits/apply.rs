//! The plain-text applier: create, append, and search/replace edits with
//! atomic write-back.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use super::matcher::{self, DEFAULT_FUZZY_THRESHOLD};
use super::{Applier, ApplyError, ApplyResult, Diagnostic, Edit, MatchStage};
use crate::util::resolve_repo_path;

/// Applies search/replace edits to text files using multi-stage matching.
pub struct TextApplier {
    root: PathBuf,
    fuzzy_threshold: f64,
}

impl TextApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    fn resolve(&self, file_path: &str) -> Result<PathBuf, ApplyError> {
        resolve_repo_path(&self.root, Path::new(file_path))
            .map(|p| p.absolute)
            .map_err(ApplyError::Io)
    }

    fn create_file(&self, edit: &Edit) -> Result<ApplyResult, ApplyError> {
        let path = self.resolve(&edit.file_path)?;
        if path.exists() {
            return Err(ApplyError::AlreadyExists(edit.file_path.clone()));
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| ApplyError::Io(format!("creating directory {}: {}", dir.display(), e)))?;
        }

        atomic_write(&path, edit.new_text.as_bytes())
            .map_err(|e| ApplyError::Io(format!("creating {}: {}", edit.file_path, e)))?;

        Ok(ApplyResult {
            file_path: edit.file_path.clone(),
            stage: MatchStage::Exact,
            similarity: 1.0,
        })
    }

    fn append_file(&self, edit: &Edit) -> Result<ApplyResult, ApplyError> {
        let path = self.resolve(&edit.file_path)?;
        let content = fs::read_to_string(&path)
            .map_err(|e| ApplyError::Io(format!("reading {}: {}", edit.file_path, e)))?;

        let result = format!("{}{}", content, edit.new_text);
        atomic_write(&path, result.as_bytes())
            .map_err(|e| ApplyError::Io(format!("writing {}: {}", edit.file_path, e)))?;

        Ok(ApplyResult {
            file_path: edit.file_path.clone(),
            stage: MatchStage::Exact,
            similarity: 1.0,
        })
    }
}

impl Applier for TextApplier {
    fn apply(&self, edit: &Edit) -> Result<ApplyResult, ApplyError> {
        if edit.is_create {
            return self.create_file(edit);
        }

        if edit.old_text.is_empty() && !edit.new_text.is_empty() {
            return self.append_file(edit);
        }

        if edit.old_text.is_empty() && edit.new_text.is_empty() {
            return Err(ApplyError::EmptyEdit(edit.file_path.clone()));
        }

        let path = self.resolve(&edit.file_path)?;
        let content = fs::read_to_string(&path)
            .map_err(|e| ApplyError::Io(format!("reading {}: {}", edit.file_path, e)))?;

        let m = match matcher::find_match(&content, &edit.old_text, self.fuzzy_threshold) {
            Some(m) => m,
            None => {
                let (closest, sim, line_start, line_end) =
                    matcher::find_closest_match(&content, &edit.old_text);
                return Err(ApplyError::NoMatch(Diagnostic {
                    file_path: edit.file_path.clone(),
                    search_text: edit.old_text.clone(),
                    closest_match: closest,
                    similarity: sim,
                    closest_line_start: line_start,
                    closest_line_end: line_end,
                }));
            }
        };

        let result = format!(
            "{}{}{}",
            &content[..m.start],
            edit.new_text,
            &content[m.end..]
        );
        atomic_write(&path, result.as_bytes())
            .map_err(|e| ApplyError::Io(format!("writing {}: {}", edit.file_path, e)))?;

        Ok(ApplyResult {
            file_path: edit.file_path.clone(),
            stage: m.stage,
            similarity: m.similarity,
        })
    }
}

/// Overwrite an existing file with new content through the atomic path.
pub fn replace_file(path: &Path, content: &[u8]) -> Result<()> {
    atomic_write(path, content)
}

/// Remove a file from disk.
pub fn delete_file(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("removing {}", path.display()))
}

/// Write data to a temp file in the target's directory, fsync, carry over
/// the target's permissions, and rename over the target. A failure on any
/// step before the rename leaves the target untouched; the temp file is
/// cleaned up on drop.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(data).context("writing temp file")?;
    tmp.as_file().sync_all().context("syncing temp file")?;

    let perm = match fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        Err(_) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::Permissions::from_mode(0o644)
            }
            #[cfg(not(unix))]
            {
                tmp.as_file().metadata().context("temp metadata")?.permissions()
            }
        }
    };
    fs::set_permissions(tmp.path(), perm).context("setting permissions")?;

    tmp.persist(path)
        .with_context(|| format!("renaming temp file over {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn edit(path: &str, old: &str, new: &str) -> Edit {
        Edit {
            file_path: path.to_string(),
            old_text: old.to_string(),
            new_text: new.to_string(),
            is_create: false,
        }
    }

    #[test]
    fn test_exact_replace() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.yaml", "timeout: 30\nretries: 3\n");
        let applier = TextApplier::new(dir.path());

        let result = applier
            .apply(&edit("config.yaml", "timeout: 30\n", "timeout: 60\n"))
            .unwrap();

        assert_eq!(result.stage, MatchStage::Exact);
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "timeout: 60\nretries: 3\n"
        );
    }

    #[test]
    fn test_whitespace_replace_updates_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.txt", "timeout: 30\n");
        let applier = TextApplier::new(dir.path());

        let result = applier
            .apply(&edit("a.txt", "  timeout:   30\n", "timeout: 60\n"))
            .unwrap();

        assert_eq!(result.stage, MatchStage::WhitespaceNormalized);
        assert_eq!(result.similarity, 1.0);
        assert_eq!(fs::read_to_string(path).unwrap(), "timeout: 60\n");
    }

    #[test]
    fn test_create_new_file() {
        let dir = TempDir::new().unwrap();
        let applier = TextApplier::new(dir.path());
        let mut e = edit("sub/new.txt", "", "hello\n");
        e.is_create = true;

        applier.apply(&e).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/new.txt")).unwrap(),
            "hello\n"
        );
    }

    #[test]
    fn test_create_fails_when_file_exists() {
        let dir = TempDir::new().unwrap();
        write(&dir, "exists.txt", "content\n");
        let applier = TextApplier::new(dir.path());
        let mut e = edit("exists.txt", "", "other\n");
        e.is_create = true;

        let err = applier.apply(&e).unwrap_err();
        assert!(matches!(err, ApplyError::AlreadyExists(_)));
    }

    #[test]
    fn test_create_wins_over_old_text() {
        let dir = TempDir::new().unwrap();
        let applier = TextApplier::new(dir.path());
        let mut e = edit("fresh.txt", "ignored search text", "body\n");
        e.is_create = true;

        applier.apply(&e).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("fresh.txt")).unwrap(),
            "body\n"
        );
    }

    #[test]
    fn test_append() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "log.txt", "first\n");
        let applier = TextApplier::new(dir.path());

        applier.apply(&edit("log.txt", "", "second\n")).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_empty_edit_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "content\n");
        let applier = TextApplier::new(dir.path());

        let err = applier.apply(&edit("a.txt", "", "")).unwrap_err();
        assert!(matches!(err, ApplyError::EmptyEdit(_)));
    }

    #[test]
    fn test_no_match_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let original = "completely different content\n";
        let path = write(&dir, "a.txt", original);
        let applier = TextApplier::new(dir.path());

        let err = applier
            .apply(&edit("a.txt", "this text does not exist here\n", "new\n"))
            .unwrap_err();

        let diag = err.diagnostic().expect("diagnostic");
        assert!(!diag.closest_match.is_empty());
        assert!(diag.similarity < DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(fs::read_to_string(path).unwrap(), original);
    }

    #[test]
    fn test_reapply_same_edit_fails() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "alpha\nbeta\n");
        let applier = TextApplier::new(dir.path());
        let e = edit("a.txt", "alpha\n", "gamma\n");

        applier.apply(&e).unwrap();
        // The search text is gone; the second application must not
        // accidentally match the replacement.
        let err = applier.apply(&e).unwrap_err();
        assert!(err.diagnostic().is_some());
    }

    #[test]
    fn test_preserves_permissions() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir = TempDir::new().unwrap();
            let path = write(&dir, "run.sh", "echo old\n");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

            let applier = TextApplier::new(dir.path());
            applier
                .apply(&edit("run.sh", "echo old\n", "echo new\n"))
                .unwrap();

            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_replace_and_delete_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "whole.txt", "old body\n");

        replace_file(&path, b"new body\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new body\n");

        delete_file(&path).unwrap();
        assert!(!path.exists());
        assert!(delete_file(&path).is_err());
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let applier = TextApplier::new(dir.path());

        let err = applier
            .apply(&edit("../outside.txt", "a", "b"))
            .unwrap_err();
        assert!(matches!(err, ApplyError::Io(_)));
    }
}
