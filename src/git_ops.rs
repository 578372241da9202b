//! Git integration: dirty-worktree handling, auto-commit of agent edits,
//! and undo of the agent's own commits.

use std::path::{Path, PathBuf};

use git2::{IndexAddOption, Repository, ResetType, Signature, StatusOptions};
use thiserror::Error;

/// Trailer appended to every agent commit; also how the agent recognizes
/// its own commits for undo.
pub const CO_AUTHOR_TRAILER: &str = "Co-Authored-By: fixpoint <noreply@fixpoint.dev>";

const DIRTY_COMMIT_MSG: &str = "fixpoint: save uncommitted changes before edit";
const AUTHOR_NAME: &str = "fixpoint";
const AUTHOR_EMAIL: &str = "noreply@fixpoint.dev";
const MAX_SUBJECT_LENGTH: usize = 72;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepository(String),
    #[error("uncommitted changes exist")]
    DirtyWorktree,
    #[error("HEAD is not a fixpoint commit")]
    NotOwnCommit,
    #[error("cannot undo: HEAD is the initial commit")]
    RootCommit,
    #[error(transparent)]
    Git(#[from] git2::Error),
}

/// Git integration behavior.
#[derive(Debug, Clone)]
pub struct GitConfig {
    pub work_dir: PathBuf,
    /// Create commits after successful runs.
    pub auto_commit: bool,
    /// Commit pre-existing dirty files before edits instead of refusing.
    pub dirty_commit: bool,
}

impl GitConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            auto_commit: true,
            dirty_commit: true,
        }
    }
}

/// Wraps a repository for the operations the agent needs.
pub struct Repo {
    repo: Repository,
    cfg: GitConfig,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo").field("cfg", &self.cfg).finish()
    }
}

impl Repo {
    /// Open an existing repository at the configured work directory.
    pub fn open(cfg: GitConfig) -> Result<Self, GitError> {
        let repo = Repository::open(&cfg.work_dir)
            .map_err(|e| GitError::NotARepository(e.message().to_string()))?;
        Ok(Self { repo, cfg })
    }

    /// True when the working tree has staged or unstaged changes.
    pub fn is_dirty(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true);
        opts.recurse_untracked_dirs(true);
        opts.include_ignored(false);
        opts.include_unmodified(false);
        opts.exclude_submodules(true);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    /// Commit all dirty files before editing, or refuse when dirty commits
    /// are disabled.
    pub fn handle_dirty(&self) -> Result<(), GitError> {
        if !self.is_dirty()? {
            return Ok(());
        }
        if !self.cfg.dirty_commit {
            return Err(GitError::DirtyWorktree);
        }

        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        self.commit(DIRTY_COMMIT_MSG)?;
        tracing::info!("committed pre-existing dirty files");
        Ok(())
    }

    /// Stage only the listed files and commit them with a generated message.
    pub fn auto_commit(&self, modified_files: &[String], prompt: &str) -> Result<(), GitError> {
        if !self.cfg.auto_commit || modified_files.is_empty() {
            return Ok(());
        }

        let mut index = self.repo.index()?;
        index.add_all(
            modified_files.iter().map(|f| f.as_str()),
            IndexAddOption::DEFAULT,
            None,
        )?;
        index.write()?;

        let message = generate_commit_message(prompt, modified_files);
        let oid = self.commit(&message)?;
        tracing::info!(commit = %oid, files = modified_files.len(), "auto-committed");
        Ok(())
    }

    /// True when the HEAD commit carries the agent's co-author trailer.
    pub fn is_own_commit(&self) -> Result<bool, GitError> {
        let head = self.repo.head()?;
        let commit = self.repo.find_commit(head.target().ok_or_else(|| {
            git2::Error::from_str("HEAD has no target")
        })?)?;
        Ok(commit.message().unwrap_or("").contains(CO_AUTHOR_TRAILER))
    }

    /// Soft-reset HEAD to its first parent iff HEAD is an agent commit,
    /// leaving the working tree untouched.
    pub fn undo(&self) -> Result<(), GitError> {
        if !self.is_own_commit()? {
            return Err(GitError::NotOwnCommit);
        }

        let head = self.repo.head()?;
        let commit = self.repo.find_commit(head.target().ok_or_else(|| {
            git2::Error::from_str("HEAD has no target")
        })?)?;

        if commit.parent_count() == 0 {
            return Err(GitError::RootCommit);
        }

        let parent = commit.parent(0)?;
        self.repo
            .reset(parent.as_object(), ResetType::Soft, None)?;
        Ok(())
    }

    /// Create a commit of the current index on HEAD. Author identity comes
    /// from the repository config, falling back to the agent identity.
    fn commit(&self, message: &str) -> Result<git2::Oid, GitError> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(self.repo.find_commit(head.target().ok_or_else(|| {
                git2::Error::from_str("HEAD has no target")
            })?)?),
            Err(err)
                if matches!(
                    err.code(),
                    git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound
                ) =>
            {
                None
            }
            Err(err) => return Err(err.into()),
        };

        let config = self.repo.config()?;
        let name = config
            .get_string("user.name")
            .unwrap_or_else(|_| AUTHOR_NAME.to_string());
        let email = config
            .get_string("user.email")
            .unwrap_or_else(|_| AUTHOR_EMAIL.to_string());
        let sig = Signature::now(&name, &email)?;

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid)
    }

    pub fn work_dir(&self) -> &Path {
        &self.cfg.work_dir
    }
}

/// Conventional-commit types keyed by prompt keywords, checked in order.
/// Multi-word keywords match as substrings; the rest match whole words.
const COMMIT_TYPES: &[(&[&str], &str)] = &[
    (&["fix", "bug", "repair", "patch", "resolve", "correct"], "fix"),
    (
        &["refactor", "restructure", "reorganize", "clean up", "simplify"],
        "refactor",
    ),
    (&["test", "spec", "coverage"], "test"),
    (&["doc", "comment", "readme", "documentation"], "docs"),
    (&["style", "format", "lint", "whitespace"], "style"),
    (&["perf", "performance", "optimize", "speed"], "perf"),
    (&["ci", "pipeline", "workflow"], "ci"),
    (&["build", "dependency", "deps", "module"], "build"),
    (&["chore", "cleanup", "maintain"], "chore"),
    (
        &["add", "create", "implement", "new", "feature", "introduce"],
        "feat",
    ),
];

/// Build the full commit message: subject, modified-files body, trailer.
pub fn generate_commit_message(prompt: &str, modified_files: &[String]) -> String {
    let commit_type = infer_commit_type(prompt);
    let subject = build_subject(commit_type, prompt);

    let mut message = subject;
    if !modified_files.is_empty() {
        message.push_str("\n\nModified files:\n");
        for f in modified_files {
            message.push_str(&format!("- {}\n", f));
        }
        // Drop the final list newline so the trailer separates cleanly.
        message.pop();
    }
    message.push_str("\n\n");
    message.push_str(CO_AUTHOR_TRAILER);
    message
}

fn infer_commit_type(prompt: &str) -> &'static str {
    let lower = prompt.to_lowercase();
    for (keywords, commit_type) in COMMIT_TYPES {
        for keyword in *keywords {
            if contains_word(&lower, keyword) {
                return commit_type;
            }
        }
    }
    "feat"
}

/// Whole-word containment, bounded by non-alphabetic characters or string
/// edges. Multi-word keywords fall back to substring matching.
fn contains_word(text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return text.contains(keyword);
    }

    let mut from = 0;
    while let Some(i) = text[from..].find(keyword) {
        let start = from + i;
        let end = start + keyword.len();
        let left_ok = start == 0
            || !text[..start]
                .chars()
                .next_back()
                .map(|c| c.is_alphabetic())
                .unwrap_or(false);
        let right_ok = end == text.len()
            || !text[end..]
                .chars()
                .next()
                .map(|c| c.is_alphabetic())
                .unwrap_or(false);
        if left_ok && right_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

/// `type: summary`, at most 72 chars, ellipsized with `...` when longer.
fn build_subject(commit_type: &str, prompt: &str) -> String {
    let summary = prompt.trim().trim_end_matches('.');
    let mut chars = summary.chars();
    let summary = match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };

    crate::util::truncate(&format!("{}: {}", commit_type, summary), MAX_SUBJECT_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo(dir: &TempDir) -> Repository {
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "tester").unwrap();
        config.set_str("user.email", "tester@example.com").unwrap();
        repo
    }

    fn commit_file(dir: &TempDir, repo: &Repository, name: &str, content: &str, message: &str) {
        fs::write(dir.path().join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();
        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .and_then(|oid| repo.find_commit(oid).ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    fn head_message(repo: &Repository) -> String {
        let head = repo.head().unwrap();
        let commit = repo.find_commit(head.target().unwrap()).unwrap();
        commit.message().unwrap().to_string()
    }

    #[test]
    fn test_commit_type_inference() {
        assert_eq!(infer_commit_type("Fix the timeout setting"), "fix");
        assert_eq!(infer_commit_type("clean up the parser"), "refactor");
        assert_eq!(infer_commit_type("add coverage for edge cases"), "test");
        assert_eq!(infer_commit_type("update the README"), "docs");
        assert_eq!(infer_commit_type("optimize the hot path"), "perf");
        assert_eq!(infer_commit_type("adjust the CI pipeline"), "ci");
        assert_eq!(infer_commit_type("bump a dependency"), "build");
        assert_eq!(infer_commit_type("introduce dark mode"), "feat");
        assert_eq!(infer_commit_type("do something unclassifiable"), "feat");
    }

    #[test]
    fn test_whole_word_matching() {
        // "fixture" must not trigger "fix".
        assert_eq!(infer_commit_type("update the fixture loader"), "feat");
        assert!(!contains_word("prefixing", "fix"));
        assert!(contains_word("fix: broken", "fix"));
        assert!(contains_word("please fix this", "fix"));
    }

    #[test]
    fn test_subject_from_scenario() {
        let msg = generate_commit_message(
            "Fix the timeout setting",
            &["config.yaml".to_string()],
        );
        let subject = msg.lines().next().unwrap();
        assert_eq!(subject, "fix: fix the timeout setting");
        assert!(msg.contains("Modified files:\n- config.yaml"));
        assert!(msg.ends_with(CO_AUTHOR_TRAILER));
    }

    #[test]
    fn test_subject_ellipsized_at_72() {
        let long_prompt = "implement ".to_string() + &"very ".repeat(30) + "long feature";
        let msg = generate_commit_message(&long_prompt, &[]);
        let subject = msg.lines().next().unwrap();
        assert_eq!(subject.chars().count(), 72);
        assert!(subject.ends_with("..."));
    }

    #[test]
    fn test_dirty_detection_and_commit() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        commit_file(&dir, &repo, "base.txt", "base\n", "initial");

        let ops = Repo::open(GitConfig::new(dir.path())).unwrap();
        assert!(!ops.is_dirty().unwrap());

        fs::write(dir.path().join("extra.txt"), "new\n").unwrap();
        assert!(ops.is_dirty().unwrap());

        ops.handle_dirty().unwrap();
        assert!(!ops.is_dirty().unwrap());
        assert!(head_message(&repo).contains("save uncommitted changes"));
    }

    #[test]
    fn test_dirty_refused_when_disabled() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        commit_file(&dir, &repo, "base.txt", "base\n", "initial");
        fs::write(dir.path().join("extra.txt"), "new\n").unwrap();

        let mut cfg = GitConfig::new(dir.path());
        cfg.dirty_commit = false;
        let ops = Repo::open(cfg).unwrap();

        assert!(matches!(
            ops.handle_dirty().unwrap_err(),
            GitError::DirtyWorktree
        ));
    }

    #[test]
    fn test_auto_commit_stages_only_listed_files() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        commit_file(&dir, &repo, "base.txt", "base\n", "initial");

        fs::write(dir.path().join("wanted.txt"), "w\n").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "u\n").unwrap();

        let ops = Repo::open(GitConfig::new(dir.path())).unwrap();
        ops.auto_commit(&["wanted.txt".to_string()], "add the wanted file")
            .unwrap();

        let message = head_message(&repo);
        assert!(message.starts_with("feat: add the wanted file"));
        assert!(message.contains(CO_AUTHOR_TRAILER));
        // The unrelated file stays dirty.
        assert!(ops.is_dirty().unwrap());
    }

    #[test]
    fn test_undo_own_commit_preserves_tree() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        commit_file(&dir, &repo, "base.txt", "base\n", "initial");

        let ops = Repo::open(GitConfig::new(dir.path())).unwrap();
        fs::write(dir.path().join("agent.txt"), "agent work\n").unwrap();
        ops.auto_commit(&["agent.txt".to_string()], "create agent file")
            .unwrap();

        ops.undo().unwrap();
        assert!(head_message(&repo).contains("initial"));
        // Working tree keeps the file.
        assert_eq!(
            fs::read_to_string(dir.path().join("agent.txt")).unwrap(),
            "agent work\n"
        );
    }

    #[test]
    fn test_undo_foreign_commit_refused() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir);
        commit_file(&dir, &repo, "base.txt", "base\n", "user's own commit");

        let ops = Repo::open(GitConfig::new(dir.path())).unwrap();
        assert!(matches!(ops.undo().unwrap_err(), GitError::NotOwnCommit));
    }

    #[test]
    fn test_undo_refuses_root_commit() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);

        let ops = Repo::open(GitConfig::new(dir.path())).unwrap();
        fs::write(dir.path().join("only.txt"), "first\n").unwrap();
        // The agent commit is the repository's very first commit.
        ops.auto_commit(&["only.txt".to_string()], "create the only file")
            .unwrap();

        assert!(matches!(ops.undo().unwrap_err(), GitError::RootCommit));
    }

    #[test]
    fn test_every_generated_message_is_undoable() {
        for prompt in ["Fix a bug", "refactor everything", "write docs"] {
            let msg = generate_commit_message(prompt, &["a.txt".to_string()]);
            assert!(msg.contains(CO_AUTHOR_TRAILER));
        }
    }

    #[test]
    fn test_open_non_repo_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Repo::open(GitConfig::new(dir.path())).unwrap_err(),
            GitError::NotARepository(_)
        ));
    }
}
