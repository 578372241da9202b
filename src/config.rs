//! Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_max_retries() -> usize {
    3
}

fn default_map_token_budget() -> f64 {
    2048.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_fuzzy_threshold() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("work_dir is required")]
    MissingWorkDir,
    #[error("work_dir {0} does not exist or is not a directory")]
    BadWorkDir(String),
    #[error("model is required")]
    MissingModel,
}

/// Configuration for a single [`Agent`](crate::agent::Agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repository root the agent edits.
    pub work_dir: PathBuf,
    /// Model id passed to the LLM client.
    pub model: String,
    /// API key for the LLM endpoint. Empty is fine when a custom prompter
    /// is injected.
    #[serde(default)]
    pub api_key: String,
    /// Maximum feedback-loop iterations.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Test command, whitespace-separated. Empty skips tests.
    #[serde(default)]
    pub test_cmd: String,
    /// Token budget for the repository map.
    #[serde(default = "default_map_token_budget")]
    pub map_token_budget: f64,
    /// Maximum tokens for each LLM response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Minimum similarity for the fuzzy match stage.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Disable all git operations.
    #[serde(default)]
    pub no_git: bool,
    /// Commit pre-existing dirty files before editing; refuse when false
    /// and the worktree is dirty.
    #[serde(default = "default_true")]
    pub dirty_commit: bool,
    /// LLM request timeout in seconds.
    #[serde(default)]
    pub llm_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new(work_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            model: model.into(),
            api_key: String::new(),
            max_retries: default_max_retries(),
            test_cmd: String::new(),
            map_token_budget: default_map_token_budget(),
            max_tokens: default_max_tokens(),
            fuzzy_threshold: default_fuzzy_threshold(),
            no_git: false,
            dirty_commit: true,
            llm_timeout_secs: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkDir);
        }
        if !self.work_dir.is_dir() {
            return Err(ConfigError::BadWorkDir(
                self.work_dir.display().to_string(),
            ));
        }
        if self.model.is_empty() {
            return Err(ConfigError::MissingModel);
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Option<Duration> {
        self.llm_timeout_secs.map(Duration::from_secs)
    }
}
