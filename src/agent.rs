//! The orchestrator: wires extraction, the repository map, the prompter,
//! edit parsing and application, the verify loop, and git into one run.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use crate::edits::parse::parse;
use crate::edits::{Router, TextApplier};
use crate::feedback::FormatConfig;
use crate::git_ops::{GitConfig, GitError, Repo};
use crate::index::{build_map, Extractor};
use crate::llm::prompts::{
    build_initial_messages, build_retry_messages, collect_context_files, SYSTEM_PROMPT,
};
use crate::llm::{ChatMessage, ClientConfig, LlmClient, LlmError, Prompter, TokenUsage};
use crate::verify::{CommandRunner, SystemRunner, VerifyConfig};
use crate::workflow::{run_loop, LoopConfig, RetryHandler, WorkflowError};

/// Terminal failures of a run. Recoverable conditions (apply misses,
/// failed verification passes) stay inside the loop and surface through
/// [`RunOutcome::errors`].
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid config: {0}")]
    ConfigInvalid(#[from] ConfigError),
    #[error("uncommitted changes exist; enable dirty_commit or commit them first")]
    DirtyWorktree,
    #[error("git: {0}")]
    Git(#[from] GitError),
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("no edit blocks found in response")]
    NoEditsFound,
    #[error("retry failed: {0}")]
    RetryFailed(String),
    #[error("max retries ({0}) exhausted with remaining errors")]
    MaxRetriesExhausted(usize),
    #[error("cancelled")]
    Cancelled,
}

/// What a run accomplished; populated even when the run fails.
#[derive(Debug, Default, Clone)]
pub struct RunOutcome {
    /// Files changed across all iterations, first-seen order.
    pub modified_files: Vec<String>,
    /// Remaining errors after all retries.
    pub errors: Vec<String>,
    pub tokens_used: TokenUsage,
    pub retries: usize,
    pub success: bool,
}

/// A terminal failure carrying whatever progress was made.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: AgentError,
    pub outcome: RunOutcome,
}

impl RunFailure {
    fn new(error: AgentError, outcome: RunOutcome) -> Self {
        Self { error, outcome }
    }
}

/// A coding agent bound to one workspace.
pub struct Agent {
    cfg: Config,
    prompter: Arc<dyn Prompter>,
    runner: Arc<dyn CommandRunner>,
    extractor: Extractor,
}

impl Agent {
    /// Build an agent with the real LLM client.
    pub fn new(cfg: Config) -> Result<Self, AgentError> {
        cfg.validate().map_err(AgentError::ConfigInvalid)?;

        let mut client_cfg = ClientConfig::new(cfg.model.clone(), cfg.api_key.clone());
        client_cfg.max_tokens = cfg.max_tokens;
        if let Some(timeout) = cfg.llm_timeout() {
            client_cfg.timeout = timeout;
        }
        let client = LlmClient::new(client_cfg)?;

        Ok(Self {
            cfg,
            prompter: Arc::new(client),
            runner: Arc::new(SystemRunner),
            extractor: Extractor::new(),
        })
    }

    /// Build an agent with an injected prompter (tests, custom backends).
    pub fn with_prompter(cfg: Config, prompter: Arc<dyn Prompter>) -> Result<Self, AgentError> {
        cfg.validate().map_err(AgentError::ConfigInvalid)?;
        Ok(Self {
            cfg,
            prompter,
            runner: Arc::new(SystemRunner),
            extractor: Extractor::new(),
        })
    }

    /// Replace the command runner (tests).
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Execute the full lifecycle: handle dirty state, build the map,
    /// prompt, parse, apply, verify with retries, and commit on success.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<RunOutcome, RunFailure> {
        let mut outcome = RunOutcome::default();

        // Step 1: git. A workspace without a repository is fine; dirty
        // handling only applies when one exists.
        let repo = if self.cfg.no_git {
            None
        } else {
            let mut git_cfg = GitConfig::new(&self.cfg.work_dir);
            git_cfg.dirty_commit = self.cfg.dirty_commit;
            match Repo::open(git_cfg) {
                Ok(repo) => {
                    if let Err(err) = repo.handle_dirty() {
                        let error = match err {
                            GitError::DirtyWorktree => AgentError::DirtyWorktree,
                            other => AgentError::Git(other),
                        };
                        return Err(RunFailure::new(error, outcome));
                    }
                    Some(repo)
                }
                Err(GitError::NotARepository(_)) => None,
                Err(err) => return Err(RunFailure::new(AgentError::Git(err), outcome)),
            }
        };

        if cancel.is_cancelled() {
            return Err(RunFailure::new(AgentError::Cancelled, outcome));
        }

        // Step 2: repository map.
        let repo_map = match build_map(
            &self.extractor,
            &self.cfg.work_dir,
            &[],
            self.cfg.map_token_budget,
            cancel,
        ) {
            Ok(map) => map,
            Err(_) if cancel.is_cancelled() => {
                return Err(RunFailure::new(AgentError::Cancelled, outcome));
            }
            Err(err) => {
                tracing::warn!(error = %err, "repository map unavailable, continuing without it");
                Default::default()
            }
        };
        tracing::info!(
            files = repo_map.file_count,
            symbols = repo_map.symbol_count,
            tokens = repo_map.tokens_used,
            "repository map built"
        );

        // Step 3: initial conversation.
        let files = collect_context_files(&self.cfg.work_dir);
        let messages = build_initial_messages(&repo_map.text, &files, prompt);

        let response = match self.prompter.generate(cancel, SYSTEM_PROMPT, &messages).await {
            Ok(text) => text,
            Err(err) => {
                outcome.tokens_used = self.prompter.usage();
                return Err(RunFailure::new(AgentError::Llm(err), outcome));
            }
        };
        if cancel.is_cancelled() {
            outcome.tokens_used = self.prompter.usage();
            return Err(RunFailure::new(AgentError::Cancelled, outcome));
        }

        // Step 4: parse and apply the first round of edits.
        let parsed = match parse(&response) {
            Ok(parsed) => parsed,
            Err(_) => {
                outcome.tokens_used = self.prompter.usage();
                return Err(RunFailure::new(AgentError::NoEditsFound, outcome));
            }
        };
        for parse_error in &parsed.parse_errors {
            tracing::warn!(
                line = parse_error.position,
                message = %parse_error.message,
                "malformed edit block"
            );
        }

        let applier =
            TextApplier::new(&self.cfg.work_dir).with_fuzzy_threshold(self.cfg.fuzzy_threshold);
        let router = Router::new(&applier);

        let routed = router.apply_all(&parsed.edits);
        for applied in &routed.applied {
            outcome.modified_files.push(applied.file_path.clone());
        }
        for err in &routed.errors {
            outcome.errors.push(err.to_string());
        }
        tracing::info!(
            applied = routed.applied.len(),
            failed = routed.errors.len(),
            "initial edits applied"
        );

        // Step 5: verify and retry.
        let mut verify_cfg = VerifyConfig::new(&self.cfg.work_dir);
        if !self.cfg.test_cmd.is_empty() {
            verify_cfg = verify_cfg.with_test_cmd(&self.cfg.test_cmd);
        }
        let loop_cfg = LoopConfig {
            verify: verify_cfg,
            format: FormatConfig::new(&self.cfg.work_dir),
            max_retries: self.cfg.max_retries,
        };

        let mut handler = PrompterRetryHandler {
            prompter: self.prompter.as_ref(),
            router: &router,
            cancel,
            messages,
            prev_response: response,
        };

        let loop_result = run_loop(
            &loop_cfg,
            self.runner.as_ref(),
            outcome.modified_files.clone(),
            &mut handler,
            cancel,
        )
        .await;

        let (loop_outcome, loop_error) = match loop_result {
            Ok(ok) => (ok, None),
            Err(failure) => {
                let error = match failure.error {
                    WorkflowError::Cancelled { .. } => AgentError::Cancelled,
                    WorkflowError::MaxRetriesExhausted(n) => AgentError::MaxRetriesExhausted(n),
                    WorkflowError::Retry { source, .. } => {
                        AgentError::RetryFailed(source.to_string())
                    }
                };
                (failure.outcome, Some(error))
            }
        };

        outcome.retries = loop_outcome.retries;
        outcome.modified_files = loop_outcome.modified_files;
        outcome.success = loop_outcome.success;
        outcome.tokens_used = self.prompter.usage();

        if !outcome.success {
            // Replace apply-stage noise with the errors that actually
            // remain after the final verification pass.
            outcome.errors = loop_outcome
                .final_result
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            if !loop_outcome.final_result.test_ok && !loop_outcome.final_result.test_out.is_empty()
            {
                outcome
                    .errors
                    .push(format!("test failure: {}", loop_outcome.final_result.test_out));
            }
        }

        // Step 6: commit on success.
        if outcome.success {
            if let Some(repo) = &repo {
                if let Err(err) = repo.auto_commit(&outcome.modified_files, prompt) {
                    outcome.errors.push(format!("auto-commit failed: {}", err));
                }
            }
        }

        match loop_error {
            Some(error) => Err(RunFailure::new(error, outcome)),
            None => Ok(outcome),
        }
    }

    /// Undo the agent's most recent commit in the workspace.
    pub fn undo(&self) -> Result<(), AgentError> {
        let repo = Repo::open(GitConfig::new(&self.cfg.work_dir))?;
        repo.undo().map_err(AgentError::Git)
    }
}

/// The retry callback: extends the conversation with the previous response
/// and the error feedback, prompts again, parses, applies, and reports the
/// newly modified files.
struct PrompterRetryHandler<'a> {
    prompter: &'a dyn Prompter,
    router: &'a Router<'a>,
    cancel: &'a CancellationToken,
    messages: Vec<ChatMessage>,
    prev_response: String,
}

#[async_trait]
impl RetryHandler for PrompterRetryHandler<'_> {
    async fn retry(&mut self, error_prompt: &str) -> anyhow::Result<Vec<String>> {
        let retry_messages =
            build_retry_messages(&self.messages, &self.prev_response, error_prompt);

        let response = self
            .prompter
            .generate(self.cancel, SYSTEM_PROMPT, &retry_messages)
            .await?;

        let parsed = parse(&response).map_err(|e| anyhow::anyhow!(e))?;
        let routed = self.router.apply_all(&parsed.edits);

        let modified = routed
            .applied
            .iter()
            .map(|a| a.file_path.clone())
            .collect();

        self.messages = retry_messages;
        self.prev_response = response;
        Ok(modified)
    }
}
