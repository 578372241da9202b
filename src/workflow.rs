//! The verify-and-retry workflow.
//!
//! One pass of verification; while it fails, format the errors, hand them
//! to the retry handler (which prompts the model, parses, and applies), and
//! verify again, up to the retry budget. Modified files accumulate as an
//! order-preserving, deduplicated union across iterations.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::feedback::{format_errors, FormatConfig};
use crate::verify::{verify, CommandRunner, VerifyConfig, VerifyResult};

const DEFAULT_MAX_RETRIES: usize = 3;

/// Called on each retry iteration with the formatted error prompt. Returns
/// the files modified by that iteration's edits.
#[async_trait]
pub trait RetryHandler: Send {
    async fn retry(&mut self, error_prompt: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub verify: VerifyConfig,
    pub format: FormatConfig,
    pub max_retries: usize,
}

impl LoopConfig {
    pub fn new(verify: VerifyConfig, format: FormatConfig) -> Self {
        Self {
            verify,
            format,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Terminal workflow failures. Recoverable conditions (apply misses,
/// verify failures) stay inside the loop.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cancelled after {retries} retries")]
    Cancelled { retries: usize },
    #[error("max retries ({0}) exhausted with remaining errors")]
    MaxRetriesExhausted(usize),
    #[error("retry {retry} failed: {source}")]
    Retry {
        retry: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of the loop; populated even when it ends in failure.
#[derive(Debug, Default)]
pub struct LoopOutcome {
    pub success: bool,
    /// Retry iterations actually performed.
    pub retries: usize,
    pub final_result: VerifyResult,
    /// First-seen order, deduplicated.
    pub modified_files: Vec<String>,
}

/// Failure wrapper that keeps the partial outcome alongside the error.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LoopFailure {
    pub error: WorkflowError,
    pub outcome: LoopOutcome,
}

/// Run the verify-retry loop.
pub async fn run_loop(
    cfg: &LoopConfig,
    runner: &dyn CommandRunner,
    initial_files: Vec<String>,
    handler: &mut dyn RetryHandler,
    cancel: &CancellationToken,
) -> Result<LoopOutcome, Box<LoopFailure>> {
    let mut outcome = LoopOutcome {
        modified_files: ordered_union(Vec::new(), initial_files),
        ..Default::default()
    };

    outcome.final_result = verify(&cfg.verify, runner, cancel);
    if outcome.final_result.success() {
        outcome.success = true;
        return Ok(outcome);
    }

    for i in 1..=cfg.max_retries {
        if cancel.is_cancelled() {
            return Err(Box::new(LoopFailure {
                error: WorkflowError::Cancelled {
                    retries: outcome.retries,
                },
                outcome,
            }));
        }

        outcome.retries = i;
        tracing::info!(retry = i, max = cfg.max_retries, "verification failed, retrying");

        let prompt = format_errors(&outcome.final_result, &outcome.modified_files, &cfg.format);

        let new_files = match handler.retry(&prompt).await {
            Ok(files) => files,
            Err(err) => {
                return Err(Box::new(LoopFailure {
                    error: WorkflowError::Retry {
                        retry: i,
                        source: err,
                    },
                    outcome,
                }));
            }
        };

        outcome.modified_files = ordered_union(outcome.modified_files, new_files);

        outcome.final_result = verify(&cfg.verify, runner, cancel);
        if outcome.final_result.success() {
            outcome.success = true;
            return Ok(outcome);
        }
    }

    let max = cfg.max_retries;
    Err(Box::new(LoopFailure {
        error: WorkflowError::MaxRetriesExhausted(max),
        outcome,
    }))
}

/// Union of two file lists preserving first-seen order.
pub fn ordered_union(existing: Vec<String>, additional: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + additional.len());
    for f in existing.into_iter().chain(additional) {
        if seen.insert(f.clone()) {
            merged.push(f);
        }
    }
    merged
}
