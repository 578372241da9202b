use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fixpoint::{Agent, Config};

#[derive(Parser)]
#[command(name = "fixpoint", version, about = "Repo-aware LLM edits with a verify-and-retry loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a coding task against a workspace
    Run {
        /// The task, in plain language
        prompt: String,
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        /// Model id
        #[arg(short, long, env = "FIXPOINT_MODEL")]
        model: String,
        /// API key for the LLM endpoint
        #[arg(long, env = "FIXPOINT_API_KEY", hide_env_values = true)]
        api_key: String,
        /// Maximum retry iterations
        #[arg(long, default_value_t = 3)]
        max_retries: usize,
        /// Test command (whitespace-separated); omit to skip tests
        #[arg(long)]
        test_cmd: Option<String>,
        /// Token budget for the repository map
        #[arg(long, default_value_t = 2048.0)]
        map_budget: f64,
        /// Disable git integration
        #[arg(long)]
        no_git: bool,
        /// Refuse to run on a dirty worktree instead of committing it
        #[arg(long)]
        no_dirty_commit: bool,
    },
    /// Undo the agent's most recent commit
    Undo {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run {
            prompt,
            workspace,
            model,
            api_key,
            max_retries,
            test_cmd,
            map_budget,
            no_git,
            no_dirty_commit,
        } => {
            let mut cfg = Config::new(workspace, model);
            cfg.api_key = api_key;
            cfg.max_retries = max_retries;
            cfg.test_cmd = test_cmd.unwrap_or_default();
            cfg.map_token_budget = map_budget;
            cfg.no_git = no_git;
            cfg.dirty_commit = !no_dirty_commit;

            let agent = match Agent::new(cfg) {
                Ok(agent) => agent,
                Err(err) => {
                    eprintln!("error: {}", err);
                    return ExitCode::FAILURE;
                }
            };

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("interrupted, shutting down");
                    ctrl_c_cancel.cancel();
                }
            });

            let (outcome, error) = match agent.run(&cancel, &prompt).await {
                Ok(outcome) => (outcome, None),
                Err(failure) => (failure.outcome.clone(), Some(failure.error)),
            };

            if !outcome.modified_files.is_empty() {
                println!("Modified files:");
                for f in &outcome.modified_files {
                    println!("  {}", f);
                }
            }
            println!(
                "Retries: {}  Tokens: {} in / {} out",
                outcome.retries, outcome.tokens_used.input, outcome.tokens_used.output
            );

            if let Some(err) = error {
                eprintln!("error: {}", err);
                for e in &outcome.errors {
                    eprintln!("  {}", e);
                }
                return ExitCode::FAILURE;
            }

            println!("Done.");
            ExitCode::SUCCESS
        }
        Command::Undo { workspace } => {
            let mut cfg = Config::new(workspace, "unused");
            cfg.api_key = "unused".into();

            let agent = match Agent::new(cfg) {
                Ok(agent) => agent,
                Err(err) => {
                    eprintln!("error: {}", err);
                    return ExitCode::FAILURE;
                }
            };

            match agent.undo() {
                Ok(()) => {
                    println!("Undid the last fixpoint commit.");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("error: {}", err);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
