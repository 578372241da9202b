//! Post-edit verification: build, static check, and tests, in that order.
//!
//! Stages run as external commands in the workspace with per-command
//! timeouts. A build failure short-circuits the rest; tests only run when
//! both earlier stages pass.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::util::run_command_with_timeout;

const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A single compiler or lint error parsed from command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub file_path: String,
    /// 1-based.
    pub line: usize,
    /// 1-based; 0 when the output carried no column.
    pub column: usize,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column > 0 {
            write!(
                f,
                "{}:{}:{}: {}",
                self.file_path, self.line, self.column, self.message
            )
        } else {
            write!(f, "{}:{}: {}", self.file_path, self.line, self.message)
        }
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Default)]
pub struct VerifyResult {
    pub build_ok: bool,
    /// False when the build failed and the check was skipped.
    pub check_ok: bool,
    /// True when no test command is configured.
    pub test_ok: bool,
    pub errors: Vec<CompileError>,
    pub build_out: String,
    pub check_out: String,
    pub test_out: String,
}

impl VerifyResult {
    pub fn success(&self) -> bool {
        self.build_ok && self.check_ok && self.test_ok
    }
}

/// Verifier configuration. Commands are argv vectors run in `work_dir`.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub work_dir: PathBuf,
    pub build_cmd: Vec<String>,
    pub check_cmd: Vec<String>,
    /// Empty means skip tests (`test_ok` stays true).
    pub test_cmd: Vec<String>,
    pub cmd_timeout: Duration,
    pub test_timeout: Duration,
}

impl VerifyConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            build_cmd: argv(&["cargo", "build", "--message-format=short"]),
            check_cmd: argv(&["cargo", "clippy", "--message-format=short"]),
            test_cmd: Vec::new(),
            cmd_timeout: DEFAULT_CMD_TIMEOUT,
            test_timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    /// Set the test command from a whitespace-separated string.
    pub fn with_test_cmd(mut self, cmd: &str) -> Self {
        self.test_cmd = cmd.split_whitespace().map(|s| s.to_string()).collect();
        self
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Runs a command in a workspace and reports its combined output. The
/// production implementation shells out; tests substitute a scripted fake.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        dir: &Path,
        timeout: Duration,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> RunOutput;
}

#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Combined stdout + stderr.
    pub output: String,
    pub ok: bool,
}

/// The real runner, backed by `std::process::Command`.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        dir: &Path,
        timeout: Duration,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> RunOutput {
        let Some((program, args)) = argv.split_first() else {
            return RunOutput::default();
        };
        let mut cmd = Command::new(program);
        cmd.current_dir(dir).args(args);

        match run_command_with_timeout(&mut cmd, timeout, cancel) {
            Ok(result) => RunOutput {
                ok: result.success(),
                output: result.combined(),
            },
            Err(err) => RunOutput {
                ok: false,
                output: err,
            },
        }
    }
}

/// Run one verification pass: build, then static check, then tests.
pub fn verify(cfg: &VerifyConfig, runner: &dyn CommandRunner, cancel: &CancellationToken) -> VerifyResult {
    let mut result = VerifyResult {
        test_ok: true,
        ..Default::default()
    };

    let build = runner.run(&cfg.work_dir, cfg.cmd_timeout, &cfg.build_cmd, cancel);
    result.build_out = build.output;
    result.build_ok = build.ok;

    if !result.build_ok {
        result.errors = parse_compile_errors(&result.build_out);
        tracing::info!(errors = result.errors.len(), "build failed");
        // Check and tests are skipped entirely.
        return result;
    }

    let check = runner.run(&cfg.work_dir, cfg.cmd_timeout, &cfg.check_cmd, cancel);
    result.check_out = check.output;
    result.check_ok = check.ok;

    if !result.check_ok {
        result
            .errors
            .extend(parse_compile_errors(&result.check_out));
    }

    if cfg.test_cmd.is_empty() {
        return result;
    }

    if !result.check_ok {
        result.test_ok = false;
        return result;
    }

    let test = runner.run(&cfg.work_dir, cfg.test_timeout, &cfg.test_cmd, cancel);
    result.test_out = test.output;
    result.test_ok = test.ok;

    result
}

/// Matches `src/lib.rs:10:5: error...` and `src/lib.rs:10: error...`,
/// the shapes `--message-format=short` emits.
fn error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?\.rs):(\d+)(?::(\d+))?: (.+)$").unwrap())
}

/// Extract structured errors from compiler or lint output.
pub fn parse_compile_errors(output: &str) -> Vec<CompileError> {
    let mut errors = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = error_regex().captures(line) else {
            continue;
        };

        errors.push(CompileError {
            file_path: caps[1].to_string(),
            line: caps[2].parse().unwrap_or(0),
            column: caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            message: caps[4].to_string(),
        });
    }
    errors
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted fake: maps the first argv word to a canned result, and
    /// records every invocation.
    pub(crate) struct FakeRunner {
        pub responses: Mutex<HashMap<String, Vec<RunOutput>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn script(&self, key: &str, ok: bool, output: &str) {
            self.responses
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .push(RunOutput {
                    ok,
                    output: output.to_string(),
                });
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(
            &self,
            _dir: &Path,
            _timeout: Duration,
            argv: &[String],
            _cancel: &CancellationToken,
        ) -> RunOutput {
            let key = argv.join(" ");
            self.calls.lock().unwrap().push(key.clone());
            let mut responses = self.responses.lock().unwrap();
            if let Some(queue) = responses.get_mut(&key) {
                if !queue.is_empty() {
                    return queue.remove(0);
                }
            }
            RunOutput {
                ok: true,
                output: String::new(),
            }
        }
    }

    fn cfg() -> VerifyConfig {
        let mut cfg = VerifyConfig::new("/tmp/ws");
        cfg.build_cmd = argv(&["build"]);
        cfg.check_cmd = argv(&["check"]);
        cfg.test_cmd = argv(&["test"]);
        cfg
    }

    #[test]
    fn test_all_stages_pass() {
        let runner = FakeRunner::new();
        let result = verify(&cfg(), &runner, &CancellationToken::new());

        assert!(result.success());
        assert_eq!(
            *runner.calls.lock().unwrap(),
            vec!["build", "check", "test"]
        );
    }

    #[test]
    fn test_build_failure_skips_check_and_test() {
        let runner = FakeRunner::new();
        runner.script("build", false, "src/lib.rs:3:5: expected `;`\n");

        let result = verify(&cfg(), &runner, &CancellationToken::new());

        assert!(!result.success());
        assert!(!result.build_ok);
        assert!(!result.check_ok);
        assert!(result.check_out.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].file_path, "src/lib.rs");
        assert_eq!(result.errors[0].line, 3);
        assert_eq!(result.errors[0].column, 5);
        assert_eq!(*runner.calls.lock().unwrap(), vec!["build"]);
    }

    #[test]
    fn test_check_failure_marks_tests_not_run() {
        let runner = FakeRunner::new();
        runner.script("check", false, "src/lib.rs:9: unused variable\n");

        let result = verify(&cfg(), &runner, &CancellationToken::new());

        assert!(result.build_ok);
        assert!(!result.check_ok);
        assert!(!result.test_ok);
        assert_eq!(result.errors[0].column, 0);
        assert_eq!(*runner.calls.lock().unwrap(), vec!["build", "check"]);
    }

    #[test]
    fn test_no_test_command_counts_as_passing() {
        let runner = FakeRunner::new();
        let mut c = cfg();
        c.test_cmd = Vec::new();

        let result = verify(&c, &runner, &CancellationToken::new());
        assert!(result.success());
        assert_eq!(*runner.calls.lock().unwrap(), vec!["build", "check"]);
    }

    #[test]
    fn test_test_failure_captures_output() {
        let runner = FakeRunner::new();
        runner.script("test", false, "test alpha ... FAILED\n");

        let result = verify(&cfg(), &runner, &CancellationToken::new());
        assert!(!result.success());
        assert!(result.test_out.contains("FAILED"));
    }

    #[test]
    fn test_parse_compile_errors_shapes() {
        let output = "src/main.rs:10:7: error[E0308]: mismatched types\nsrc/lib.rs:4: warning: unused import\nnot an error line\n";
        let errors = parse_compile_errors(output);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "src/main.rs:10:7: error[E0308]: mismatched types");
        assert_eq!(errors[1].to_string(), "src/lib.rs:4: warning: unused import");
    }

    #[test]
    fn test_default_commands() {
        let cfg = VerifyConfig::new("/ws");
        assert_eq!(cfg.build_cmd[..2], ["cargo", "build"]);
        assert_eq!(cfg.check_cmd[..2], ["cargo", "clippy"]);
        assert!(cfg.test_cmd.is_empty());
        assert_eq!(cfg.cmd_timeout, Duration::from_secs(60));
        assert_eq!(cfg.test_timeout, Duration::from_secs(120));
    }
}
