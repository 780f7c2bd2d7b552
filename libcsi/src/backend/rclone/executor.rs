//! rclone invocation.
//!
//! [`OperationExecutor`] turns a verb, a target and a [`FlagSet`] into exactly
//! one rclone command line, runs it through a [`ProcessRunner`] and classifies
//! the outcome. It never retries.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::params::FlagSet;

/// Lifecycle operation carried out by rclone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationVerb {
    /// Idempotent directory / bucket creation (`rclone mkdir`).
    Create,
    /// Idempotent recursive removal (`rclone purge`).
    Delete,
}

impl OperationVerb {
    /// Subcommand passed to rclone.
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::Create => "mkdir",
            Self::Delete => "purge",
        }
    }
}

impl fmt::Display for OperationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Delete => "delete",
        })
    }
}

/// Outcome of one rclone invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub succeeded: bool,
    /// Empty on success, otherwise the command shape and captured output.
    pub diagnostic: String,
}

impl OperationResult {
    fn success() -> Self {
        Self {
            succeeded: true,
            diagnostic: String::new(),
        }
    }

    fn failure(diagnostic: String) -> Self {
        Self {
            succeeded: false,
            diagnostic,
        }
    }
}

/// Exit status and merged output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Standard output followed by standard error.
    pub output: String,
}

/// Runs external programs. Swapped for a fake in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn execute(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput>;
}

/// [`ProcessRunner`] spawning real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner {
    timeout: Option<Duration>,
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child and fail with [`io::ErrorKind::TimedOut`] once `timeout`
    /// has elapsed.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn execute(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            // Dropping the future on expiry drops the child, which kills it.
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{program} did not finish within {limit:?}"),
                    )
                })??,
            None => child.wait_with_output().await?,
        };

        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            output: merged,
        })
    }
}

/// Fixed invocation settings, validated once at startup.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// rclone binary.
    pub program: String,
    /// Arguments following the target on every invocation.
    pub global_args: Vec<String>,
    /// Lowest-precedence flag layer.
    pub default_flags: FlagSet,
    /// Flags appended to `Create` unless the caller set them. Kept for
    /// compatibility: the S3 ACL flags have no effect on `mkdir` today.
    pub create_post_flags: FlagSet,
    /// `purge` exit codes meaning the target is already gone.
    pub absent_exit_codes: Vec<i32>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            program: "rclone".to_owned(),
            global_args: vec!["--no-check-certificate".to_owned()],
            default_flags: FlagSet::new(),
            create_post_flags: FlagSet::from_layer(
                "create post flags",
                [("s3-bucket-acl", "public-read-write"), ("s3-acl", "public-read-write")],
            )
            .unwrap_or_default(),
            absent_exit_codes: vec![3, 4],
        }
    }
}

/// Builds and runs one rclone command per call.
pub struct OperationExecutor {
    settings: ExecutorSettings,
    runner: Box<dyn ProcessRunner>,
}

impl OperationExecutor {
    pub fn new(settings: ExecutorSettings, runner: Box<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Argument vector for `verb` on `:<remote>:<remote_path>`.
    ///
    /// Default flags come first and are skipped when `flags` sets the same
    /// key, then every resolved flag, then (for `Create`) the post flags the
    /// caller did not set.
    pub fn build_args(
        &self,
        verb: OperationVerb,
        remote: &str,
        remote_path: &str,
        flags: &FlagSet,
    ) -> Vec<String> {
        let mut args = vec![
            verb.subcommand().to_owned(),
            format!(":{remote}:{remote_path}"),
        ];
        args.extend(self.settings.global_args.iter().cloned());

        let defaults = self
            .settings
            .default_flags
            .iter()
            .filter(|(k, _)| !flags.contains_key(k));
        for (k, v) in defaults.chain(flags.iter()) {
            args.push(format!("--{k}={v}"));
        }

        if verb == OperationVerb::Create {
            for (k, v) in self.settings.create_post_flags.iter() {
                if flags.contains_key(k) {
                    debug!(flag = k, "post flag overridden by caller");
                    continue;
                }
                args.push(format!("--{k}={v}"));
            }
        }
        args
    }

    /// Run `verb` once and classify the result.
    #[instrument(skip(self, flags))]
    pub async fn run(
        &self,
        verb: OperationVerb,
        remote: &str,
        remote_path: &str,
        flags: &FlagSet,
    ) -> OperationResult {
        let args = self.build_args(verb, remote, remote_path, flags);
        let program = &self.settings.program;
        info!(
            operation = %verb,
            cmd = %program,
            subcommand = verb.subcommand(),
            "executing volume operation"
        );
        // Values are withheld: credential-derived flags carry secrets.
        debug!(flags = ?flags, "resolved flag names");

        let describe = |status: &str, output: &str| {
            format!(
                "{program} operation failed: {status} cmd: '{program}' operation: '{}' remote: ':{remote}:{remote_path}' output: {output:?}",
                verb.subcommand()
            )
        };

        match self.runner.execute(program, &args).await {
            Ok(ProcessOutput {
                exit_code: Some(0),
                ..
            }) => OperationResult::success(),
            Ok(ProcessOutput {
                exit_code: Some(code),
                ..
            }) if verb == OperationVerb::Delete
                && self.settings.absent_exit_codes.contains(&code) =>
            {
                info!(code, "target already absent, treating delete as done");
                OperationResult::success()
            }
            Ok(out) => {
                let status = match out.exit_code {
                    Some(code) => format!("exit status {code}"),
                    None => "terminated by signal".to_owned(),
                };
                warn!(operation = %verb, %status, "volume operation failed");
                OperationResult::failure(describe(&status, &out.output))
            }
            Err(e) => {
                warn!(operation = %verb, error = %e, "could not run {program}");
                OperationResult::failure(describe(&e.to_string(), ""))
            }
        }
    }
}
