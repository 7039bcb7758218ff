//! Subprocess execution with retry/backoff (§4.3, §4.4, §7 category 2).
//!
//! Grounded on `gw-nft/src/ruleset.rs`'s `apply_ruleset_payload`/
//! `snapshot_table` for the `tokio::process::Command` + piped-stdin idiom;
//! the retry loop and [`CommandRunner`] mocking seam are this
//! specification's own addition (§10.4), since the original has no retry
//! wrapper around its subprocess calls.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use bamboo_core::AgentError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Output of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Seam between the table/ipset syncers and the real OS process table, so
/// tests can substitute a fake kernel without spawning anything (§10.4).
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput>;
}

/// Runs real subprocesses via `tokio::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {program}"))?;

        if let Some(payload) = stdin {
            let mut handle = child.stdin.take().expect("stdin was piped");
            handle.write_all(payload.as_bytes()).await?;
            drop(handle);
        } else {
            drop(child.stdin.take());
        }

        let output = child.wait_with_output().await.with_context(|| format!("waiting on {program}"))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run `program args` with `stdin` piped in, retrying up to [`MAX_ATTEMPTS`]
/// times with exponential backoff starting at [`BASE_BACKOFF`] when the
/// process exits nonzero or writes to stderr (§4.3, §7 category 2).
pub async fn run_with_retry(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<CommandOutput, AgentError> {
    let mut backoff = BASE_BACKOFF;
    let mut last_err = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        match runner.run(program, args, stdin).await {
            Ok(out) if out.success && out.stderr.is_empty() => return Ok(out),
            Ok(out) => {
                last_err = format!("exit={} stderr={}", out.success, out.stderr.trim());
            }
            Err(e) => {
                last_err = e.to_string();
            }
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
    Err(AgentError::Kernel(format!("{program} failed after {MAX_ATTEMPTS} attempts: {last_err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyRunner {
        failures_remaining: AtomicU32,
    }

    #[async_trait::async_trait]
    impl CommandRunner for FlakyRunner {
        async fn run(&self, _program: &str, _args: &[String], _stdin: Option<&str>) -> Result<CommandOutput> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Ok(CommandOutput { success: false, stdout: String::new(), stderr: "boom".into() });
            }
            Ok(CommandOutput { success: true, stdout: "ok".into(), stderr: String::new() })
        }
    }

    struct AlwaysFailRunner;

    #[async_trait::async_trait]
    impl CommandRunner for AlwaysFailRunner {
        async fn run(&self, _program: &str, _args: &[String], _stdin: Option<&str>) -> Result<CommandOutput> {
            Ok(CommandOutput { success: false, stdout: String::new(), stderr: "nope".into() })
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let runner = FlakyRunner { failures_remaining: AtomicU32::new(2) };
        let out = run_with_retry(&runner, "ipset", &["save".to_string()], None).await.unwrap();
        assert_eq!(out.stdout, "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let runner = AlwaysFailRunner;
        let err = run_with_retry(&runner, "ipset", &["restore".to_string()], Some("x")).await.unwrap_err();
        assert!(matches!(err, AgentError::Kernel(_)));
    }
}
