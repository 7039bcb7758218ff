//! Subprocess execution with retry/backoff, mirroring
//! `bamboo-iptables::command` for the `ipset` binary (§4.3, §7 category 2).
//!
//! Grounded on `gw-nft/src/ruleset.rs`'s `tokio::process::Command` idiom;
//! kept as its own small module (rather than a shared crate) since the
//! IPSet Syncer and Table Syncer are independent backends that should not
//! depend on each other (§2 "leaves-first composition").

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use bamboo_core::AgentError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput>;
}

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
            Ok(out) => last_err = format!("exit={} stderr={}", out.success, out.stderr.trim()),
            Err(e) => last_err = e.to_string(),
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

    struct AlwaysFailRunner;

    #[async_trait::async_trait]
    impl CommandRunner for AlwaysFailRunner {
        async fn run(&self, _program: &str, _args: &[String], _stdin: Option<&str>) -> Result<CommandOutput> {
            Ok(CommandOutput { success: false, stdout: String::new(), stderr: "nope".into() })
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let err = run_with_retry(&AlwaysFailRunner, "ipset", &["restore".to_string()], Some("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Kernel(_)));
    }
}
