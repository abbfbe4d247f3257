//! Cloud CLI invocation
//!
//! Discovery drives the vendor CLIs (`aws`, `az`, `gcloud`) for credentials
//! and listings, reading their JSON output.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

/// Runs a CLI and parses its stdout as JSON
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_json(
        &self,
        program: &str,
        args: Vec<String>,
        envs: Vec<(String, String)>,
    ) -> Result<Value>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run_json(
        &self,
        program: &str,
        args: Vec<String>,
        envs: Vec<(String, String)>,
    ) -> Result<Value> {
        trace!(program = %program, args = ?args, "Running CLI");

        let output = tokio::process::Command::new(program)
            .args(&args)
            .envs(envs)
            .output()
            .await
            .with_context(|| format!("Failed to run {} CLI", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {} failed ({}): {}",
                program,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            );
        }

        parse_output(&output.stdout)
            .with_context(|| format!("Failed to parse {} output as JSON", program))
    }
}

/// Commands that print nothing succeed with `null`
pub fn parse_output(stdout: &[u8]) -> Result<Value> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(stdout)?)
}

/// Convert borrowed arguments into the owned form the runner takes
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
