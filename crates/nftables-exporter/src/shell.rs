//! Command execution for the `nft` query interface.
//!
//! Commands run directly (no intermediate shell), so object names taken from
//! the ruleset never need quoting. The child is killed if the awaiting
//! future is dropped, which is how an interrupt cancels a pending query.
//!
//! # Example
//!
//! ```ignore
//! use nftables_exporter::shell::{NftCommand, NftRunner};
//!
//! let nft = NftCommand::new("nft");
//! let json = nft.list(&["set", "ip", "filter", "blocklist"]).await?;
//! ```

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{ExporterError, Result};

/// Default `nft` executable, resolved through `PATH`.
pub const NFT_CMD: &str = "nft";

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    /// The captured stdout output.
    pub stdout: String,
    /// The captured stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Renders a program and its arguments as a single line for logs and errors.
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Executes a command and captures its output.
///
/// # Returns
///
/// * `Ok(ExecResult)` - The command ran, whatever its exit code
/// * `Err(ExporterError::CommandSpawn)` - If the command could not be spawned
pub async fn exec(program: &str, args: &[&str]) -> Result<ExecResult> {
    let command = command_line(program, args);
    tracing::debug!(command = %command, "Running command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExporterError::CommandSpawn {
            command: command.clone(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %command, "Command succeeded");
    } else {
        tracing::warn!(
            command = %command,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a command and returns its stdout, failing on non-zero exit.
pub async fn exec_or_throw(program: &str, args: &[&str]) -> Result<String> {
    let result = exec(program, args).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(ExporterError::CommandFailed {
            command: command_line(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

/// Source of `nft --json list ...` documents.
///
/// The fetcher only depends on this trait so that collection can be driven
/// from canned documents in tests.
#[async_trait]
pub trait NftRunner: Send + Sync {
    /// Runs `nft --json list <args...>` and returns its stdout.
    async fn list(&self, args: &[&str]) -> Result<String>;
}

/// [`NftRunner`] backed by the `nft` executable.
#[derive(Debug, Clone)]
pub struct NftCommand {
    program: String,
}

impl NftCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for NftCommand {
    fn default() -> Self {
        Self::new(NFT_CMD)
    }
}

#[async_trait]
impl NftRunner for NftCommand {
    async fn list(&self, args: &[&str]) -> Result<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.extend(["--json", "list"]);
        argv.extend_from_slice(args);
        exec_or_throw(&self.program, &argv).await
    }
}
