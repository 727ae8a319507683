//! Print submission.
//!
//! Submitting is fire-and-forget: `lp` either accepts the job or it does
//! not. A rejected job is reported to the caller, which logs it; nothing
//! here retries.

use crate::error::PrintError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

/// Hands a finished receipt to a print destination.
#[async_trait]
pub trait Printer: Send + Sync {
    async fn print(&self, pdf: &Path) -> Result<(), PrintError>;
}

/// Submits receipts with `lp -d <destination> <file>`.
#[derive(Debug, Clone)]
pub struct LpPrinter {
    program: String,
    destination: String,
    timeout_secs: u64,
}

impl LpPrinter {
    pub fn new(destination: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: "lp".to_string(),
            destination: destination.into(),
            timeout_secs,
        }
    }

    /// Use a different spooler binary with `lp`-compatible arguments.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Printer for LpPrinter {
    async fn print(&self, pdf: &Path) -> Result<(), PrintError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-d")
            .arg(&self.destination)
            .arg(pdf)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!("Running {:?}", cmd);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| PrintError::Timeout {
                program: self.program.clone(),
                secs: self.timeout_secs,
            })?
            .map_err(|source| PrintError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(PrintError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        info!("Sent {} to '{}': {}", pdf.display(), self.destination, stdout.trim());
        Ok(())
    }
}

/// Logs instead of printing; used with `--dry-run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunPrinter;

#[async_trait]
impl Printer for DryRunPrinter {
    async fn print(&self, pdf: &Path) -> Result<(), PrintError> {
        info!("Dry run: not printing {}", pdf.display());
        Ok(())
    }
}
