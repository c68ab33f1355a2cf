//! PAR2 handler backed by the external `par2` binary

use super::parser::{parse_repair_output, parse_verify_output};
use super::traits::{ParityCapabilities, ParityHandler, RepairResult, VerifyResult};
use crate::config::ToolsConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Runs `par2 v` / `par2 r` in the directory of the PAR2 file
///
/// ```no_run
/// use usenet_postproc::parity::{CliParityHandler, ParityHandler};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// if let Some(handler) = CliParityHandler::from_path() {
///     let result = handler.verify(Path::new("/downloads/show/show.par2")).await?;
///     println!("{} blocks needed", result.blocks_needed);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CliParityHandler {
    binary_path: PathBuf,
}

impl CliParityHandler {
    /// Use an explicit binary
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Look `par2` up in `PATH`
    pub fn from_path() -> Option<Self> {
        which::which("par2").ok().map(Self::new)
    }

    /// Resolve the binary from configuration
    ///
    /// An explicit `par2_path` wins; otherwise `PATH` is searched when allowed.
    pub fn from_config(tools: &ToolsConfig) -> Option<Self> {
        match &tools.par2_path {
            Some(path) => Some(Self::new(path.clone())),
            None if tools.search_path => Self::from_path(),
            None => None,
        }
    }

    /// Binary this handler runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    async fn run(&self, mode: &str, par2_file: &Path) -> crate::Result<Output> {
        let mut command = Command::new(&self.binary_path);
        command.arg(mode).arg(par2_file).kill_on_drop(true);
        if let Some(dir) = par2_file.parent().filter(|d| d.is_dir()) {
            command.current_dir(dir);
        }

        debug!(binary = ?self.binary_path, mode, file = ?par2_file, "running par2");
        command
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("failed to execute par2: {e}")))
    }
}

#[async_trait]
impl ParityHandler for CliParityHandler {
    async fn verify(&self, par2_file: &Path) -> crate::Result<VerifyResult> {
        let output = self.run("v", par2_file).await?;
        Ok(parse_verify_output(
            &output.stdout,
            &output.stderr,
            output.status.success(),
        ))
    }

    async fn repair(&self, par2_file: &Path) -> crate::Result<RepairResult> {
        let output = self.run("r", par2_file).await?;
        Ok(parse_repair_output(
            &output.stdout,
            &output.stderr,
            output.status.success(),
        ))
    }

    fn capabilities(&self) -> ParityCapabilities {
        ParityCapabilities {
            can_verify: true,
            can_repair: true,
        }
    }

    fn name(&self) -> &'static str {
        "cli-par2"
    }
}
