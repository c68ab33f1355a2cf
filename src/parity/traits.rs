//! Seam between the PAR2 engine and the tool that does the heavy lifting

use async_trait::async_trait;
use std::path::Path;

/// What a full verification of a recovery set found
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyResult {
    /// Every source file is intact
    pub is_complete: bool,
    /// Data blocks that must be reconstructed
    pub blocks_needed: u32,
    /// Recovery blocks present on disk
    pub recovery_blocks_available: u32,
    /// Enough recovery blocks are on disk to repair
    pub repairable: bool,
    /// Source files present but corrupt
    pub damaged_files: Vec<String>,
    /// Source files absent
    pub missing_files: Vec<String>,
}

/// Outcome of a repair attempt
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairResult {
    /// All damaged files were reconstructed
    pub success: bool,
    /// Files reconstructed
    pub repaired_files: Vec<String>,
    /// Files still damaged afterwards
    pub failed_files: Vec<String>,
    /// Tool-provided failure reason
    pub error: Option<String>,
}

/// Operations a handler supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityCapabilities {
    /// Full verification
    pub can_verify: bool,
    /// Repair
    pub can_repair: bool,
}

/// Verifies and repairs a recovery set given its PAR2 file
///
/// Handlers that lack a capability return
/// [`Error::NotSupported`](crate::Error::NotSupported); the engine then falls
/// back to its own quick verification and treats repair as impossible.
#[async_trait]
pub trait ParityHandler: Send + Sync {
    /// Verify the source files of the set described by `par2_file`
    async fn verify(&self, par2_file: &Path) -> crate::Result<VerifyResult>;

    /// Reconstruct damaged source files from the recovery volumes on disk
    async fn repair(&self, par2_file: &Path) -> crate::Result<RepairResult>;

    /// What this handler can do
    fn capabilities(&self) -> ParityCapabilities;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
