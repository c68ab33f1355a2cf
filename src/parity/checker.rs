//! Verification and repair of one collection's PAR2 set
//!
//! The checker owns no queue state. Everything it needs from the outside
//! world (more recovery blocks, a place to show progress) goes through
//! [`ParCallbacks`].

use super::filename::find_set_files;
use super::metadata::{FileCheck, RecoverySet, check_source_file};
use super::traits::ParityHandler;
use crate::error::{Error, PostProcessError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress update raised while verifying or repairing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParProgress {
    /// What is happening right now
    pub label: String,
    /// Progress of the current file (0..=100)
    pub file_progress: u8,
    /// Progress of the current stage (0..=100)
    pub stage_progress: u8,
}

impl ParProgress {
    /// Build a progress update
    pub fn new(label: impl Into<String>, file_progress: u8, stage_progress: u8) -> Self {
        Self {
            label: label.into(),
            file_progress,
            stage_progress,
        }
    }
}

/// Services the checker calls back into
#[async_trait]
pub trait ParCallbacks: Send + Sync {
    /// Make `blocks_needed` more recovery blocks available
    ///
    /// Returns the number of blocks that are now on their way, or the size of
    /// the whole reserve when it cannot close the deficit (in which case
    /// nothing was requested).
    async fn request_more_blocks(&self, blocks_needed: u32) -> u32;

    /// Show progress on the job
    async fn report_progress(&self, progress: ParProgress);
}

/// Outcome of a verification pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    /// Source files present but corrupt
    pub damaged_files: Vec<String>,
    /// Source files absent
    pub missing_files: Vec<String>,
    /// Data blocks that must be reconstructed
    pub blocks_needed: u32,
    /// Whether the needed count came from the handler or our own estimate
    pub exact: bool,
}

impl Verification {
    /// Nothing to repair
    pub fn is_intact(&self) -> bool {
        self.damaged_files.is_empty() && self.missing_files.is_empty() && self.blocks_needed == 0
    }
}

/// Outcome of one repair step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairStep {
    /// Nothing was damaged
    NotNeeded,
    /// Requested volumes are downloading; call again once they are on disk
    Waiting {
        /// Blocks the requested volumes carry
        requested: u32,
    },
    /// The handler reported a successful repair
    Repaired,
    /// Not enough recovery blocks exist anywhere
    InsufficientBlocks {
        /// Blocks the repair needs
        needed: u32,
        /// Blocks on disk plus the whole queued reserve
        available: u32,
    },
    /// The repair ran and failed, or repair is unsupported
    Failed {
        /// Why
        reason: String,
    },
}

/// Verifies and repairs the set described by one PAR2 file
pub struct ParChecker {
    collection: String,
    dir: PathBuf,
    par_filename: String,
    handler: Arc<dyn ParityHandler>,
    callbacks: Arc<dyn ParCallbacks>,
    recovery_set: Option<RecoverySet>,
    verification: Option<Verification>,
}

impl std::fmt::Debug for ParChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParChecker")
            .field("collection", &self.collection)
            .field("dir", &self.dir)
            .field("par_filename", &self.par_filename)
            .field("handler", &self.handler.name())
            .field("verification", &self.verification)
            .finish()
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done.saturating_mul(100) / total).unwrap_or(100)
}

impl ParChecker {
    /// Create a checker for `par_filename` inside `dir`
    pub fn new(
        collection: impl Into<String>,
        dir: impl Into<PathBuf>,
        par_filename: impl Into<String>,
        handler: Arc<dyn ParityHandler>,
        callbacks: Arc<dyn ParCallbacks>,
    ) -> Self {
        Self {
            collection: collection.into(),
            dir: dir.into(),
            par_filename: par_filename.into(),
            handler,
            callbacks,
            recovery_set: None,
            verification: None,
        }
    }

    /// Full path of the primary PAR2 file
    pub fn par_path(&self) -> PathBuf {
        self.dir.join(&self.par_filename)
    }

    /// Directory holding the set
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loaded metadata, if [`load`](Self::load) succeeded
    pub fn recovery_set(&self) -> Option<&RecoverySet> {
        self.recovery_set.as_ref()
    }

    /// Result of the most recent verification
    pub fn verification(&self) -> Option<&Verification> {
        self.verification.as_ref()
    }

    /// Parse the primary PAR2 file
    pub async fn load(&mut self) -> Result<&RecoverySet> {
        let path = self.par_path();
        self.callbacks
            .report_progress(ParProgress::new(
                format!("Loading {}", self.par_filename),
                0,
                0,
            ))
            .await;

        let set = tokio::task::spawn_blocking(move || RecoverySet::load(&path))
            .await
            .map_err(|e| Error::Other(format!("PAR2 load task failed: {e}")))??;

        debug!(
            collection = %self.collection,
            files = set.files.len(),
            slice_size = set.slice_size,
            "loaded PAR2 metadata"
        );
        Ok(&*self.recovery_set.insert(set))
    }

    /// Check every source file and work out how many blocks are missing
    pub async fn verify(&mut self) -> Result<&Verification> {
        let set = match &self.recovery_set {
            Some(set) => set.clone(),
            None => self.load().await?.clone(),
        };

        let total = set.files.len();
        let mut verification = Verification::default();
        let mut estimate = 0u32;

        for (index, file) in set.files.iter().enumerate() {
            let label = format!("Verifying {}", file.filename);
            self.callbacks
                .report_progress(ParProgress::new(label.clone(), 0, percent(index, total)))
                .await;

            let dir = self.dir.clone();
            let source = file.clone();
            let check = tokio::task::spawn_blocking(move || check_source_file(&dir, &source))
                .await
                .map_err(|e| Error::Other(format!("verification task failed: {e}")))??;

            match check {
                FileCheck::Intact => {}
                FileCheck::Missing => verification.missing_files.push(file.filename.clone()),
                FileCheck::Damaged => verification.damaged_files.push(file.filename.clone()),
            }
            if check != FileCheck::Intact {
                estimate = estimate.saturating_add(file.block_count(set.slice_size));
            }

            self.callbacks
                .report_progress(ParProgress::new(label, 100, percent(index + 1, total)))
                .await;
        }

        if verification.damaged_files.is_empty() && verification.missing_files.is_empty() {
            info!(collection = %self.collection, files = total, "all source files intact");
            return Ok(&*self.verification.insert(verification));
        }

        match self.handler.verify(&self.par_path()).await {
            Ok(result) if result.is_complete => {
                // the handler found the data elsewhere (e.g. renamed files)
                verification = Verification {
                    exact: true,
                    ..Verification::default()
                };
            }
            Ok(result) => {
                verification.blocks_needed = if result.blocks_needed > 0 {
                    result.blocks_needed
                } else {
                    estimate
                };
                verification.exact = result.blocks_needed > 0;
            }
            Err(Error::NotSupported(reason)) => {
                debug!(
                    collection = %self.collection,
                    handler = self.handler.name(),
                    reason = %reason,
                    "full verification unavailable, estimating blocks"
                );
                verification.blocks_needed = estimate;
            }
            Err(e) => {
                return Err(PostProcessError::VerificationFailed {
                    collection: self.collection.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        }

        warn!(
            collection = %self.collection,
            damaged = verification.damaged_files.len(),
            missing = verification.missing_files.len(),
            blocks_needed = verification.blocks_needed,
            "source files need repair"
        );
        Ok(&*self.verification.insert(verification))
    }

    /// Recovery blocks carried by the set's volumes already on disk
    pub async fn available_blocks(&self) -> Result<u32> {
        Ok(find_set_files(&self.dir, &self.par_filename)
            .await?
            .iter()
            .map(|(_, blocks)| *blocks)
            .fold(0u32, u32::saturating_add))
    }

    /// Take one step towards a repaired set
    ///
    /// Must follow [`verify`](Self::verify). When the volumes on disk cannot
    /// cover the damage, more are requested through
    /// [`ParCallbacks::request_more_blocks`] and [`RepairStep::Waiting`] is
    /// returned; call again once they have arrived.
    pub async fn repair(&mut self) -> Result<RepairStep> {
        let required = match &self.verification {
            Some(v) if v.is_intact() => return Ok(RepairStep::NotNeeded),
            Some(v) => v.blocks_needed.max(1),
            None => {
                return Err(Error::Other(format!(
                    "repair of {} requested before verification",
                    self.collection
                )));
            }
        };

        let available = self.available_blocks().await?;
        if required > available {
            let needed = required - available;
            self.callbacks
                .report_progress(ParProgress::new(
                    format!("Requesting {needed} more recovery blocks"),
                    0,
                    0,
                ))
                .await;

            let found = self.callbacks.request_more_blocks(needed).await;
            if found >= needed {
                info!(
                    collection = %self.collection,
                    needed,
                    found,
                    "waiting for additional PAR2 volumes"
                );
                return Ok(RepairStep::Waiting { requested: found });
            }

            warn!(
                collection = %self.collection,
                required,
                available,
                queued = found,
                "not enough recovery blocks for repair"
            );
            return Ok(RepairStep::InsufficientBlocks {
                needed: required,
                available: available.saturating_add(found),
            });
        }

        self.callbacks
            .report_progress(ParProgress::new(
                format!("Repairing {}", self.collection),
                0,
                0,
            ))
            .await;

        match self.handler.repair(&self.par_path()).await {
            Ok(result) if result.success => {
                info!(
                    collection = %self.collection,
                    repaired = ?result.repaired_files,
                    "repair complete"
                );
                Ok(RepairStep::Repaired)
            }
            Ok(result) => Ok(RepairStep::Failed {
                reason: result
                    .error
                    .unwrap_or_else(|| "repair did not complete".to_string()),
            }),
            Err(Error::NotSupported(reason)) => Ok(RepairStep::Failed { reason }),
            Err(e) => Err(PostProcessError::RepairFailed {
                collection: self.collection.clone(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    /// Verify again after a repair; true when the set is intact
    pub async fn verify_repaired(&mut self) -> Result<bool> {
        Ok(self.verify().await?.is_intact())
    }
}
