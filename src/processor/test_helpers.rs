//! Shared test doubles for the post-processor

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::config::Config;
use crate::engine::{CollectionInfo, DownloadEngine, DownloadQueueSnapshot, FileId, QueuedFile};
use crate::parity::{
    NoOpParityHandler, ParityCapabilities, ParityHandler, RepairResult, VerifyResult,
    parse_par_filename,
};
use crate::processor::PostProcessor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) use crate::parity::testing::par2_index;

/// Download queue kept in memory
///
/// Completing a file writes it into the collection's directory so the PAR2
/// engine finds it on disk.
#[derive(Default)]
pub(crate) struct MemoryEngine {
    state: Mutex<DownloadQueueSnapshot>,
    next_id: AtomicU64,
    removed: Mutex<Vec<FileId>>,
    unpaused: Mutex<Vec<FileId>>,
}

impl MemoryEngine {
    pub(crate) fn add_collection(
        &self,
        nzb_name: &str,
        dest_dir: impl Into<PathBuf>,
        files: &[(&str, bool)],
    ) -> Vec<FileId> {
        let mut state = self.state.lock().unwrap();
        state.collections.push(CollectionInfo {
            nzb_name: nzb_name.into(),
            dest_dir: dest_dir.into(),
            info_name: nzb_name.trim_end_matches(".nzb").into(),
        });
        files
            .iter()
            .map(|(name, paused)| {
                let id = FileId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                state.files.push(QueuedFile {
                    id,
                    nzb_name: nzb_name.into(),
                    filename: (*name).into(),
                    paused: *paused,
                });
                id
            })
            .collect()
    }

    /// Finish downloading every unpaused file, writing `content` for each
    pub(crate) fn download_unpaused(&self, content: &[u8]) -> Vec<QueuedFile> {
        let mut state = self.state.lock().unwrap();
        let (done, left): (Vec<_>, Vec<_>) =
            state.files.drain(..).partition(|f| !f.paused);
        state.files = left;
        for file in &done {
            if let Some(collection) = state.collection(&file.nzb_name) {
                std::fs::create_dir_all(&collection.dest_dir).unwrap();
                std::fs::write(collection.dest_dir.join(&file.filename), content).unwrap();
            }
        }
        done
    }

    /// Drop a collection and its files, as a download manager moving it to history
    pub(crate) fn remove_collection(&self, nzb_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.collections.retain(|c| c.nzb_name != nzb_name);
        state.files.retain(|f| f.nzb_name != nzb_name);
    }

    pub(crate) fn removed(&self) -> Vec<FileId> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn unpaused(&self) -> Vec<FileId> {
        self.unpaused.lock().unwrap().clone()
    }

    pub(crate) fn file_id(&self, filename: &str) -> Option<FileId> {
        self.state
            .lock()
            .unwrap()
            .files
            .iter()
            .find(|f| f.filename == filename)
            .map(|f| f.id)
    }
}

#[async_trait]
impl DownloadEngine for MemoryEngine {
    async fn snapshot(&self) -> DownloadQueueSnapshot {
        self.state.lock().unwrap().clone()
    }

    async fn set_paused(&self, ids: &[FileId], paused: bool) -> crate::Result<()> {
        let mut state = self.state.lock().unwrap();
        for file in state.files.iter_mut().filter(|f| ids.contains(&f.id)) {
            file.paused = paused;
        }
        if !paused {
            self.unpaused.lock().unwrap().extend_from_slice(ids);
        }
        Ok(())
    }

    async fn remove_files(&self, ids: &[FileId]) -> crate::Result<()> {
        self.state
            .lock()
            .unwrap()
            .files
            .retain(|f| !ids.contains(&f.id));
        self.removed.lock().unwrap().extend_from_slice(ids);
        Ok(())
    }
}

/// PAR2 handler that "repairs" by rewriting the original files
///
/// Repair only succeeds when the set's volumes on disk carry at least
/// `blocks_needed` recovery blocks, mirroring what par2 would do.
pub(crate) struct RestoringParity {
    pub(crate) blocks_needed: u32,
    pub(crate) originals: Vec<(PathBuf, Vec<u8>)>,
    pub(crate) repairs: AtomicU64,
}

impl RestoringParity {
    pub(crate) fn new(blocks_needed: u32, originals: Vec<(PathBuf, Vec<u8>)>) -> Self {
        Self {
            blocks_needed,
            originals,
            repairs: AtomicU64::new(0),
        }
    }

    fn blocks_on_disk(dir: &Path) -> u32 {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .filter_map(|name| parse_par_filename(&name).map(|(_, b)| b))
                    .sum()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl ParityHandler for RestoringParity {
    async fn verify(&self, par2_file: &Path) -> crate::Result<VerifyResult> {
        let available = par2_file.parent().map(Self::blocks_on_disk).unwrap_or(0);
        Ok(VerifyResult {
            is_complete: false,
            blocks_needed: self.blocks_needed,
            recovery_blocks_available: available,
            repairable: available >= self.blocks_needed,
            ..VerifyResult::default()
        })
    }

    async fn repair(&self, par2_file: &Path) -> crate::Result<RepairResult> {
        self.repairs.fetch_add(1, Ordering::SeqCst);
        let available = par2_file.parent().map(Self::blocks_on_disk).unwrap_or(0);
        if available < self.blocks_needed {
            return Ok(RepairResult {
                success: false,
                error: Some("Repair is not possible.".into()),
                ..RepairResult::default()
            });
        }
        for (path, content) in &self.originals {
            std::fs::write(path, content)?;
        }
        Ok(RepairResult {
            success: true,
            repaired_files: self
                .originals
                .iter()
                .map(|(p, _)| p.display().to_string())
                .collect(),
            ..RepairResult::default()
        })
    }

    fn capabilities(&self) -> ParityCapabilities {
        ParityCapabilities {
            can_verify: true,
            can_repair: true,
        }
    }

    fn name(&self) -> &'static str {
        "restoring"
    }
}

/// Fast-polling config without a script
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.poll_interval = std::time::Duration::from_millis(10);
    config
}

pub(crate) fn processor(
    config: Config,
    engine: Arc<MemoryEngine>,
    parity: Option<Arc<dyn ParityHandler>>,
) -> Arc<PostProcessor> {
    let parity =
        parity.unwrap_or_else(|| Arc::new(NoOpParityHandler) as Arc<dyn ParityHandler>);
    Arc::new(PostProcessor::with_parity_handler(config, engine, parity).unwrap())
}

/// Tick until no pending jobs remain (bounded)
pub(crate) async fn drain(processor: &PostProcessor, engine: &MemoryEngine) {
    for _ in 0..200 {
        processor.tick().await;
        engine.download_unpaused(b"volume");
        if !processor.has_more_jobs() && processor.lock_post_queue().await.is_empty() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("post queue did not drain");
}
