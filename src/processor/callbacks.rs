//! PAR2 engine callbacks bound to one post job

use crate::engine::{DownloadEngine, DownloadQueueSnapshot, FileId};
use crate::parity::{ParCallbacks, ParProgress, list_par_files, select_blocks};
use crate::post_queue::PostQueue;
use crate::types::Event;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Routes progress into the job and fetches volumes from the download queue
pub(crate) struct PostParCallbacks {
    collection: String,
    dest_dir: PathBuf,
    par_filename: String,
    queue: Arc<PostQueue>,
    engine: Arc<dyn DownloadEngine>,
    event_tx: broadcast::Sender<Event>,
    requested: Mutex<Vec<FileId>>,
}

impl PostParCallbacks {
    pub(crate) fn new(
        collection: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        par_filename: impl Into<String>,
        queue: Arc<PostQueue>,
        engine: Arc<dyn DownloadEngine>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            collection: collection.into(),
            dest_dir: dest_dir.into(),
            par_filename: par_filename.into(),
            queue,
            engine,
            event_tx,
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Requested volumes still in the download queue
    ///
    /// Forgets the request once every volume has left the queue.
    pub(crate) fn outstanding(&self, snapshot: &DownloadQueueSnapshot) -> usize {
        let Ok(mut requested) = self.requested.lock() else {
            return 0;
        };
        let waiting = requested
            .iter()
            .filter(|id| snapshot.contains_file(**id))
            .count();
        if waiting == 0 {
            requested.clear();
        }
        waiting
    }

    pub(crate) fn has_requests(&self) -> bool {
        self.requested
            .lock()
            .map(|requested| !requested.is_empty())
            .unwrap_or(false)
    }

    async fn on_disk(&self) -> Vec<String> {
        match list_par_files(&self.dest_dir).await {
            Ok(files) => files.into_iter().map(|(name, _)| name).collect(),
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "could not list PAR2 files");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ParCallbacks for PostParCallbacks {
    async fn request_more_blocks(&self, blocks_needed: u32) -> u32 {
        let snapshot = self.engine.snapshot().await;
        let on_disk = self.on_disk().await;
        let selection = select_blocks(
            &snapshot,
            &self.collection,
            &self.par_filename,
            &on_disk,
            blocks_needed,
        );

        self.event_tx
            .send(Event::BlocksRequested {
                collection: self.collection.clone(),
                needed: blocks_needed,
                found: selection.found,
            })
            .ok();

        if !selection.covers(blocks_needed) {
            return selection.found;
        }

        let ids = selection.file_ids();
        if let Err(e) = self.engine.set_paused(&ids, false).await {
            warn!(
                collection = %self.collection,
                error = %e,
                "failed to unpause PAR2 volumes"
            );
            return 0;
        }

        info!(
            collection = %self.collection,
            needed = blocks_needed,
            found = selection.found,
            files = ids.len(),
            "unpaused PAR2 volumes for repair"
        );
        if let Ok(mut requested) = self.requested.lock() {
            requested.extend(ids);
        }
        selection.found
    }

    async fn report_progress(&self, progress: ParProgress) {
        {
            let mut guard = self.queue.lock().await;
            let Some(job) = guard.find_mut(&self.collection) else {
                return;
            };
            job.update_progress(
                progress.label.clone(),
                progress.file_progress,
                progress.stage_progress,
            );
        }

        self.event_tx
            .send(Event::Progress {
                collection: self.collection.clone(),
                label: progress.label,
                file_progress: progress.file_progress,
                stage_progress: progress.stage_progress,
            })
            .ok();
    }
}
