//! Reacting to download-queue changes
//!
//! Decides when a collection is ready for post-processing and applies the
//! PAR2 download policy to freshly added collections. Only the parts that are
//! cheap run under the post queue guard; directory scans and engine calls
//! happen with the guard released, and only on the scheduler's task.

use crate::config::Config;
use crate::engine::{CollectionInfo, DownloadEngine, DownloadQueueSnapshot, QueueAspect};
use crate::error::Result;
use crate::parity::{find_main_pars, main_pars_to_unpause, pars_to_pause};
use crate::post_queue::{PostJob, PostQueue, PostQueueGuard};
use crate::types::Event;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Turns download-queue changes into post jobs
pub struct QueueCoordinator {
    config: Arc<Config>,
    queue: Arc<PostQueue>,
    engine: Arc<dyn DownloadEngine>,
    event_tx: broadcast::Sender<Event>,
}

impl QueueCoordinator {
    /// Create a coordinator feeding `queue`
    pub fn new(
        config: Arc<Config>,
        queue: Arc<PostQueue>,
        engine: Arc<dyn DownloadEngine>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            queue,
            engine,
            event_tx,
        }
    }

    /// Apply per-aspect policy
    pub async fn handle_aspect(&self, snapshot: &DownloadQueueSnapshot, aspect: &QueueAspect) {
        match aspect {
            QueueAspect::CollectionAdded { nzb_name } => {
                let cleared = self.queue.lock().await.clear_completed(nzb_name);
                if cleared > 0 {
                    debug!(
                        collection = %nzb_name,
                        cleared,
                        "re-added collection, dropped completed job"
                    );
                }
                if let Err(e) = self.pause_pars(snapshot, nzb_name).await {
                    warn!(collection = %nzb_name, error = %e, "failed to pause PAR2 files");
                }
            }
            QueueAspect::CollectionDeleted { nzb_name } => {
                if self.queue.lock().await.forget(nzb_name).is_some() {
                    info!(collection = %nzb_name, "collection deleted, dropped queued post job");
                }
            }
            QueueAspect::FileCompleted { .. } | QueueAspect::FileDeleted { .. } => {}
        }
    }

    /// Pause the PAR2 files the `load_pars` policy does not want yet
    ///
    /// Returns the number of files paused.
    pub async fn pause_pars(
        &self,
        snapshot: &DownloadQueueSnapshot,
        nzb_name: &str,
    ) -> Result<usize> {
        let ids = pars_to_pause(snapshot.files_of(nzb_name), self.config.par.load_pars);
        if ids.is_empty() {
            return Ok(0);
        }
        self.engine.set_paused(&ids, true).await?;
        debug!(
            collection = %nzb_name,
            paused = ids.len(),
            policy = ?self.config.par.load_pars,
            "paused PAR2 files"
        );
        Ok(ids.len())
    }

    /// Whether finished collections are waiting to be enqueued
    ///
    /// Guard-only check for the observer: it does not scan directories, so
    /// the actual detection is left to [`detect_new_collections`](Self::detect_new_collections).
    pub async fn has_new_collections(&self, snapshot: &DownloadQueueSnapshot) -> bool {
        let mut guard = self.queue.lock().await;
        !candidates(&mut guard, snapshot).is_empty()
    }

    /// Enqueue every finished collection not seen before
    ///
    /// Idempotent: a collection already pending or completed is skipped.
    /// Returns the names of the collections enqueued, in queue order.
    pub async fn detect_new_collections(
        &self,
        snapshot: &DownloadQueueSnapshot,
    ) -> Result<Vec<String>> {
        let candidates = {
            let mut guard = self.queue.lock().await;
            candidates(&mut guard, snapshot)
        };

        let mut enqueued = Vec::new();
        for collection in candidates {
            let mains = scan_main_pars(&collection.dest_dir).await;

            if self.config.par.par_check && self.config.par.wait_for_pars {
                let unpause = main_pars_to_unpause(snapshot, &collection.nzb_name, &mains);
                if !unpause.is_empty() {
                    match self.engine.set_paused(&unpause, false).await {
                        Ok(()) => {
                            info!(
                                collection = %collection.nzb_name,
                                files = unpause.len(),
                                "waiting for main PAR2 files before post-processing"
                            );
                            continue;
                        }
                        Err(e) => warn!(
                            collection = %collection.nzb_name,
                            error = %e,
                            "could not unpause main PAR2 files, processing without them"
                        ),
                    }
                }
            }

            let job = PostJob::new(
                collection.nzb_name.clone(),
                collection.dest_dir.clone(),
                mains.first().cloned(),
                collection.info_name.clone(),
                self.config.par.par_check,
            );
            let par_check = job.par_check();

            {
                let mut guard = self.queue.lock().await;
                if guard.contains(&collection.nzb_name) {
                    continue;
                }
                guard.push_back(job);
            }

            info!(
                collection = %collection.nzb_name,
                par_check,
                par_sets = mains.len(),
                "collection queued for post-processing"
            );
            self.event_tx
                .send(Event::JobQueued {
                    collection: collection.nzb_name.clone(),
                    par_check,
                })
                .ok();
            enqueued.push(collection.nzb_name);
        }

        Ok(enqueued)
    }
}

/// Finished collections not pending or processed yet
///
/// Also forgets processed collections that left the download queue.
fn candidates(
    guard: &mut PostQueueGuard<'_>,
    snapshot: &DownloadQueueSnapshot,
) -> Vec<CollectionInfo> {
    let pruned = guard.retain_processed(|name| snapshot.collection(name).is_some());
    if pruned > 0 {
        debug!(pruned, "forgot collections no longer in the download queue");
    }
    snapshot
        .collections
        .iter()
        .filter(|c| snapshot.is_collection_finished(&c.nzb_name))
        .filter(|c| !guard.contains(&c.nzb_name))
        .cloned()
        .collect()
}

async fn scan_main_pars(dir: &Path) -> Vec<String> {
    match find_main_pars(dir).await {
        Ok(mains) => mains,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(dir = ?dir, error = %e, "could not scan for PAR2 files");
            Vec::new()
        }
    }
}
