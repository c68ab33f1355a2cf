//! The scheduler task

use super::PostProcessor;
use super::stages::Step;
use crate::types::Event;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl PostProcessor {
    /// Spawn the scheduler task
    ///
    /// The task runs until [`shutdown`](Self::shutdown). Each iteration detects
    /// newly finished collections, advances the head job by one stage step and
    /// then sleeps for `queue.poll_interval` unless woken earlier.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let processor = Arc::clone(self);
        tokio::spawn(async move { processor.run().await })
    }

    async fn run(&self) {
        info!(
            poll_interval = ?self.config.queue.poll_interval,
            "post-processor scheduler started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.tick().await {
                // keep going without sleeping while the head job makes progress
                self.wake.notify_one();
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.queue.poll_interval) => {}
            }
        }

        info!("post-processor scheduler stopped");
    }

    /// Run one scheduler iteration
    ///
    /// Returns true when the head job moved to another stage or finished.
    /// Useful for embedding the processor in a loop of your own.
    pub async fn tick(&self) -> bool {
        let snapshot = self.engine.snapshot().await;
        if let Err(e) = self.coordinator.detect_new_collections(&snapshot).await {
            warn!(error = %e, "failed to detect finished collections");
        }

        let mut active = self.active.lock().await;
        match self.advance(&mut active).await {
            Ok(step) => {
                debug!(step = ?step, "scheduler tick");
                step == Step::Progressed
            }
            Err(e) => {
                self.force_forward(&mut active, &e).await;
                true
            }
        }
    }

    /// Stop the scheduler and kill a running script
    ///
    /// A stage step already in progress completes first. A job whose script
    /// was killed stays pending.
    pub async fn shutdown(&self) {
        info!("shutting down post-processor");
        self.cancel.cancel();

        let mut guard = self.queue.lock().await;
        if let Some(job) = guard.head_mut()
            && let Some(mut process) = job.take_process()
        {
            if let Err(e) = process.terminate() {
                warn!(collection = %job.nzb_name(), error = %e, "failed to kill script");
            }
            job.update_progress("Terminated on shutdown", 0, 0);
            info!(
                collection = %job.nzb_name(),
                pid = ?process.id(),
                "terminated post-process script"
            );
            self.emit_event(Event::ScriptFinished {
                collection: job.nzb_name().to_string(),
                exit_code: None,
            });
        }
    }
}
