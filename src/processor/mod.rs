//! The post-processor: queue, coordinator, PAR2 engine and scheduler wired together
//!
//! [`PostProcessor`] is handed to the download engine as its
//! [`QueueObserver`] and runs a single scheduler task that advances the head
//! of the post queue one stage step at a time.

mod callbacks;
mod scheduler;
mod stages;

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::coordinator::QueueCoordinator;
use crate::engine::{DownloadEngine, DownloadQueueSnapshot, QueueAspect, QueueObserver};
use crate::error::Result;
use crate::parity::{CliParityHandler, NoOpParityHandler, ParChecker, ParityHandler};
use crate::post_queue::{PostJob, PostQueue, PostQueueGuard};
use crate::script::ScriptRunner;
use crate::types::Event;
use async_trait::async_trait;
use callbacks::PostParCallbacks;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// PAR2 work in progress for the head job
pub(crate) struct ParSession {
    pub(crate) collection: String,
    pub(crate) checker: ParChecker,
    pub(crate) callbacks: Arc<PostParCallbacks>,
}

/// Post-processing pipeline for finished downloads
///
/// ```no_run
/// use std::sync::Arc;
/// use usenet_postproc::{Config, DownloadEngine, PostProcessor};
///
/// # async fn example(engine: Arc<dyn DownloadEngine>) -> usenet_postproc::Result<()> {
/// let processor = Arc::new(PostProcessor::new(Config::default(), engine)?);
/// let mut events = processor.subscribe();
/// let scheduler = processor.start();
///
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
///
/// processor.shutdown().await;
/// scheduler.await.ok();
/// # Ok(())
/// # }
/// ```
pub struct PostProcessor {
    pub(crate) config: Arc<Config>,
    pub(crate) queue: Arc<PostQueue>,
    pub(crate) engine: Arc<dyn DownloadEngine>,
    pub(crate) parity: Arc<dyn ParityHandler>,
    pub(crate) scripts: ScriptRunner,
    pub(crate) coordinator: QueueCoordinator,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) cancel: CancellationToken,
    pub(crate) wake: Notify,
    /// Step lock; also holds the head job's PAR2 session between ticks
    pub(crate) active: Mutex<Option<ParSession>>,
}

impl PostProcessor {
    /// Create a processor, picking the PAR2 handler from `config.tools`
    pub fn new(config: Config, engine: Arc<dyn DownloadEngine>) -> Result<Self> {
        let parity: Arc<dyn ParityHandler> = match CliParityHandler::from_config(&config.tools) {
            Some(handler) => Arc::new(handler),
            None => Arc::new(NoOpParityHandler),
        };
        Self::with_parity_handler(config, engine, parity)
    }

    /// Create a processor with an explicit PAR2 handler
    pub fn with_parity_handler(
        config: Config,
        engine: Arc<dyn DownloadEngine>,
        parity: Arc<dyn ParityHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let caps = parity.capabilities();
        tracing::info!(
            parity_handler = parity.name(),
            can_verify = caps.can_verify,
            can_repair = caps.can_repair,
            "parity handler initialized"
        );

        let config = Arc::new(config);
        let queue = Arc::new(PostQueue::new(config.queue.max_completed_jobs));
        let (event_tx, _rx) = broadcast::channel(1000);
        let coordinator = QueueCoordinator::new(
            config.clone(),
            queue.clone(),
            engine.clone(),
            event_tx.clone(),
        );

        Ok(Self {
            scripts: ScriptRunner::new(&config.script),
            config,
            queue,
            engine,
            parity,
            coordinator,
            event_tx,
            cancel: CancellationToken::new(),
            wake: Notify::new(),
            active: Mutex::new(None),
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Exclusive access to the post queue
    ///
    /// Hold the guard briefly; the scheduler waits for it.
    pub async fn lock_post_queue(&self) -> PostQueueGuard<'_> {
        self.queue.lock().await
    }

    /// Whether jobs are pending, without taking the lock
    pub fn has_more_jobs(&self) -> bool {
        self.queue.has_more_jobs()
    }

    /// Drain finished jobs
    pub async fn take_completed(&self) -> Vec<PostJob> {
        self.queue.lock().await.take_completed()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Name of the PAR2 handler in use
    pub fn parity_handler_name(&self) -> &'static str {
        self.parity.name()
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // no subscribers is fine
        self.event_tx.send(event).ok();
    }
}

#[async_trait]
impl QueueObserver for PostProcessor {
    async fn queue_changed(&self, snapshot: &DownloadQueueSnapshot, aspect: Option<&QueueAspect>) {
        if self.is_shutting_down() {
            return;
        }
        if let Some(aspect) = aspect {
            self.coordinator.handle_aspect(snapshot, aspect).await;
        }
        // enqueueing needs a directory scan, which runs on the scheduler
        if self.coordinator.has_new_collections(snapshot).await {
            tracing::debug!("finished collections seen, waking scheduler");
        }

        // never wait for the scheduler; it will pick up whatever is left
        if let Ok(_step) = self.active.try_lock() {
            self.advance_sync().await;
        }
        self.wake.notify_one();
    }
}
