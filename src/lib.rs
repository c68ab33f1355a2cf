//! # usenet-postproc
//!
//! Post-processing pipeline for Usenet download managers.
//!
//! Once every file of a collection has been downloaded, the collection enters
//! a post queue. Jobs are handled one at a time, in arrival order:
//!
//! - **PAR2 verification** - source files are checked against the recovery set
//! - **Repair** - missing recovery blocks are fetched by unpausing just enough
//!   PAR2 volumes in the download queue, then the files are rebuilt
//! - **Post-process script** - a user script runs with the job's results
//!
//! The download engine stays in charge of its queue. It implements
//! [`DownloadEngine`] and reports changes to the processor through
//! [`QueueObserver`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use usenet_postproc::{Config, DownloadEngine, PostProcessor};
//!
//! async fn run(engine: Arc<dyn DownloadEngine>) -> usenet_postproc::Result<()> {
//!     let processor = Arc::new(PostProcessor::new(Config::default(), engine)?);
//!
//!     // Subscribe to events
//!     let mut events = processor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let scheduler = processor.start();
//!     usenet_postproc::run_with_shutdown(processor).await;
//!     scheduler.await.ok();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Turns download queue changes into post jobs
pub mod coordinator;
/// Download engine boundary
pub mod engine;
/// Error types
pub mod error;
/// PAR2 verification and repair
pub mod parity;
/// Post jobs and the post queue
pub mod post_queue;
/// The post-processor and its scheduler
pub mod processor;
/// Post-process script execution
pub mod script;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, LoadPars, ParConfig, PostScriptConfig, QueueConfig, ToolsConfig};
pub use coordinator::QueueCoordinator;
pub use engine::{
    CollectionInfo, DownloadEngine, DownloadQueueSnapshot, FileId, QueueAspect, QueueObserver,
    QueuedFile,
};
pub use error::{Error, PostProcessError, Result};
pub use parity::{
    CliParityHandler, NoOpParityHandler, ParityCapabilities, ParityHandler, RepairResult,
    VerifyResult,
};
pub use post_queue::{PostJob, PostQueue, PostQueueGuard};
pub use processor::PostProcessor;
pub use script::{ScriptParams, ScriptRunner};
pub use types::{Event, ParStatus, Stage};

/// Run the processor until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A running post-process script is killed; see [`PostProcessor::shutdown`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use usenet_postproc::{Config, DownloadEngine, PostProcessor, run_with_shutdown};
///
/// async fn serve(engine: Arc<dyn DownloadEngine>) -> usenet_postproc::Result<()> {
///     let processor = Arc::new(PostProcessor::new(Config::default(), engine)?);
///     let scheduler = processor.start();
///
///     // Run with automatic signal handling
///     run_with_shutdown(processor).await;
///     scheduler.await.ok();
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(processor: std::sync::Arc<PostProcessor>) {
    wait_for_signal().await;
    processor.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
