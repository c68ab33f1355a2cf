//! Post queue: pending and completed jobs behind one lock
//!
//! Every read or write of a [`PostJob`] goes through a [`PostQueueGuard`]. The
//! guard is released when it goes out of scope, so early returns and `?` can
//! never leave the queue locked. Holders must not perform I/O or await anything
//! slow while the guard is alive.
//!
//! ```
//! use usenet_postproc::post_queue::{PostJob, PostQueue};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = PostQueue::new(100);
//! {
//!     let mut guard = queue.lock().await;
//!     guard.push_back(PostJob::new("a.nzb", "/dl/a", None, "a", false));
//! }
//! assert!(queue.has_more_jobs());
//! # }
//! ```

mod job;

pub use job::PostJob;

use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PostJob>,
    completed: VecDeque<PostJob>,
    // collections that finished, kept after their jobs are drained or evicted
    processed: HashSet<String>,
}

/// Ordered pending jobs plus the completed collection
#[derive(Debug)]
pub struct PostQueue {
    state: Mutex<QueueState>,
    has_more_jobs: AtomicBool,
    max_completed: usize,
}

impl PostQueue {
    /// Create an empty queue retaining at most `max_completed` finished jobs
    pub fn new(max_completed: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            has_more_jobs: AtomicBool::new(false),
            max_completed,
        }
    }

    /// Acquire exclusive access; waits while another holder has it
    pub async fn lock(&self) -> PostQueueGuard<'_> {
        PostQueueGuard {
            state: self.state.lock().await,
            queue: self,
        }
    }

    /// Acquire exclusive access only if nobody holds it
    pub fn try_lock(&self) -> Option<PostQueueGuard<'_>> {
        self.state.try_lock().ok().map(|state| PostQueueGuard { state, queue: self })
    }

    /// Whether pending jobs exist, as of the last guard release
    pub fn has_more_jobs(&self) -> bool {
        self.has_more_jobs.load(Ordering::SeqCst)
    }
}

/// Scoped exclusive access to the post queue
pub struct PostQueueGuard<'a> {
    state: MutexGuard<'a, QueueState>,
    queue: &'a PostQueue,
}

impl PostQueueGuard<'_> {
    /// Pending jobs, head first
    pub fn pending(&self) -> &VecDeque<PostJob> {
        &self.state.pending
    }

    /// Live pending queue
    pub fn pending_mut(&mut self) -> &mut VecDeque<PostJob> {
        &mut self.state.pending
    }

    /// Finished jobs not yet drained, oldest first
    pub fn completed(&self) -> &VecDeque<PostJob> {
        &self.state.completed
    }

    /// Job currently being advanced
    pub fn head(&self) -> Option<&PostJob> {
        self.state.pending.front()
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut PostJob> {
        self.state.pending.front_mut()
    }

    /// Append a job to the tail of pending
    pub fn push_back(&mut self, job: PostJob) {
        self.state.pending.push_back(job);
    }

    /// Whether a job for this collection is pending or has finished
    ///
    /// Finished collections stay known after [`take_completed`](Self::take_completed)
    /// until [`clear_completed`](Self::clear_completed) or [`forget`](Self::forget).
    pub fn contains(&self, nzb_name: &str) -> bool {
        self.state.processed.contains(nzb_name)
            || self
                .state
                .pending
                .iter()
                .any(|job| job.nzb_name() == nzb_name)
    }

    /// Pending job for a collection
    pub fn find(&self, nzb_name: &str) -> Option<&PostJob> {
        self.state
            .pending
            .iter()
            .find(|job| job.nzb_name() == nzb_name)
    }

    pub(crate) fn find_mut(&mut self, nzb_name: &str) -> Option<&mut PostJob> {
        self.state
            .pending
            .iter_mut()
            .find(|job| job.nzb_name() == nzb_name)
    }

    /// Remove a pending job that has not started yet
    ///
    /// Jobs past [`Stage::Queued`](crate::types::Stage::Queued) are left alone.
    pub fn remove_queued(&mut self, nzb_name: &str) -> Option<PostJob> {
        let index = self.state.pending.iter().position(|job| {
            job.nzb_name() == nzb_name && job.stage() == crate::types::Stage::Queued
        })?;
        self.state.pending.remove(index)
    }

    /// Move the finished head job into the completed collection
    pub(crate) fn complete_head(&mut self) -> Option<&PostJob> {
        let head = self.state.pending.front()?;
        if !head.stage().is_finished() {
            return None;
        }
        let job = self.state.pending.pop_front()?;
        self.state.processed.insert(job.nzb_name().to_string());
        self.state.completed.push_back(job);
        while self.state.completed.len() > self.queue.max_completed {
            if let Some(evicted) = self.state.completed.pop_front() {
                tracing::debug!(
                    collection = %evicted.nzb_name(),
                    "evicting undrained completed job"
                );
            }
        }
        self.state.completed.back()
    }

    /// Drain every completed job
    pub fn take_completed(&mut self) -> Vec<PostJob> {
        self.state.completed.drain(..).collect()
    }

    /// Forget completed jobs of a collection so it can be processed again
    pub fn clear_completed(&mut self, nzb_name: &str) -> usize {
        self.state.processed.remove(nzb_name);
        let before = self.state.completed.len();
        self.state
            .completed
            .retain(|job| job.nzb_name() != nzb_name);
        before - self.state.completed.len()
    }

    /// Keep processed records only for collections `keep` accepts
    ///
    /// Returns the number of records dropped. Pending and completed jobs are
    /// not touched.
    pub fn retain_processed(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.state.processed.len();
        self.state.processed.retain(|name| keep(name));
        before - self.state.processed.len()
    }

    /// Drop every trace of a collection that left the download queue
    ///
    /// A job that already started is kept and finishes normally.
    pub fn forget(&mut self, nzb_name: &str) -> Option<PostJob> {
        self.clear_completed(nzb_name);
        self.remove_queued(nzb_name)
    }
}

impl Deref for PostQueueGuard<'_> {
    type Target = VecDeque<PostJob>;

    fn deref(&self) -> &Self::Target {
        &self.state.pending
    }
}

impl Drop for PostQueueGuard<'_> {
    fn drop(&mut self) {
        self.queue
            .has_more_jobs
            .store(!self.state.pending.is_empty(), Ordering::SeqCst);
    }
}
