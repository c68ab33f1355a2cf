//! Boundary to the download engine
//!
//! The post-processor never downloads anything itself. It reads snapshots of the
//! engine's queue, pauses and unpauses PAR2 files, and removes leftovers. The
//! engine in turn reports changes through [`QueueObserver`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Identifier of a file in the download queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A collection (one NZB) known to the download engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// NZB file name; unique key of the collection
    pub nzb_name: String,
    /// Directory the collection's files are written to
    pub dest_dir: PathBuf,
    /// Name shown to users
    pub info_name: String,
}

/// A file still waiting in the download queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedFile {
    /// Queue-wide file id
    pub id: FileId,
    /// NZB name of the owning collection
    pub nzb_name: String,
    /// File name as it will appear in the destination directory
    pub filename: String,
    /// Paused files are not downloaded until unpaused
    pub paused: bool,
}

/// Point-in-time view of the download queue
///
/// Completed files leave `files`; a collection stays in `collections` until the
/// engine forgets it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadQueueSnapshot {
    /// Collections the engine is tracking
    pub collections: Vec<CollectionInfo>,
    /// Files not yet downloaded
    pub files: Vec<QueuedFile>,
}

impl DownloadQueueSnapshot {
    /// Files of one collection still in the queue
    pub fn files_of<'a>(&'a self, nzb_name: &'a str) -> impl Iterator<Item = &'a QueuedFile> + 'a {
        self.files.iter().filter(move |f| f.nzb_name == nzb_name)
    }

    /// Collection metadata by NZB name
    pub fn collection(&self, nzb_name: &str) -> Option<&CollectionInfo> {
        self.collections.iter().find(|c| c.nzb_name == nzb_name)
    }

    /// A collection is finished when none of its remaining files would still be downloaded
    pub fn is_collection_finished(&self, nzb_name: &str) -> bool {
        self.files_of(nzb_name).all(|f| f.paused)
    }

    /// Whether a file id is still in the queue
    pub fn contains_file(&self, id: FileId) -> bool {
        self.files.iter().any(|f| f.id == id)
    }
}

/// What changed in the download queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueAspect {
    /// A new collection was added
    CollectionAdded {
        /// NZB name
        nzb_name: String,
    },
    /// A file finished downloading and left the queue
    FileCompleted {
        /// The file that completed
        file: QueuedFile,
    },
    /// A file was removed without being downloaded
    FileDeleted {
        /// The file that was removed
        file: QueuedFile,
    },
    /// A whole collection was removed from the engine
    CollectionDeleted {
        /// NZB name
        nzb_name: String,
    },
}

/// Operations the post-processor needs from the download engine
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Current view of the download queue
    async fn snapshot(&self) -> DownloadQueueSnapshot;

    /// Pause or unpause queued files; unknown ids are ignored
    async fn set_paused(&self, ids: &[FileId], paused: bool) -> Result<()>;

    /// Drop queued files without downloading them; unknown ids are ignored
    async fn remove_files(&self, ids: &[FileId]) -> Result<()>;
}

/// Change notification raised by the download engine
///
/// Called from whichever task mutated the queue. Implementations take the post
/// queue guard themselves, so callers must not hold it.
#[async_trait]
pub trait QueueObserver: Send + Sync {
    /// The download queue changed
    async fn queue_changed(&self, snapshot: &DownloadQueueSnapshot, aspect: Option<&QueueAspect>);
}
