//! Recovery-block accounting over the download queue
//!
//! PAR2 volumes that are still paused in the download queue are a reserve of
//! recovery blocks. When repair needs more blocks than are on disk, the
//! cheapest subset of that reserve is unpaused.

use super::filename::{parse_par_filename, same_par_collection};
use crate::config::LoadPars;
use crate::engine::{DownloadQueueSnapshot, FileId, QueuedFile};
use std::collections::HashSet;

/// A paused PAR2 volume and the recovery blocks it carries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// The queued file
    pub file: QueuedFile,
    /// Recovery blocks in the volume
    pub block_count: u32,
}

/// Outcome of [`select_blocks`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockSelection {
    /// Blocks in `selected`, or the whole reserve when it cannot cover the deficit
    pub found: u32,
    /// Volumes to unpause; empty when the reserve is insufficient
    pub selected: Vec<BlockInfo>,
}

impl BlockSelection {
    /// File ids to unpause
    pub fn file_ids(&self) -> Vec<FileId> {
        self.selected.iter().map(|b| b.file.id).collect()
    }

    /// Whether the selection covers `needed`
    pub fn covers(&self, needed: u32) -> bool {
        !self.selected.is_empty() && self.found >= needed
    }
}

fn is_on_disk(on_disk: &[String], filename: &str) -> bool {
    on_disk.iter().any(|name| name.eq_ignore_ascii_case(filename))
}

/// Paused volumes of a collection not yet on disk
///
/// With `strict`, only volumes of the same set as `par_filename` count.
/// Volumes without recovery blocks (index files) never count.
pub fn find_pars(
    snapshot: &DownloadQueueSnapshot,
    nzb_name: &str,
    par_filename: &str,
    on_disk: &[String],
    strict: bool,
) -> Vec<BlockInfo> {
    snapshot
        .files_of(nzb_name)
        .filter(|file| file.paused && !is_on_disk(on_disk, &file.filename))
        .filter(|file| !strict || same_par_collection(par_filename, &file.filename))
        .filter_map(|file| {
            let (_, block_count) = parse_par_filename(&file.filename)?;
            (block_count > 0).then(|| BlockInfo {
                file: file.clone(),
                block_count,
            })
        })
        .collect()
}

fn total_blocks(blocks: &[BlockInfo]) -> u32 {
    blocks
        .iter()
        .map(|b| b.block_count)
        .fold(0u32, u32::saturating_add)
}

/// Choose paused volumes that together provide at least `needed` blocks
///
/// Volumes of the same set are tried first; when they cannot cover the
/// deficit every paused PAR2 file of the collection is considered. A single
/// volume that closes the deficit on its own wins (the smallest such one);
/// otherwise volumes are taken smallest first until the deficit is covered.
///
/// When even the whole reserve is too small nothing is selected and `found`
/// reports the size of the reserve.
pub fn select_blocks(
    snapshot: &DownloadQueueSnapshot,
    nzb_name: &str,
    par_filename: &str,
    on_disk: &[String],
    needed: u32,
) -> BlockSelection {
    if needed == 0 {
        return BlockSelection::default();
    }

    let mut candidates = find_pars(snapshot, nzb_name, par_filename, on_disk, true);
    if total_blocks(&candidates) < needed {
        candidates = find_pars(snapshot, nzb_name, par_filename, on_disk, false);
    }

    let reserve = total_blocks(&candidates);
    if reserve < needed {
        return BlockSelection {
            found: reserve,
            selected: Vec::new(),
        };
    }

    candidates.sort_by(|a, b| {
        a.block_count
            .cmp(&b.block_count)
            .then_with(|| a.file.filename.cmp(&b.file.filename))
    });

    if let Some(single) = candidates.iter().find(|b| b.block_count >= needed) {
        return BlockSelection {
            found: single.block_count,
            selected: vec![single.clone()],
        };
    }

    let mut selection = BlockSelection::default();
    for block in candidates {
        if selection.found >= needed {
            break;
        }
        selection.found = selection.found.saturating_add(block.block_count);
        selection.selected.push(block);
    }
    selection
}

/// PAR2 files to pause when a collection is added
///
/// `All` downloads everything. `One` keeps the smallest file of each set
/// downloading and pauses the rest. `None` pauses every PAR2 file.
pub fn pars_to_pause<'a>(
    files: impl IntoIterator<Item = &'a QueuedFile>,
    load_pars: LoadPars,
) -> Vec<FileId> {
    let mut pars: Vec<(&QueuedFile, u32)> = files
        .into_iter()
        .filter_map(|f| parse_par_filename(&f.filename).map(|(_, blocks)| (f, blocks)))
        .collect();

    match load_pars {
        LoadPars::All => Vec::new(),
        LoadPars::None => pars
            .into_iter()
            .filter(|(f, _)| !f.paused)
            .map(|(f, _)| f.id)
            .collect(),
        LoadPars::One => {
            pars.sort_by(|(a, a_blocks), (b, b_blocks)| {
                a_blocks
                    .cmp(b_blocks)
                    .then_with(|| a.filename.cmp(&b.filename))
            });
            let mut kept: Vec<&str> = Vec::new();
            let mut paused = Vec::new();
            for (file, _) in pars {
                if kept.iter().any(|k| same_par_collection(k, &file.filename)) {
                    if !file.paused {
                        paused.push(file.id);
                    }
                } else {
                    kept.push(&file.filename);
                }
            }
            paused
        }
    }
}

/// Paused PAR2 files to unpause so verification has something to load
///
/// For every set in the queue with no file on disk, the smallest paused file
/// of that set is returned. Empty when every set already has a file on disk.
pub fn main_pars_to_unpause(
    snapshot: &DownloadQueueSnapshot,
    nzb_name: &str,
    on_disk: &[String],
) -> Vec<FileId> {
    let mut pars: Vec<(&QueuedFile, u32)> = snapshot
        .files_of(nzb_name)
        .filter(|f| f.paused)
        .filter_map(|f| parse_par_filename(&f.filename).map(|(_, blocks)| (f, blocks)))
        .collect();
    pars.sort_by(|(a, a_blocks), (b, b_blocks)| {
        a_blocks
            .cmp(b_blocks)
            .then_with(|| a.filename.cmp(&b.filename))
    });

    let mut seen: Vec<&str> = on_disk.iter().map(String::as_str).collect();
    let mut unpause = Vec::new();
    for (file, _) in pars {
        if !seen.iter().any(|s| same_par_collection(s, &file.filename)) {
            seen.push(&file.filename);
            unpause.push(file.id);
        }
    }
    unpause
}

/// Paused PAR2 files of a collection, for cleanup once repair is settled
pub fn leftover_pars(snapshot: &DownloadQueueSnapshot, nzb_name: &str) -> Vec<FileId> {
    let mut seen = HashSet::new();
    snapshot
        .files_of(nzb_name)
        .filter(|f| f.paused && parse_par_filename(&f.filename).is_some())
        .filter(|f| seen.insert(f.id))
        .map(|f| f.id)
        .collect()
}
