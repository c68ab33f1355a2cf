//! PAR2 recovery-set metadata and quick source verification
//!
//! Packet layout (all integers little-endian):
//!
//! | offset | size | field                        |
//! |--------|------|------------------------------|
//! | 0      | 8    | magic `PAR2\0PKT`            |
//! | 8      | 8    | packet length incl. header   |
//! | 16     | 16   | MD5 of the packet body       |
//! | 32     | 16   | recovery set id              |
//! | 48     | 16   | packet type                  |
//! | 64     | ...  | body                         |
//!
//! `Main` bodies start with the slice size (u64). `FileDesc` bodies hold the
//! file id, full MD5, MD5 of the first 16 KiB, length (u64) and the
//! null-padded file name.

use crate::error::{PostProcessError, Result};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"PAR2\0PKT";
const MAIN_TYPE: &[u8; 16] = b"PAR 2.0\0Main\0\0\0\0";
const FILE_DESC_TYPE: &[u8; 16] = b"PAR 2.0\0FileDesc";
const HEADER_LEN: usize = 64;
const TYPE_AT: usize = 48;
const FILE_DESC_FIXED: usize = 56;
const HASH_16K_LEN: usize = 16 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// A source file protected by a recovery set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    /// PAR2 file id
    pub file_id: [u8; 16],
    /// Name relative to the set's directory
    pub filename: String,
    /// MD5 of the whole file
    pub md5: [u8; 16],
    /// MD5 of the first 16 KiB
    pub md5_16k: [u8; 16],
    /// Length in bytes
    pub length: u64,
}

impl SourceFile {
    /// Data blocks this file occupies for a given slice size
    pub fn block_count(&self, slice_size: u64) -> u32 {
        if slice_size == 0 {
            return 1;
        }
        u32::try_from(self.length.div_ceil(slice_size).max(1)).unwrap_or(u32::MAX)
    }
}

/// Metadata loaded from a PAR2 file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoverySet {
    /// Slice (block) size; 0 when no Main packet was seen
    pub slice_size: u64,
    /// Described source files, in packet order, unique by file id
    pub files: Vec<SourceFile>,
}

/// Result of checking a single source file against its description
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCheck {
    /// Length and MD5 match
    Intact,
    /// File is not on disk
    Missing,
    /// File exists but its length or content differs
    Damaged,
}

impl RecoverySet {
    /// Parse raw PAR2 bytes
    ///
    /// Corrupt or truncated packets are skipped; parsing resumes at the next
    /// magic.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut set = RecoverySet::default();
        let mut seen = HashSet::new();
        let mut pos = 0;

        while let Some(at) = find_magic(data, pos) {
            pos = at;
            if pos + HEADER_LEN > data.len() {
                break;
            }

            let len = read_u64(data, pos + 8).and_then(|l| usize::try_from(l).ok());
            let Some(len) = len.filter(|&l| {
                l >= HEADER_LEN && pos.checked_add(l).is_some_and(|end| end <= data.len())
            }) else {
                pos += MAGIC.len();
                continue;
            };

            let kind = &data[pos + TYPE_AT..pos + HEADER_LEN];
            let body = &data[pos + HEADER_LEN..pos + len];

            if kind == MAIN_TYPE {
                if let Some(slice) = read_u64(body, 0) {
                    set.slice_size = slice;
                }
            } else if kind == FILE_DESC_TYPE {
                if let Some(file) = parse_file_desc(body) {
                    if seen.insert(file.file_id) {
                        set.files.push(file);
                    }
                }
            }

            pos += len;
        }

        set
    }

    /// Read and parse a PAR2 file
    ///
    /// A file without any file description is not a usable PAR2 file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| PostProcessError::InvalidParFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let set = Self::from_bytes(&data);
        if set.files.is_empty() {
            return Err(PostProcessError::InvalidParFile {
                path: path.to_path_buf(),
                reason: "no file description packets".into(),
            }
            .into());
        }
        Ok(set)
    }

    /// Data blocks of all described files
    pub fn total_blocks(&self) -> u32 {
        self.files
            .iter()
            .map(|f| f.block_count(self.slice_size))
            .fold(0u32, u32::saturating_add)
    }
}

fn find_magic(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(MAGIC.len())
        .position(|w| w == MAGIC)
        .map(|offset| from + offset)
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

fn read_hash(data: &[u8], at: usize) -> Option<[u8; 16]> {
    data.get(at..at + 16)?.try_into().ok()
}

fn parse_file_desc(body: &[u8]) -> Option<SourceFile> {
    if body.len() <= FILE_DESC_FIXED {
        return None;
    }
    let name = &body[FILE_DESC_FIXED..];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    let filename = String::from_utf8_lossy(&name[..end]).into_owned();
    if filename.is_empty() {
        return None;
    }

    Some(SourceFile {
        file_id: read_hash(body, 0)?,
        md5: read_hash(body, 16)?,
        md5_16k: read_hash(body, 32)?,
        length: read_u64(body, 48)?,
        filename,
    })
}

/// Compare a source file on disk with its description
///
/// Blocking; run it on the blocking pool.
pub fn check_source_file(dir: &Path, file: &SourceFile) -> std::io::Result<FileCheck> {
    let path: PathBuf = dir.join(&file.filename);
    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileCheck::Missing),
        Err(e) => return Err(e),
    };
    if !meta.is_file() {
        return Ok(FileCheck::Missing);
    }
    if meta.len() != file.length {
        return Ok(FileCheck::Damaged);
    }

    let mut reader = std::fs::File::open(&path)?;
    let mut full = md5::Context::new();
    let mut head = md5::Context::new();
    let mut hashed = 0usize;
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if hashed < HASH_16K_LEN {
            let take = n.min(HASH_16K_LEN - hashed);
            head.consume(&buf[..take]);
            hashed += take;
        }
        full.consume(&buf[..n]);
    }

    if head.compute().0 != file.md5_16k || full.compute().0 != file.md5 {
        return Ok(FileCheck::Damaged);
    }
    Ok(FileCheck::Intact)
}
