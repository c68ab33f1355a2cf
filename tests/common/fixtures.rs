//! PAR2 fixtures and fake tools

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use usenet_postproc::{
    ParityCapabilities, ParityHandler, RepairResult, VerifyResult, parity::parse_par_filename,
};

/// Size of every recovery slice in the fixtures
pub const SLICE_SIZE: u64 = 1024;

/// Deterministic source file content spanning several slices
pub fn source_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Copy of `content` with one byte flipped in each listed slice
pub fn damage(content: &[u8], slices: &[usize]) -> Vec<u8> {
    let mut damaged = content.to_vec();
    for slice in slices {
        let at = slice * SLICE_SIZE as usize;
        if let Some(byte) = damaged.get_mut(at) {
            *byte ^= 0xff;
        }
    }
    damaged
}

fn packet(kind: &[u8; 16], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"PAR2\0PKT");
    out.extend_from_slice(&(64 + body.len() as u64).to_le_bytes());
    out.extend_from_slice(&md5::compute(body).0);
    // recovery set id
    out.extend_from_slice(&[0x42; 16]);
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

/// Bytes of a PAR2 index file protecting `files`
pub fn par2_index(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut main = SLICE_SIZE.to_le_bytes().to_vec();
    main.extend_from_slice(&(files.len() as u32).to_le_bytes());
    let mut out = packet(b"PAR 2.0\0Main\0\0\0\0", &main);

    for (name, content) in files {
        let head = &content[..content.len().min(16 * 1024)];
        let mut body = Vec::new();
        body.extend_from_slice(&md5::compute(name.as_bytes()).0);
        body.extend_from_slice(&md5::compute(content).0);
        body.extend_from_slice(&md5::compute(head).0);
        body.extend_from_slice(&(content.len() as u64).to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.resize(body.len().div_ceil(4) * 4, 0);
        out.extend(packet(b"PAR 2.0\0FileDesc", &body));
    }
    out
}

/// Stand-in for the par2 binary
///
/// Reports `blocks_needed` missing blocks and rebuilds `originals` once the
/// PAR2 volumes next to the index carry enough recovery blocks.
pub struct FakePar2 {
    blocks_needed: u32,
    originals: Vec<(PathBuf, Vec<u8>)>,
    repairs: AtomicU32,
}

impl FakePar2 {
    pub fn new(blocks_needed: u32, originals: Vec<(PathBuf, Vec<u8>)>) -> Self {
        Self {
            blocks_needed,
            originals,
            repairs: AtomicU32::new(0),
        }
    }

    pub fn repairs(&self) -> u32 {
        self.repairs.load(Ordering::SeqCst)
    }

    fn recovery_blocks(par2_file: &Path) -> u32 {
        let Some(dir) = par2_file.parent() else {
            return 0;
        };
        std::fs::read_dir(dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| parse_par_filename(&name))
            .map(|(_, blocks)| blocks)
            .sum()
    }
}

#[async_trait]
impl ParityHandler for FakePar2 {
    async fn verify(&self, par2_file: &Path) -> usenet_postproc::Result<VerifyResult> {
        let available = Self::recovery_blocks(par2_file);
        Ok(VerifyResult {
            is_complete: false,
            blocks_needed: self.blocks_needed,
            recovery_blocks_available: available,
            repairable: available >= self.blocks_needed,
            ..Default::default()
        })
    }

    async fn repair(&self, par2_file: &Path) -> usenet_postproc::Result<RepairResult> {
        self.repairs.fetch_add(1, Ordering::SeqCst);
        if Self::recovery_blocks(par2_file) < self.blocks_needed {
            return Ok(RepairResult {
                success: false,
                error: Some("Repair is not possible.".into()),
                ..Default::default()
            });
        }
        for (path, content) in &self.originals {
            std::fs::write(path, content)?;
        }
        Ok(RepairResult {
            success: true,
            ..Default::default()
        })
    }

    fn capabilities(&self) -> ParityCapabilities {
        ParityCapabilities {
            can_verify: true,
            can_repair: true,
        }
    }

    fn name(&self) -> &'static str {
        "fake-par2"
    }
}
