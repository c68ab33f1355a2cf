//! Handler used when no par2 binary is available

use super::traits::{ParityCapabilities, ParityHandler, RepairResult, VerifyResult};
use async_trait::async_trait;
use std::path::Path;

/// Declines every operation with [`Error::NotSupported`](crate::Error::NotSupported)
///
/// Verification still happens through the engine's own MD5 check; repair is
/// reported as impossible.
///
/// ```
/// use usenet_postproc::parity::{NoOpParityHandler, ParityHandler};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() {
/// let err = NoOpParityHandler.repair(Path::new("show.par2")).await.unwrap_err();
/// assert_eq!(err.error_code(), "not_supported");
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpParityHandler;

const UNAVAILABLE: &str = "par2 binary not available; set tools.par2_path or install par2";

#[async_trait]
impl ParityHandler for NoOpParityHandler {
    async fn verify(&self, _par2_file: &Path) -> crate::Result<VerifyResult> {
        Err(crate::Error::NotSupported(UNAVAILABLE.into()))
    }

    async fn repair(&self, _par2_file: &Path) -> crate::Result<RepairResult> {
        Err(crate::Error::NotSupported(UNAVAILABLE.into()))
    }

    fn capabilities(&self) -> ParityCapabilities {
        ParityCapabilities {
            can_verify: false,
            can_repair: false,
        }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
