//! PAR2 verification and repair
//!
//! [`ParChecker`] drives one recovery set through load, verify and repair.
//! The heavy lifting is delegated to a [`ParityHandler`]:
//!
//! - [`CliParityHandler`] runs the external `par2` binary
//! - [`NoOpParityHandler`] declines, leaving only the built-in MD5 check
//!
//! When the volumes on disk cannot cover the damage, the checker asks its
//! [`ParCallbacks`] for more; [`select_blocks`] decides which paused volumes
//! in the download queue to fetch.
//!
//! ```no_run
//! use std::sync::Arc;
//! use usenet_postproc::parity::{
//!     CliParityHandler, ParCallbacks, ParChecker, ParProgress, RepairStep,
//! };
//!
//! struct Quiet;
//!
//! #[async_trait::async_trait]
//! impl ParCallbacks for Quiet {
//!     async fn request_more_blocks(&self, _needed: u32) -> u32 { 0 }
//!     async fn report_progress(&self, _progress: ParProgress) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> usenet_postproc::Result<()> {
//! let handler = CliParityHandler::from_path().expect("par2 in PATH");
//! let mut checker = ParChecker::new(
//!     "show.nzb",
//!     "/downloads/show",
//!     "show.par2",
//!     Arc::new(handler),
//!     Arc::new(Quiet),
//! );
//! if !checker.verify().await?.is_intact() {
//!     let step = checker.repair().await?;
//!     println!("{step:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod blocks;
mod checker;
mod cli;
mod filename;
mod metadata;
mod noop;
mod parser;
mod traits;

pub use blocks::{
    BlockInfo, BlockSelection, find_pars, leftover_pars, main_pars_to_unpause, pars_to_pause,
    select_blocks,
};
pub use checker::{ParCallbacks, ParChecker, ParProgress, RepairStep, Verification};
pub use cli::CliParityHandler;
pub use filename::{
    FileList, find_main_pars, find_set_files, list_par_files, parse_par_filename,
    same_par_collection,
};
pub use metadata::{FileCheck, RecoverySet, SourceFile, check_source_file};
pub use noop::NoOpParityHandler;
pub use parser::{parse_repair_output, parse_verify_output};
pub use traits::{ParityCapabilities, ParityHandler, RepairResult, VerifyResult};

#[cfg(test)]
pub(crate) use metadata::testing;
