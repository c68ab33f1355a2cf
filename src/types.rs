//! Core types and events for usenet-postproc

use serde::{Deserialize, Serialize};

/// Stage of a post job
///
/// Jobs start in [`Stage::Queued`] and end in [`Stage::Finished`]. Stages only
/// move forward; see [`Stage::can_advance_to`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting at the head or further back in the post queue
    Queued,
    /// Reading the recovery set from the main PAR2 file
    LoadingPars,
    /// Checking source files against the recovery set
    VerifyingSources,
    /// Rebuilding damaged files from recovery blocks
    Repairing,
    /// Checking source files again after repair
    VerifyingRepaired,
    /// Post-process script is running
    ExecutingScript,
    /// Done; the job lives in the completed collection
    Finished,
}

impl Stage {
    /// Whether `self -> next` is an edge of the post job state machine
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Queued, LoadingPars)
                | (Queued, ExecutingScript)
                | (LoadingPars, VerifyingSources)
                | (LoadingPars, ExecutingScript)
                | (VerifyingSources, Repairing)
                | (VerifyingSources, ExecutingScript)
                | (Repairing, VerifyingRepaired)
                | (VerifyingRepaired, ExecutingScript)
                | (ExecutingScript, Finished)
        )
    }

    /// Whether the stage is terminal
    pub fn is_finished(self) -> bool {
        self == Stage::Finished
    }

    /// Default progress label shown when a stage is entered
    pub fn label(self) -> &'static str {
        match self {
            Stage::Queued => "Queued",
            Stage::LoadingPars => "Loading par-files",
            Stage::VerifyingSources => "Verifying source files",
            Stage::Repairing => "Repairing",
            Stage::VerifyingRepaired => "Verifying repaired files",
            Stage::ExecutingScript => "Executing post-process script",
            Stage::Finished => "Finished",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of PAR2 verification for a job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParStatus {
    /// Not verified (no PAR2 files, verification disabled, or not done yet)
    #[default]
    None,
    /// Damaged and could not be repaired
    Failure,
    /// Intact, either originally or after repair
    Success,
    /// Damaged, enough blocks to repair, but repair is disabled
    RepairPossible,
}

impl ParStatus {
    /// Integer code passed to post-process scripts
    pub fn code(self) -> i32 {
        match self {
            ParStatus::None => 0,
            ParStatus::Failure => 1,
            ParStatus::Success => 2,
            ParStatus::RepairPossible => 3,
        }
    }

    /// Convert a script status code back to ParStatus
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ParStatus::Failure,
            2 => ParStatus::Success,
            3 => ParStatus::RepairPossible,
            _ => ParStatus::None,
        }
    }
}

/// Event emitted while collections move through the pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A finished collection entered the post queue
    JobQueued {
        /// Collection (NZB name)
        collection: String,
        /// Whether PAR2 verification will run
        par_check: bool,
    },

    /// A job moved to a new stage
    StageChanged {
        /// Collection (NZB name)
        collection: String,
        /// Stage just entered
        stage: Stage,
    },

    /// Progress within the current stage
    Progress {
        /// Collection (NZB name)
        collection: String,
        /// Human-readable label
        label: String,
        /// Progress of the current file (0..=100)
        file_progress: u8,
        /// Progress of the current stage (0..=100)
        stage_progress: u8,
    },

    /// Extra recovery blocks were requested from the download queue
    BlocksRequested {
        /// Collection (NZB name)
        collection: String,
        /// Blocks missing for repair
        needed: u32,
        /// Blocks located in paused PAR2 files
        found: u32,
    },

    /// Verification or repair did not leave the collection intact
    ParFailed {
        /// Collection (NZB name)
        collection: String,
        /// Why
        reason: String,
    },

    /// Post-process script was started
    ScriptStarted {
        /// Collection (NZB name)
        collection: String,
        /// OS process id, if the platform exposes it
        pid: Option<u32>,
    },

    /// Post-process script ended
    ScriptFinished {
        /// Collection (NZB name)
        collection: String,
        /// Exit code (None when killed by a signal, timed out, or never started)
        exit_code: Option<i32>,
    },

    /// Job reached the completed collection
    JobFinished {
        /// Collection (NZB name)
        collection: String,
        /// Final verification outcome
        par_status: ParStatus,
        /// Whether repair failed or was impossible
        par_failed: bool,
    },
}
