//! Pipeline state of one collection

use crate::script::ScriptProcess;
use crate::types::{ParStatus, Stage};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One collection's trip through verify, repair and script
///
/// A pure state holder: the scheduler and the PAR2 engine drive every
/// transition through the post queue guard.
#[derive(Debug)]
pub struct PostJob {
    nzb_name: String,
    dest_dir: PathBuf,
    par_filename: Option<String>,
    info_name: String,
    working: bool,
    par_check: bool,
    par_status: ParStatus,
    par_failed: bool,
    stage: Stage,
    progress_label: String,
    file_progress: u8,
    stage_progress: u8,
    start_time: DateTime<Utc>,
    stage_time: DateTime<Utc>,
    process: Option<ScriptProcess>,
    stages: Vec<Stage>,
}

impl PostJob {
    /// Create a queued job
    ///
    /// `par_filename` is the primary PAR2 file of the collection; without one
    /// verification cannot run and `par_check` is forced off.
    pub fn new(
        nzb_name: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        par_filename: Option<String>,
        info_name: impl Into<String>,
        par_check: bool,
    ) -> Self {
        let now = Utc::now();
        let par_check = par_check && par_filename.is_some();
        Self {
            nzb_name: nzb_name.into(),
            dest_dir: dest_dir.into(),
            par_filename,
            info_name: info_name.into(),
            working: false,
            par_check,
            par_status: ParStatus::None,
            par_failed: false,
            stage: Stage::Queued,
            progress_label: Stage::Queued.label().to_string(),
            file_progress: 0,
            stage_progress: 0,
            start_time: now,
            stage_time: now,
            process: None,
            stages: vec![Stage::Queued],
        }
    }

    /// NZB name of the collection
    pub fn nzb_name(&self) -> &str {
        &self.nzb_name
    }

    /// Directory holding the collection's files
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Primary PAR2 file name, relative to [`dest_dir`](Self::dest_dir)
    pub fn par_filename(&self) -> Option<&str> {
        self.par_filename.as_deref()
    }

    /// Display name
    pub fn info_name(&self) -> &str {
        &self.info_name
    }

    /// A stage step is currently executing for this job
    pub fn is_working(&self) -> bool {
        self.working
    }

    /// Whether PAR2 verification was requested
    pub fn par_check(&self) -> bool {
        self.par_check
    }

    /// Verification outcome so far
    pub fn par_status(&self) -> ParStatus {
        self.par_status
    }

    /// Repair failed or was not possible
    pub fn par_failed(&self) -> bool {
        self.par_failed
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, in order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Human-readable progress
    pub fn progress_label(&self) -> &str {
        &self.progress_label
    }

    /// Progress of the current file (0..=100)
    pub fn file_progress(&self) -> u8 {
        self.file_progress
    }

    /// Progress of the current stage (0..=100)
    pub fn stage_progress(&self) -> u8 {
        self.stage_progress
    }

    /// When the job was queued
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// When the current stage was entered
    pub fn stage_time(&self) -> DateTime<Utc> {
        self.stage_time
    }

    /// Whether a script process is attached
    ///
    /// A job in [`Stage::ExecutingScript`] normally has one. After
    /// [`PostProcessor::shutdown`](crate::PostProcessor::shutdown) the killed
    /// script's handle is gone while the job stays in that stage.
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// OS id of the running script
    ///
    /// `None` once the job was stopped by a shutdown, even though its stage
    /// still reads ExecutingScript.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(ScriptProcess::id)
    }

    pub(crate) fn set_working(&mut self, working: bool) {
        self.working = working;
    }

    pub(crate) fn set_par_status(&mut self, status: ParStatus) {
        self.par_status = status;
    }

    pub(crate) fn set_par_failed(&mut self, failed: bool) {
        self.par_failed = failed;
    }

    /// Move to the next stage; refuses edges outside the state machine
    pub(crate) fn set_stage(&mut self, stage: Stage) -> bool {
        if !self.stage.can_advance_to(stage) {
            tracing::error!(
                collection = %self.nzb_name,
                from = ?self.stage,
                to = ?stage,
                "rejected invalid stage transition"
            );
            return false;
        }
        self.stage = stage;
        self.stages.push(stage);
        self.update_progress(stage.label(), 0, 0);
        self.stage_time = Utc::now();
        true
    }

    /// Update the label and percentages shown to observers
    pub(crate) fn update_progress(
        &mut self,
        label: impl Into<String>,
        file_progress: u8,
        stage_progress: u8,
    ) {
        self.progress_label = label.into();
        self.file_progress = file_progress.min(100);
        self.stage_progress = stage_progress.min(100);
    }

    pub(crate) fn attach_process(&mut self, process: ScriptProcess) {
        debug_assert_eq!(self.stage, Stage::ExecutingScript);
        self.process = Some(process);
    }

    pub(crate) fn process_mut(&mut self) -> Option<&mut ScriptProcess> {
        self.process.as_mut()
    }

    pub(crate) fn take_process(&mut self) -> Option<ScriptProcess> {
        self.process.take()
    }
}
