//! Stage steps for the head job
//!
//! Every step follows the same shape: read what is needed under the queue
//! guard, release it, do the disk or tool work, then take the guard again to
//! record the outcome. Queued and ExecutingScript steps need no I/O and run
//! under the guard; the script itself is spawned after the guard is released.

use super::callbacks::PostParCallbacks;
use super::{ParSession, PostProcessor};
use crate::error::{Error, Result};
use crate::parity::{ParChecker, RepairStep, leftover_pars};
use crate::post_queue::{PostJob, PostQueueGuard};
use crate::script::{ScriptParams, ScriptPoll};
use crate::types::{Event, ParStatus, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a step achieved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// No pending jobs
    Idle,
    /// The head job moved on; run the next step right away
    Progressed,
    /// Waiting on something external (script, requested volumes)
    Waiting,
    /// The head job needs an I/O step only the scheduler runs
    Deferred,
}

/// Snapshot of the head job taken under the guard
#[derive(Clone, Debug)]
struct HeadPlan {
    collection: String,
    dest_dir: PathBuf,
    par_filename: Option<String>,
    stage: Stage,
    par_failed: bool,
}

impl HeadPlan {
    fn of(job: &PostJob) -> Self {
        Self {
            collection: job.nzb_name().to_string(),
            dest_dir: job.dest_dir().to_path_buf(),
            par_filename: job.par_filename().map(str::to_string),
            stage: job.stage(),
            par_failed: job.par_failed(),
        }
    }
}

/// Script start prepared under the guard, run once it is released
#[derive(Debug)]
struct ScriptLaunch {
    collection: String,
    dest_dir: PathBuf,
    info_name: String,
    par_filename: Option<String>,
    par_status: ParStatus,
    par_failed: bool,
}

impl ScriptLaunch {
    fn of(job: &PostJob) -> Self {
        Self {
            collection: job.nzb_name().to_string(),
            dest_dir: job.dest_dir().to_path_buf(),
            info_name: job.info_name().to_string(),
            par_filename: job.par_filename().map(str::to_string),
            par_status: job.par_status(),
            par_failed: job.par_failed(),
        }
    }

    fn params(&self) -> ScriptParams<'_> {
        ScriptParams {
            dest_dir: &self.dest_dir,
            nzb_name: &self.collection,
            info_name: &self.info_name,
            par_filename: self.par_filename.as_deref(),
            par_status: self.par_status,
            par_failed: self.par_failed,
        }
    }
}

impl PostProcessor {
    /// Run the head job's step if it needs no disk or tool I/O
    pub(crate) async fn advance_sync(&self) -> Step {
        let mut guard = self.queue.lock().await;
        let Some(stage) = guard.head().map(PostJob::stage) else {
            return Step::Idle;
        };

        match stage {
            Stage::Queued => {
                let launch = self.start_head(&mut guard);
                drop(guard);
                if let Some(launch) = launch {
                    self.launch_script(launch).await;
                }
                Step::Progressed
            }
            Stage::ExecutingScript => self.poll_script(&mut guard),
            Stage::Finished => {
                guard.complete_head();
                Step::Progressed
            }
            Stage::LoadingPars
            | Stage::VerifyingSources
            | Stage::Repairing
            | Stage::VerifyingRepaired => Step::Deferred,
        }
    }

    /// One stage step for the head job
    ///
    /// The caller holds the step lock; `session` is the PAR2 state it guards.
    pub(crate) async fn advance(&self, session: &mut Option<ParSession>) -> Result<Step> {
        let step = self.advance_sync().await;
        if step != Step::Deferred {
            if step == Step::Idle {
                *session = None;
            }
            return Ok(step);
        }

        let Some(plan) = self.queue.lock().await.head().map(HeadPlan::of) else {
            return Ok(Step::Idle);
        };
        if session.as_ref().is_some_and(|s| s.collection != plan.collection) {
            *session = None;
        }

        debug!(collection = %plan.collection, stage = ?plan.stage, "running stage step");
        match plan.stage {
            Stage::LoadingPars => self.load_pars(session, &plan).await,
            Stage::VerifyingSources => self.verify_sources(session, &plan).await,
            Stage::Repairing => self.repair(session, &plan).await,
            Stage::VerifyingRepaired => self.verify_repaired(session, &plan).await,
            Stage::Queued | Stage::ExecutingScript | Stage::Finished => Ok(Step::Progressed),
        }
    }

    /// Push the head job past a failed step so the queue keeps moving
    pub(crate) async fn force_forward(&self, session: &mut Option<ParSession>, err: &Error) {
        *session = None;
        let mut guard = self.queue.lock().await;
        let Some(job) = guard.head_mut() else {
            return;
        };

        error!(
            collection = %job.nzb_name(),
            stage = ?job.stage(),
            error = %err,
            "post-processing step failed"
        );
        if matches!(
            job.stage(),
            Stage::LoadingPars
                | Stage::VerifyingSources
                | Stage::Repairing
                | Stage::VerifyingRepaired
        ) {
            self.flag_par_failed(job, err.to_string());
        }
        let launch = self.enter_script(&mut guard);
        drop(guard);
        if let Some(launch) = launch {
            self.launch_script(launch).await;
        }
    }

    fn transition(&self, job: &mut PostJob, stage: Stage) -> bool {
        if !job.set_stage(stage) {
            return false;
        }
        info!(collection = %job.nzb_name(), stage = ?stage, "{}", stage.label());
        self.emit_event(Event::StageChanged {
            collection: job.nzb_name().to_string(),
            stage,
        });
        true
    }

    fn flag_par_failed(&self, job: &mut PostJob, reason: String) {
        warn!(collection = %job.nzb_name(), reason = %reason, "PAR2 check failed");
        job.set_par_failed(true);
        job.set_par_status(ParStatus::Failure);
        self.emit_event(Event::ParFailed {
            collection: job.nzb_name().to_string(),
            reason,
        });
    }

    /// Lock the queue if `collection` is still the head job
    async fn lock_head(&self, collection: &str) -> Option<PostQueueGuard<'_>> {
        let guard = self.queue.lock().await;
        let is_head = guard.head().is_some_and(|job| job.nzb_name() == collection);
        is_head.then_some(guard)
    }

    async fn move_head(&self, collection: &str, stage: Stage) {
        if let Some(mut guard) = self.lock_head(collection).await
            && let Some(job) = guard.head_mut()
        {
            self.transition(job, stage);
        }
    }

    async fn fail_head(&self, collection: &str, reason: String) {
        if let Some(mut guard) = self.lock_head(collection).await
            && let Some(job) = guard.head_mut()
        {
            self.flag_par_failed(job, reason);
        }
    }

    async fn set_head_status(&self, collection: &str, status: ParStatus) {
        if let Some(mut guard) = self.lock_head(collection).await
            && let Some(job) = guard.head_mut()
        {
            job.set_par_status(status);
        }
    }

    async fn head_label(&self, collection: &str, label: String) {
        if let Some(mut guard) = self.lock_head(collection).await
            && let Some(job) = guard.head_mut()
        {
            job.update_progress(label, 0, 0);
        }
    }

    async fn script_head(&self, collection: &str) {
        let launch = match self.lock_head(collection).await {
            Some(mut guard) => self.enter_script(&mut guard),
            None => None,
        };
        if let Some(launch) = launch {
            self.launch_script(launch).await;
        }
    }

    fn start_head(&self, guard: &mut PostQueueGuard<'_>) -> Option<ScriptLaunch> {
        let job = guard.head_mut()?;
        job.set_working(true);
        info!(
            collection = %job.nzb_name(),
            par_check = job.par_check(),
            "starting post-processing"
        );
        if job.par_check() {
            self.transition(job, Stage::LoadingPars);
            None
        } else {
            self.enter_script(guard)
        }
    }

    /// Enter ExecutingScript
    ///
    /// Returns the script to launch once the guard is released. Finishes the
    /// job right away when no script is configured.
    fn enter_script(&self, guard: &mut PostQueueGuard<'_>) -> Option<ScriptLaunch> {
        let job = guard.head_mut()?;
        if job.stage() == Stage::Repairing {
            self.transition(job, Stage::VerifyingRepaired);
        }
        if !self.transition(job, Stage::ExecutingScript) {
            return None;
        }
        if self.scripts.is_configured() {
            return Some(ScriptLaunch::of(job));
        }
        debug!(collection = %job.nzb_name(), "no post-process script configured");
        self.finish_head(guard, Stage::Finished.label().to_string());
        None
    }

    /// Spawn the script and attach it to the head job
    ///
    /// Callers hold the step lock, so no other step polls the job while its
    /// handle is missing.
    async fn launch_script(&self, launch: ScriptLaunch) {
        let started = self.scripts.start(&launch.params());
        let Some(mut guard) = self.lock_head(&launch.collection).await else {
            // dropping the handle kills the script
            return;
        };

        match started {
            Ok(Some(mut process)) => {
                let Some(job) = guard.head_mut() else {
                    return;
                };
                if self.is_shutting_down() {
                    if let Err(e) = process.terminate() {
                        warn!(collection = %job.nzb_name(), error = %e, "failed to kill script");
                    }
                    job.update_progress("Terminated on shutdown", 0, 0);
                    self.emit_event(Event::ScriptFinished {
                        collection: job.nzb_name().to_string(),
                        exit_code: None,
                    });
                    return;
                }
                let pid = process.id();
                job.attach_process(process);
                self.emit_event(Event::ScriptStarted {
                    collection: job.nzb_name().to_string(),
                    pid,
                });
            }
            Ok(None) => self.finish_head(&mut guard, Stage::Finished.label().to_string()),
            Err(e) => {
                error!(
                    collection = %launch.collection,
                    error = %e,
                    "post-process script failed to start"
                );
                self.emit_event(Event::ScriptFinished {
                    collection: launch.collection.clone(),
                    exit_code: None,
                });
                self.finish_head(&mut guard, format!("Post-process script failed to start: {e}"));
            }
        }
    }

    fn poll_script(&self, guard: &mut PostQueueGuard<'_>) -> Step {
        let Some(job) = guard.head_mut() else {
            return Step::Idle;
        };
        let outcome = match job.process_mut() {
            Some(process) => self.scripts.poll(process),
            None => ScriptPoll::Failed("script handle lost".to_string()),
        };

        let (label, exit_code) = match outcome {
            ScriptPoll::Running => return Step::Waiting,
            ScriptPoll::Exited(Some(0)) => ("Post-process script succeeded".to_string(), Some(0)),
            ScriptPoll::Exited(Some(code)) => (
                format!("Post-process script failed with exit code {code}"),
                Some(code),
            ),
            ScriptPoll::Exited(None) => ("Post-process script was killed".to_string(), None),
            ScriptPoll::TimedOut => ("Post-process script timed out".to_string(), None),
            ScriptPoll::Failed(reason) => (format!("Post-process script failed: {reason}"), None),
        };

        info!(collection = %job.nzb_name(), exit_code = ?exit_code, "{}", label);
        self.emit_event(Event::ScriptFinished {
            collection: job.nzb_name().to_string(),
            exit_code,
        });
        self.finish_head(guard, label);
        Step::Progressed
    }

    fn finish_head(&self, guard: &mut PostQueueGuard<'_>, label: String) {
        let Some(job) = guard.head_mut() else {
            return;
        };
        job.take_process();
        if !self.transition(job, Stage::Finished) {
            return;
        }
        job.update_progress(label, 100, 100);
        job.set_working(false);

        let event = Event::JobFinished {
            collection: job.nzb_name().to_string(),
            par_status: job.par_status(),
            par_failed: job.par_failed(),
        };
        info!(
            collection = %job.nzb_name(),
            par_status = ?job.par_status(),
            par_failed = job.par_failed(),
            "post-processing finished"
        );
        guard.complete_head();
        self.emit_event(event);
    }

    fn new_checker(&self, plan: &HeadPlan, par_filename: &str) -> ParSession {
        let callbacks = Arc::new(PostParCallbacks::new(
            plan.collection.clone(),
            plan.dest_dir.clone(),
            par_filename,
            self.queue.clone(),
            self.engine.clone(),
            self.event_tx.clone(),
        ));
        let checker = ParChecker::new(
            plan.collection.clone(),
            plan.dest_dir.clone(),
            par_filename,
            self.parity.clone(),
            callbacks.clone(),
        );
        ParSession {
            collection: plan.collection.clone(),
            checker,
            callbacks,
        }
    }

    /// The PAR2 session for the head job, rebuilt if it was lost
    async fn session<'s>(
        &self,
        session: &'s mut Option<ParSession>,
        plan: &HeadPlan,
    ) -> Result<&'s mut ParSession> {
        if session.is_none() {
            let par_filename = plan.par_filename.as_deref().ok_or_else(|| {
                Error::Other(format!("{} has no PAR2 file", plan.collection))
            })?;
            let mut fresh = self.new_checker(plan, par_filename);
            fresh.checker.load().await?;
            *session = Some(fresh);
        }
        session
            .as_mut()
            .ok_or_else(|| Error::Other("PAR2 session missing".into()))
    }

    async fn load_pars(&self, session: &mut Option<ParSession>, plan: &HeadPlan) -> Result<Step> {
        let Some(par_filename) = plan.par_filename.as_deref() else {
            self.fail_head(&plan.collection, "no PAR2 file".into()).await;
            self.script_head(&plan.collection).await;
            return Ok(Step::Progressed);
        };

        let mut fresh = self.new_checker(plan, par_filename);
        let loaded = fresh.checker.load().await.map(|_| ());
        match loaded {
            Ok(()) => {
                *session = Some(fresh);
                self.move_head(&plan.collection, Stage::VerifyingSources).await;
            }
            Err(e) => {
                *session = None;
                self.fail_head(&plan.collection, format!("could not load {par_filename}: {e}"))
                    .await;
                self.script_head(&plan.collection).await;
            }
        }
        Ok(Step::Progressed)
    }

    async fn verify_sources(
        &self,
        session: &mut Option<ParSession>,
        plan: &HeadPlan,
    ) -> Result<Step> {
        let intact = {
            let par = self.session(session, plan).await?;
            par.checker.verify().await?.is_intact()
        };

        if intact {
            *session = None;
            self.set_head_status(&plan.collection, ParStatus::Success).await;
            self.cleanup_pars(&plan.collection).await;
            self.script_head(&plan.collection).await;
        } else if self.config.par.par_repair {
            self.move_head(&plan.collection, Stage::Repairing).await;
        } else {
            *session = None;
            let launch = match self.lock_head(&plan.collection).await {
                Some(mut guard) => {
                    if let Some(job) = guard.head_mut() {
                        self.flag_par_failed(job, "repair is disabled".into());
                        job.set_par_status(ParStatus::RepairPossible);
                    }
                    self.enter_script(&mut guard)
                }
                None => None,
            };
            if let Some(launch) = launch {
                self.launch_script(launch).await;
            }
        }
        Ok(Step::Progressed)
    }

    async fn repair(&self, session: &mut Option<ParSession>, plan: &HeadPlan) -> Result<Step> {
        let par = self.session(session, plan).await?;
        if par.checker.verification().is_none() {
            par.checker.verify().await?;
        }

        if par.callbacks.has_requests() {
            let snapshot = self.engine.snapshot().await;
            let waiting = par.callbacks.outstanding(&snapshot);
            if waiting > 0 {
                debug!(collection = %plan.collection, waiting, "PAR2 volumes still downloading");
                self.head_label(
                    &plan.collection,
                    format!("Waiting for {waiting} PAR2 volume(s)"),
                )
                .await;
                return Ok(Step::Waiting);
            }
        }

        match par.checker.repair().await? {
            RepairStep::Waiting { requested } => {
                self.head_label(
                    &plan.collection,
                    format!("Downloading {requested} recovery blocks"),
                )
                .await;
                Ok(Step::Waiting)
            }
            RepairStep::NotNeeded | RepairStep::Repaired => {
                self.move_head(&plan.collection, Stage::VerifyingRepaired).await;
                Ok(Step::Progressed)
            }
            RepairStep::InsufficientBlocks { needed, available } => {
                self.fail_head(
                    &plan.collection,
                    format!("repair needs {needed} recovery blocks, only {available} exist"),
                )
                .await;
                self.move_head(&plan.collection, Stage::VerifyingRepaired).await;
                Ok(Step::Progressed)
            }
            RepairStep::Failed { reason } => {
                self.fail_head(&plan.collection, reason).await;
                self.move_head(&plan.collection, Stage::VerifyingRepaired).await;
                Ok(Step::Progressed)
            }
        }
    }

    async fn verify_repaired(
        &self,
        session: &mut Option<ParSession>,
        plan: &HeadPlan,
    ) -> Result<Step> {
        if !plan.par_failed {
            let outcome = match self.session(session, plan).await {
                Ok(par) => par.checker.verify_repaired().await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => {
                    self.set_head_status(&plan.collection, ParStatus::Success).await;
                    self.cleanup_pars(&plan.collection).await;
                }
                Ok(false) => {
                    self.fail_head(&plan.collection, "files still damaged after repair".into())
                        .await;
                }
                Err(e) => {
                    self.fail_head(&plan.collection, format!("re-verification failed: {e}"))
                        .await;
                }
            }
        }

        *session = None;
        self.script_head(&plan.collection).await;
        Ok(Step::Progressed)
    }

    /// Drop the collection's remaining paused PAR2 files from the download queue
    async fn cleanup_pars(&self, collection: &str) {
        if !self.config.par.par_cleanup_queue {
            return;
        }
        let snapshot = self.engine.snapshot().await;
        let ids = leftover_pars(&snapshot, collection);
        if ids.is_empty() {
            return;
        }
        match self.engine.remove_files(&ids).await {
            Ok(()) => debug!(
                collection = %collection,
                files = ids.len(),
                "removed unneeded PAR2 files"
            ),
            Err(e) => warn!(
                collection = %collection,
                error = %e,
                "failed to remove PAR2 files"
            ),
        }
    }
}
