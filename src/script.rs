//! Post-process script execution
//!
//! The script is spawned once per job when it enters
//! [`Stage::ExecutingScript`](crate::types::Stage::ExecutingScript) and then
//! polled without blocking on every scheduler tick.

use crate::config::PostScriptConfig;
use crate::error::{PostProcessError, Result};
use crate::types::ParStatus;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Handle to a running post-process script
///
/// Wraps the platform child process behind spawn / poll / terminate.
#[derive(Debug)]
pub struct ScriptProcess {
    child: Child,
    script: PathBuf,
    started: Instant,
}

impl ScriptProcess {
    /// Spawn a prepared command
    pub fn spawn(command: &mut Command, script: &Path) -> std::io::Result<Self> {
        let child = command.spawn()?;
        Ok(Self {
            child,
            script: script.to_path_buf(),
            started: Instant::now(),
        })
    }

    /// OS process id (None once the child has been reaped)
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Script path this process was started from
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Time since spawn
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking exit check
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Ask the OS to kill the process; does not wait for it
    pub fn terminate(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// Job fields handed to the script
#[derive(Debug, Clone)]
pub struct ScriptParams<'a> {
    /// Destination directory of the collection
    pub dest_dir: &'a Path,
    /// NZB name
    pub nzb_name: &'a str,
    /// Display name
    pub info_name: &'a str,
    /// Primary PAR2 file, if any
    pub par_filename: Option<&'a str>,
    /// Verification outcome
    pub par_status: ParStatus,
    /// Whether repair failed
    pub par_failed: bool,
}

/// Result of polling a running script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPoll {
    /// Still running
    Running,
    /// Exited; None when terminated by a signal
    Exited(Option<i32>),
    /// Ran past the configured timeout and was killed
    TimedOut,
    /// The OS could not report the child's state
    Failed(String),
}

/// Starts and polls the configured post-process script
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    script: Option<PathBuf>,
    timeout: Duration,
}

impl ScriptRunner {
    /// Create a runner from configuration
    pub fn new(config: &PostScriptConfig) -> Self {
        Self {
            script: config.path.clone(),
            timeout: config.timeout,
        }
    }

    /// Whether a script is configured at all
    pub fn is_configured(&self) -> bool {
        self.script.is_some()
    }

    /// Build the command line and environment for a job
    pub fn command(script: &Path, params: &ScriptParams<'_>) -> Command {
        let par_filename = params.par_filename.unwrap_or_default();
        let par_status = params.par_status.code().to_string();
        let par_failed = if params.par_failed { "1" } else { "0" };

        let mut command = Command::new(script);
        command
            .arg(params.dest_dir)
            .arg(params.nzb_name)
            .arg(par_filename)
            .arg(&par_status)
            .arg(par_failed)
            .env("POSTPROC_DIRECTORY", params.dest_dir)
            .env("POSTPROC_NZB_NAME", params.nzb_name)
            .env("POSTPROC_NAME", params.info_name)
            .env("POSTPROC_PAR_FILENAME", par_filename)
            .env("POSTPROC_PAR_STATUS", &par_status)
            .env("POSTPROC_PAR_FAILED", par_failed)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if params.dest_dir.is_dir() {
            command.current_dir(params.dest_dir);
        }

        command
    }

    /// Start the script for a job
    ///
    /// Returns `Ok(None)` when no script is configured. Must be called from
    /// within a tokio runtime; script output is forwarded to the log.
    pub fn start(&self, params: &ScriptParams<'_>) -> Result<Option<ScriptProcess>> {
        let Some(script) = &self.script else {
            debug!(
                collection = %params.nzb_name,
                "no post-process script configured"
            );
            return Ok(None);
        };

        let mut command = Self::command(script, params);
        let mut process = ScriptProcess::spawn(&mut command, script).map_err(|e| {
            PostProcessError::ScriptSpawnFailed {
                script: script.clone(),
                reason: e.to_string(),
            }
        })?;

        if let Some(stdout) = process.child.stdout.take() {
            forward_output(params.nzb_name.to_string(), stdout, false);
        }
        if let Some(stderr) = process.child.stderr.take() {
            forward_output(params.nzb_name.to_string(), stderr, true);
        }

        info!(
            collection = %params.nzb_name,
            script = ?script,
            pid = ?process.id(),
            "post-process script started"
        );

        Ok(Some(process))
    }

    /// Check a running script without blocking
    ///
    /// A script past its timeout is killed and reported as [`ScriptPoll::TimedOut`].
    pub fn poll(&self, process: &mut ScriptProcess) -> ScriptPoll {
        match process.try_wait() {
            Ok(Some(status)) => ScriptPoll::Exited(status.code()),
            Ok(None) if process.elapsed() >= self.timeout => {
                warn!(
                    script = ?process.script(),
                    timeout = ?self.timeout,
                    "script timed out"
                );
                if let Err(e) = process.terminate() {
                    warn!(script = ?process.script(), error = %e, "failed to kill script");
                }
                ScriptPoll::TimedOut
            }
            Ok(None) => ScriptPoll::Running,
            Err(e) => ScriptPoll::Failed(e.to_string()),
        }
    }
}

fn forward_output<R>(collection: String, reader: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(collection = %collection, "script: {}", line);
            } else {
                info!(collection = %collection, "script: {}", line);
            }
        }
    });
}
