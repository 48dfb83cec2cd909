//! Simulator child-process driver.
//!
//! The simulator is a black box: a binary built inside the working copy,
//! fully determined by the revision it was built from and the seed it is
//! given. The hub runs it in diagnostic mode to replay reported failures;
//! workers run it in fast mode to search for new ones.
//!
//! Output capture is byte-accurate. Stdout and stderr are drained
//! concurrently into memory as raw chunks (the simulator's panic output is
//! not line-buffered) and mirrored to the diagnostic log. Postprocessing
//! (parameter echo, trace extraction) happens on the captured bytes, never
//! on a live stream.
//!
//! Exit dispositions:
//!
//! | code | meaning |
//! |------|---------------------|
//! | 0    | pass                |
//! | 127  | crash               |
//! | 128  | liveness violation  |
//! | 129  | correctness violation |
//!
//! Any other code, or death by signal, is an infrastructure error, not a
//! bug report.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::wire::BugKind;

/// Simulator binary location inside the working copy.
pub const SIMULATOR_RELATIVE_PATH: &str = "zig-out/bin/simulator";

/// Flag selecting verbose diagnostic mode.
pub const DIAGNOSTIC_FLAG: &str = "--diagnostic";

/// Exit code for a crash.
pub const EXIT_CRASH: i32 = 127;
/// Exit code for a liveness violation.
pub const EXIT_LIVENESS: i32 = 128;
/// Exit code for a correctness violation.
pub const EXIT_CORRECTNESS: i32 = 129;

/// Matches a simulator parameter line: `key=value` echoed near the top of
/// diagnostic output.
static PARAMETER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_.]*=\S").expect("parameter regex is valid")
});

/// Execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Randomized search mode used by workers.
    Fast,
    /// Verbose replay mode used by the hub.
    Diagnostic,
}

/// What a terminated simulator run means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Exit code 0.
    Pass,
    /// Exit code 127.
    Crash,
    /// Exit code 128.
    Liveness,
    /// Exit code 129.
    Correctness,
}

impl ExitDisposition {
    /// The bug kind this disposition corresponds to, if any.
    #[must_use]
    pub const fn bug_kind(self) -> Option<BugKind> {
        match self {
            Self::Pass => None,
            Self::Crash => Some(BugKind::Crash),
            Self::Liveness => Some(BugKind::Liveness),
            Self::Correctness => Some(BugKind::Correctness),
        }
    }
}

/// Driver failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplayError {
    /// The child could not be spawned or its pipes could not be read.
    #[error("failed to run simulator: {reason}")]
    SpawnFailed {
        /// The underlying I/O error.
        reason: String,
    },

    /// The child died without an exit code (killed by signal).
    #[error("simulator terminated by signal")]
    Signaled,

    /// The child exited with a code outside the known set.
    #[error("simulator exited with unexpected code {code}")]
    UnexpectedExit {
        /// The unmapped exit code.
        code: i32,
    },
}

/// A completed simulator run.
#[derive(Debug)]
pub struct SimulatorRun {
    /// Raw exit code.
    pub exit_code: i32,
    /// Combined captured output: stdout followed by stderr, lossily
    /// decoded.
    pub output: String,
}

impl SimulatorRun {
    /// Maps the exit code to its disposition.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::UnexpectedExit`] for codes outside
    /// {0, 127, 128, 129}.
    pub const fn disposition(&self) -> Result<ExitDisposition, ReplayError> {
        match self.exit_code {
            0 => Ok(ExitDisposition::Pass),
            EXIT_CRASH => Ok(ExitDisposition::Crash),
            EXIT_LIVENESS => Ok(ExitDisposition::Liveness),
            EXIT_CORRECTNESS => Ok(ExitDisposition::Correctness),
            code => Err(ReplayError::UnexpectedExit { code }),
        }
    }

    /// Extracts the `key=value` parameter lines the simulator echoes at
    /// startup, stopping at the first line that is neither a parameter nor
    /// blank.
    #[must_use]
    pub fn parameters(&self) -> Vec<String> {
        let mut parameters = Vec::new();
        for line in self.output.lines() {
            if PARAMETER_RE.is_match(line) {
                parameters.push(line.trim().to_string());
            } else if line.trim().is_empty() {
                continue;
            } else if !parameters.is_empty() {
                break;
            }
        }
        parameters
    }
}

/// Spawns and captures simulator runs inside one working copy.
#[derive(Debug, Clone)]
pub struct Simulator {
    work_dir: PathBuf,
}

impl Simulator {
    /// Creates a driver for the working copy at `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Returns the working-copy path.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Runs the simulator on `seed` and waits for termination, capturing
    /// all output. There is no wall-clock bound here; a replay terminates
    /// on its own, and any external bound belongs to the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::SpawnFailed`] if the child cannot be run and
    /// [`ReplayError::Signaled`] if it died without an exit code.
    pub async fn run(&self, seed: u64, mode: Mode) -> Result<SimulatorRun, ReplayError> {
        let binary = self.work_dir.join(SIMULATOR_RELATIVE_PATH);
        let seed_arg = seed.to_string();

        let mut command = Command::new(&binary);
        command
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if mode == Mode::Diagnostic {
            command.arg(DIAGNOSTIC_FLAG);
        }
        command.arg(&seed_arg);

        debug!(binary = %binary.display(), seed, ?mode, "spawning simulator");

        let mut child = command.spawn().map_err(|e| ReplayError::SpawnFailed {
            reason: format!("{}: {e}", binary.display()),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ReplayError::SpawnFailed {
            reason: "stdout pipe missing".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ReplayError::SpawnFailed {
            reason: "stderr pipe missing".to_string(),
        })?;

        let stdout_task = tokio::spawn(drain(stdout, "stdout"));
        let stderr_task = tokio::spawn(drain(stderr, "stderr"));

        let status = child.wait().await.map_err(|e| ReplayError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let stdout_bytes = stdout_task.await.map_err(|e| ReplayError::SpawnFailed {
            reason: e.to_string(),
        })??;
        let stderr_bytes = stderr_task.await.map_err(|e| ReplayError::SpawnFailed {
            reason: e.to_string(),
        })??;

        let exit_code = status.code().ok_or(ReplayError::Signaled)?;

        let mut combined = stdout_bytes;
        combined.extend_from_slice(&stderr_bytes);
        let output = String::from_utf8_lossy(&combined).into_owned();

        debug!(exit_code, bytes = output.len(), "simulator terminated");

        Ok(SimulatorRun { exit_code, output })
    }
}

/// Reads a pipe to EOF in raw chunks, mirroring each chunk to the
/// diagnostic log.
async fn drain(
    mut pipe: impl AsyncReadExt + Unpin,
    stream: &'static str,
) -> Result<Vec<u8>, ReplayError> {
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe
            .read(&mut chunk)
            .await
            .map_err(|e| ReplayError::SpawnFailed {
                reason: format!("reading simulator {stream}: {e}"),
            })?;
        if n == 0 {
            return Ok(captured);
        }
        debug!(
            stream,
            chunk = %String::from_utf8_lossy(&chunk[..n]),
            "simulator output"
        );
        captured.extend_from_slice(&chunk[..n]);
    }
}
