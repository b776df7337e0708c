//! Runs the external block verifier and translates its exit status.
//!
//! The verifier is invoked as `<path> test <number> <hash> <state root>
//! <receipts root>`. Its stdout and stderr are drained line by line into
//! the log while the process runs, so neither pipe can fill up and stall it.
//!
//! On unix the verifier leads its own process group. Whenever siege kills
//! it (deadline, wait failure, or the request being dropped) the whole group
//! is killed, so helpers it forked cannot keep the output pipes open.

use std::{
    path::{
        Path,
        PathBuf,
    },
    process::{
        ExitStatus,
        Stdio,
    },
    time::Duration,
};

use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncRead,
        BufReader,
    },
    process::{
        Child,
        Command,
    },
    task::JoinHandle,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    block::DecodedBlock,
    error::VerificationError,
};

/// First positional argument passed to the verifier.
pub const VERIFIER_SUBCOMMAND: &str = "test";

/// Exit code reported when the verifier was terminated by a signal.
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// How long output tasks may run after the verifier was killed.
const KILLED_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Why verification did not run for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The request is not a raw block import.
    NotSentinel,
    /// The block import carried no params.
    MissingPayload,
    /// The payload was not a decodable block.
    Undecodable,
}

/// Result of a single verification attempt.
#[derive(Debug)]
pub enum VerificationOutcome {
    Skipped(SkipReason),
    Succeeded,
    FailedWithExitCode(i32),
    FailedToStart(std::io::Error),
    FailedToComplete(std::io::Error),
    TimedOut(Duration),
}

impl VerificationOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Skipped(_) => "skipped",
            VerificationOutcome::Succeeded => "succeeded",
            VerificationOutcome::FailedWithExitCode(_) => "exit_code",
            VerificationOutcome::FailedToStart(_) => "failed_to_start",
            VerificationOutcome::FailedToComplete(_) => "failed_to_complete",
            VerificationOutcome::TimedOut(_) => "timed_out",
        }
    }

    /// Collapses the outcome into "may the upstream response be relayed".
    pub fn into_result(self) -> Result<(), VerificationError> {
        match self {
            VerificationOutcome::Skipped(_) | VerificationOutcome::Succeeded => Ok(()),
            VerificationOutcome::FailedWithExitCode(code) => Err(VerificationError::ExitCode(code)),
            VerificationOutcome::FailedToStart(err) => Err(VerificationError::FailedToStart(err)),
            VerificationOutcome::FailedToComplete(err) => {
                Err(VerificationError::FailedToComplete(err))
            }
            VerificationOutcome::TimedOut(limit) => Err(VerificationError::TimedOut(limit)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Handle to the verifier executable. Cheap to clone, holds no process
/// state between runs.
#[derive(Debug, Clone)]
pub struct Verifier {
    path: PathBuf,
    timeout: Option<Duration>,
}

impl Verifier {
    pub fn new(path: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builds the verifier command for `block` with piped output streams.
    pub fn command(&self, block: &DecodedBlock) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.arg(VERIFIER_SUBCOMMAND)
            .args(block.verifier_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Runs the verifier once for `block` and waits for it to exit.
    #[tracing::instrument(level = "debug", skip_all, fields(block_number = block.number))]
    pub async fn verify(&self, block: &DecodedBlock) -> VerificationOutcome {
        let mut child = match self.command(block).spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(path = %self.path.display(), %err, "failed to start verifier");
                return VerificationOutcome::FailedToStart(err);
            }
        };
        debug!(pid = ?child.id(), hash = %block.hash, "verifier started");
        let mut group = ProcessGroupGuard::new(&child);

        let stdout = child
            .stdout
            .take()
            .map(|out| spawn_drain(out, OutputStream::Stdout, block.number));
        let stderr = child
            .stderr
            .take()
            .map(|err| spawn_drain(err, OutputStream::Stderr, block.number));

        let outcome = self.wait(&mut child, &mut group).await;

        let grace = match outcome {
            VerificationOutcome::TimedOut(_) | VerificationOutcome::FailedToComplete(_) => {
                Some(KILLED_DRAIN_GRACE)
            }
            _ => None,
        };
        let (stdout_lines, stderr_lines) = tokio::join!(
            join_drain(stdout, OutputStream::Stdout, grace),
            join_drain(stderr, OutputStream::Stderr, grace)
        );
        debug!(
            stdout_lines,
            stderr_lines,
            outcome = outcome.label(),
            "verifier finished"
        );

        outcome
    }

    async fn wait(&self, child: &mut Child, group: &mut ProcessGroupGuard) -> VerificationOutcome {
        let status = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(timeout = ?limit, "verifier deadline expired, killing it");
                        group.kill();
                        if let Err(err) = child.kill().await {
                            error!(%err, "failed to kill timed out verifier");
                        }
                        return VerificationOutcome::TimedOut(limit);
                    }
                }
            }
            None => child.wait().await,
        };

        match status {
            Ok(status) => {
                group.disarm();
                exit_outcome(status)
            }
            Err(err) => {
                error!(%err, "failed to wait for verifier, killing it");
                group.kill();
                if let Err(kill_err) = child.start_kill() {
                    error!(err = %kill_err, "failed to kill verifier");
                }
                VerificationOutcome::FailedToComplete(err)
            }
        }
    }
}

/// Kills the verifier's process group when dropped, unless the verifier
/// exited on its own.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, %err, "failed to kill verifier process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn exit_outcome(status: ExitStatus) -> VerificationOutcome {
    if status.success() {
        return VerificationOutcome::Succeeded;
    }
    let code = status.code().unwrap_or(SIGNALED_EXIT_CODE);
    error!(code, %status, "verifier exited with error");
    VerificationOutcome::FailedWithExitCode(code)
}

fn spawn_drain<R>(reader: R, stream: OutputStream, block_number: u64) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(drain_lines(reader, stream, block_number))
}

/// Logs every line of `reader` until EOF. Non UTF-8 output is logged lossily.
async fn drain_lines<R>(reader: R, stream: OutputStream, block_number: u64) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut lines = 0usize;
    loop {
        match segments.next_segment().await {
            Ok(Some(segment)) => {
                lines += 1;
                let line = String::from_utf8_lossy(&segment);
                let line = line.trim_end_matches('\r');
                match stream {
                    OutputStream::Stdout => {
                        info!(target: "verifier::stdout", block_number, "{line}")
                    }
                    OutputStream::Stderr => {
                        warn!(target: "verifier::stderr", block_number, "{line}")
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                match stream {
                    OutputStream::Stdout => error!(%err, "verifier stdout stopped"),
                    OutputStream::Stderr => error!(%err, "verifier stderr stopped"),
                }
                break;
            }
        }
    }
    lines
}

/// Waits for a drain task. With a `grace` period the task is aborted once
/// it expires, since a killed verifier may have left the pipe open.
async fn join_drain(
    handle: Option<JoinHandle<usize>>,
    stream: OutputStream,
    grace: Option<Duration>,
) -> usize {
    let Some(mut handle) = handle else {
        return 0;
    };
    let joined = match grace {
        Some(grace) => {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(?stream, "verifier output still open after kill, abandoning it");
                    handle.abort();
                    return 0;
                }
            }
        }
        None => handle.await,
    };
    joined.unwrap_or_else(|err| {
        error!(%err, "verifier output task failed");
        0
    })
}
