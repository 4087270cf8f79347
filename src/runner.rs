//! Process execution and supervised termination.
//!
//! `spawn` drives one `ManagedProcess` through launch, output streaming and reap.
//! `stop` signals the process group, waits for the reap, and escalates to SIGKILL
//! once the grace period runs out. The `Child` handle never leaves the spawn task;
//! `stop` only ever signals by PID and observes the state channel.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use crate::events::ProcessSignal;
use crate::output::{ProcessLog, StreamKind};
use crate::process::{ManagedProcess, ProcessState};
use crate::registry::SupervisorConfig;

/// How long output readers may keep draining after the process was reaped.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Producer side of the single-slot error channel.
///
/// Offers never block: while the slot is occupied, further errors are dropped.
#[derive(Debug, Clone)]
pub struct ErrorSlot {
    tx: mpsc::Sender<SupervisorError>,
}

impl ErrorSlot {
    pub fn offer(&self, err: SupervisorError) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) | Err(TrySendError::Closed(dropped)) => {
                debug!(error = %dropped, "error slot occupied, dropping error");
            }
        }
    }
}

/// Creates the error slot shared by every process of a run.
pub fn error_slot() -> (ErrorSlot, mpsc::Receiver<SupervisorError>) {
    let (tx, rx) = mpsc::channel(1);
    (ErrorSlot { tx }, rx)
}

/// Launches `process` and supervises it until it is reaped.
///
/// The process should already be claimed with `ManagedProcess::begin_start`; an
/// unclaimed process is claimed here, and one with a run in progress is left alone.
pub async fn spawn(
    process: Arc<ManagedProcess>,
    config: Arc<SupervisorConfig>,
    log: ProcessLog,
    errors: ErrorSlot,
) {
    if process.state() != ProcessState::Starting && !process.begin_start() {
        debug!(process = process.name(), "already running, not spawning");
        return;
    }

    let Some((program, shell_args)) = config.shell.split_first() else {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "no shell configured");
        fail_start(&process, &log, &errors, err);
        return;
    };
    let mut command = Command::new(program);
    command
        .args(shell_args)
        .arg(process.command_line())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    if config.new_process_group {
        command.process_group(0);
    }

    if let Some(port) = process.port() {
        command.env("PORT", port.to_string());
        log.notice(&format!("Starting {} on port {}", process.clear_name(), port));
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            fail_start(&process, &log, &errors, err);
            return;
        }
    };
    let Some(pid) = child.id() else {
        // Only possible once the child has been reaped.
        let status = child.wait().await.ok();
        process.mark_exited(status, None);
        log.notice(&format!("Terminating {}", process.name()));
        return;
    };
    process.mark_running(pid);
    info!(process = process.name(), pid, "process started");

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_stream(StreamKind::Stdout, stdout, log.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_stream(StreamKind::Stderr, stderr, log.clone())));
    }

    // The reap releases the PID. Clear it before draining so `stop` never
    // signals a reused PID.
    let (termination, error) = match child.wait().await {
        Ok(status) => {
            let termination =
                process.mark_exited(Some(status), (!status.success()).then(|| status.to_string()));
            debug!(
                process = process.name(),
                %status,
                by_supervisor = termination.stopped_by_supervisor,
                "process exited"
            );
            let error = (!status.success()).then(|| SupervisorError::Exited {
                name: process.name().to_string(),
                status,
            });
            (termination, error)
        }
        Err(source) => {
            let termination = process.mark_exited(None, Some(source.to_string()));
            warn!(process = process.name(), error = %source, "failed to wait for process");
            let error = SupervisorError::WaitFailed {
                name: process.name().to_string(),
                source,
            };
            (termination, Some(error))
        }
    };

    // Descendants may keep the pipes open after the leader is gone.
    let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;

    if let Some(err) = error {
        if !termination.stopped_by_supervisor {
            errors.offer(err);
        }
    }
    log.notice(&format!("Terminating {}", process.name()));
}

fn fail_start(process: &ManagedProcess, log: &ProcessLog, errors: &ErrorSlot, err: io::Error) {
    warn!(process = process.name(), error = %err, "failed to start process");
    log.notice(&format!("Failed to start {}: {}", process.name(), err));
    process.mark_exited(None, Some(err.to_string()));
    errors.offer(SupervisorError::SpawnFailed {
        name: process.name().to_string(),
        source: err,
    });
}

/// Stops `process` by signaling its process group.
///
/// Returns immediately when nothing is running. Otherwise waits until the process
/// is reaped, sending SIGKILL to the group if that takes longer than `grace`.
pub async fn stop(
    process: &ManagedProcess,
    signal: ProcessSignal,
    grace: Duration,
) -> Result<(), SupervisorError> {
    let mut state_rx = process.subscribe();
    let launched = state_rx
        .wait_for(|state| *state != ProcessState::Starting)
        .await
        .is_ok();
    if !launched {
        return Ok(());
    }
    let Some(pid) = process.mark_stopping() else {
        return Ok(());
    };

    debug!(process = process.name(), pid, %signal, "signaling process group");
    match signal_group(pid, signal) {
        Ok(()) => {}
        Err(err) if is_gone(&err) => {
            debug!(process = process.name(), pid, "process already gone");
        }
        Err(source) => {
            return Err(SupervisorError::SignalFailed {
                name: process.name().to_string(),
                signal,
                source,
            });
        }
    }

    let reaped = tokio::time::timeout(grace, state_rx.wait_for(|state| state.pid() != Some(pid)))
        .await
        .is_ok();
    if reaped {
        return Ok(());
    }

    warn!(
        process = process.name(),
        pid,
        grace_ms = grace.as_millis() as u64,
        "grace period elapsed, killing process group"
    );
    let mut result = Ok(());
    if let Err(source) = signal_group(pid, ProcessSignal::SigKill) {
        if !is_gone(&source) {
            result = Err(SupervisorError::SignalFailed {
                name: process.name().to_string(),
                signal: ProcessSignal::SigKill,
                source,
            });
        }
    }
    let _ = state_rx.wait_for(|state| state.pid() != Some(pid)).await;
    result
}

/// Sends `signal` to the group led by `pid`, or to `pid` alone when it does not
/// lead its own group.
#[cfg(unix)]
fn signal_group(pid: u32, signal: ProcessSignal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid < 0 {
        return Err(io::Error::last_os_error());
    }
    let target = if pgid == pid { -pid } else { pid };
    let rc = unsafe { libc::kill(target, signal.as_raw()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: ProcessSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signaling requires a unix platform",
    ))
}

#[cfg(unix)]
fn is_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn is_gone(_err: &io::Error) -> bool {
    false
}

async fn read_stream<R>(stream: StreamKind, reader: R, log: ProcessLog)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Ok(Some(segment)) = segments.next_segment().await {
        let line = String::from_utf8_lossy(&segment);
        log.line(stream, line.trim_end_matches('\r'));
    }
}
