//! Signals exchanged between the OS, the run loop, and managed processes.
//!
//! `ProcessSignal` is what the supervisor forwards to process groups. External
//! termination requests (SIGINT, SIGTERM, SIGHUP) arrive on a channel of the same
//! type so the run loop can pass the exact signal through to `stop_all`.

use std::fmt;

use tokio::sync::mpsc;

/// A signal the supervisor can deliver to a managed process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Interrupt (the default graceful stop).
    SigInt,
    /// Terminate.
    SigTerm,
    /// Hangup.
    SigHup,
    /// Unconditional kill, used for escalation.
    SigKill,
}

impl ProcessSignal {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessSignal::SigInt => "SIGINT",
            ProcessSignal::SigTerm => "SIGTERM",
            ProcessSignal::SigHup => "SIGHUP",
            ProcessSignal::SigKill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            ProcessSignal::SigInt => libc::SIGINT,
            ProcessSignal::SigTerm => libc::SIGTERM,
            ProcessSignal::SigHup => libc::SIGHUP,
            ProcessSignal::SigKill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Forwards SIGINT, SIGTERM and SIGHUP received by the supervisor into `tx`.
///
/// The listener keeps running after the first signal so a second Ctrl-C during a
/// slow shutdown is not lost; the run loop only consumes the first one.
pub fn spawn_signal_listener(tx: mpsc::Sender<ProcessSignal>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm, mut sighup) = match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
                signal(SignalKind::hangup()),
            ) {
                (Ok(int), Ok(term), Ok(hup)) => (int, term, hup),
                _ => {
                    tracing::warn!("failed to install signal handlers");
                    return;
                }
            };
            loop {
                let received = tokio::select! {
                    Some(()) = sigint.recv() => ProcessSignal::SigInt,
                    Some(()) = sigterm.recv() => ProcessSignal::SigTerm,
                    Some(()) = sighup.recv() => ProcessSignal::SigHup,
                    else => break,
                };
                tracing::info!(signal = %received, "received termination signal");
                if tx.send(received).await.is_err() {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(ProcessSignal::SigInt).await.is_err() {
                    break;
                }
            }
        }
    });
}
