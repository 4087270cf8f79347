//! Error kinds produced by the supervision core.

use std::process::ExitStatus;

use crate::events::ProcessSignal;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The OS could not launch the process.
    #[error("failed to start {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// The process exited unsuccessfully without the supervisor asking it to.
    #[error("{name} exited unexpectedly: {status}")]
    Exited { name: String, status: ExitStatus },
    /// Waiting on the process failed.
    #[error("failed to wait for {name}: {source}")]
    WaitFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// A signal could not be delivered to the process group.
    #[error("failed to send {signal} to {name}: {source}")]
    SignalFailed {
        name: String,
        signal: ProcessSignal,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown process: {name}")]
    NotRegistered { name: String },
    #[error("no valid service entry in configuration file")]
    NoValidEntries,
}

impl SupervisorError {
    /// Name of the process the error is about, if any.
    pub fn process_name(&self) -> Option<&str> {
        match self {
            SupervisorError::SpawnFailed { name, .. }
            | SupervisorError::Exited { name, .. }
            | SupervisorError::WaitFailed { name, .. }
            | SupervisorError::SignalFailed { name, .. }
            | SupervisorError::NotRegistered { name } => Some(name),
            SupervisorError::NoValidEntries => None,
        }
    }
}
