//! The fixed set of processes managed during one run.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SupervisorError;
use crate::output::PALETTE;
use crate::process::{ManagedProcess, ServiceDescriptor};

/// Settings shared by the registry and the lifecycle controller.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Program and leading arguments the command line is appended to.
    pub shell: Vec<String>,
    /// Number of display colors cycled through by color index.
    pub palette_len: usize,
    /// Time between the graceful signal and SIGKILL.
    pub grace_period: Duration,
    /// Start each child as the leader of a new process group.
    pub new_process_group: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shell: vec!["/bin/sh".to_string(), "-c".to_string()],
            palette_len: PALETTE.len(),
            grace_period: Duration::from_secs(10),
            new_process_group: true,
        }
    }
}

/// Immutable after construction; lookups are safe from any task.
#[derive(Debug)]
pub struct Registry {
    processes: Vec<Arc<ManagedProcess>>,
    name_width: usize,
}

impl Registry {
    /// Builds one `ManagedProcess` per enabled descriptor.
    pub fn register(
        descriptors: Vec<ServiceDescriptor>,
        config: &SupervisorConfig,
    ) -> Result<Self, SupervisorError> {
        let palette_len = config.palette_len.max(1);
        let processes: Vec<Arc<ManagedProcess>> = descriptors
            .into_iter()
            .filter(|descriptor| descriptor.enabled)
            .enumerate()
            .map(|(index, descriptor)| Arc::new(ManagedProcess::new(descriptor, index % palette_len)))
            .collect();
        if processes.is_empty() {
            return Err(SupervisorError::NoValidEntries);
        }
        let name_width = processes.iter().map(|p| p.name().len()).max().unwrap_or(0);
        tracing::debug!(count = processes.len(), "registered processes");
        Ok(Self {
            processes,
            name_width,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ManagedProcess>> {
        self.processes.iter().find(|p| p.name() == name).cloned()
    }

    /// All processes in registration order.
    pub fn processes(&self) -> &[Arc<ManagedProcess>] {
        &self.processes
    }

    /// Length of the longest process name.
    pub fn name_width(&self) -> usize {
        self.name_width
    }
}
