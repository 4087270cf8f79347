//! Group startup, shutdown, and the exit decision.
//!
//! `Supervisor::start_all` launches every registered process and then waits for
//! the first of three events: an error from a process, every process having
//! finished, or an external termination signal. Whichever wins triggers
//! `stop_all`, and `start_all` returns the outcome. When several events are ready
//! at once (for example every process failing to start), `tokio::select!` picks
//! one at random, so either exit reason may be reported.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use crate::events::ProcessSignal;
use crate::output::{LogSink, LogTag, ProcessLog};
use crate::process::ManagedProcess;
use crate::registry::{Registry, SupervisorConfig};
use crate::runner::{self, ErrorSlot};

pub struct Supervisor {
    registry: Arc<Registry>,
    config: Arc<SupervisorConfig>,
    sink: Arc<dyn LogSink>,
}

impl Supervisor {
    pub fn new(registry: Registry, config: SupervisorConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
            sink,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn log_for(&self, process: &ManagedProcess) -> ProcessLog {
        let tag = LogTag {
            name: process.name().to_string(),
            environment: process.environment().to_string(),
            color_index: process.color_index(),
            width: self.registry.name_width(),
        };
        ProcessLog::new(tag, self.sink.clone())
    }

    fn launch(&self, process: &Arc<ManagedProcess>, errors: &ErrorSlot) -> Option<JoinHandle<()>> {
        if !process.begin_start() {
            debug!(process = process.name(), "already running");
            return None;
        }
        Some(tokio::spawn(runner::spawn(
            process.clone(),
            self.config.clone(),
            self.log_for(process),
            errors.clone(),
        )))
    }

    /// Starts one registered process outside the run loop.
    pub fn spawn_by_name(
        &self,
        name: &str,
        errors: &ErrorSlot,
    ) -> Result<Option<JoinHandle<()>>, SupervisorError> {
        let process = self.lookup(name)?;
        Ok(self.launch(&process, errors))
    }

    /// Stops one registered process with the usual escalation.
    pub async fn stop_by_name(
        &self,
        name: &str,
        signal: ProcessSignal,
    ) -> Result<(), SupervisorError> {
        let process = self.lookup(name)?;
        runner::stop(&process, signal, self.config.grace_period).await
    }

    fn lookup(&self, name: &str) -> Result<Arc<ManagedProcess>, SupervisorError> {
        self.registry
            .lookup(name)
            .ok_or_else(|| SupervisorError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// Stops every registered process, one after another.
    ///
    /// Each stop returns only once its process is reaped, so on return every
    /// process has terminated. The last error encountered is returned.
    pub async fn stop_all(&self, signal: ProcessSignal) -> Result<(), SupervisorError> {
        info!(%signal, "stopping all processes");
        let mut result = Ok(());
        for process in self.registry.processes() {
            if let Err(err) = runner::stop(process, signal, self.config.grace_period).await {
                warn!(process = process.name(), error = %err, "failed to stop process");
                result = Err(err);
            }
        }
        result
    }

    /// Runs every registered process until the group should exit.
    ///
    /// - an error from any process stops the group and is returned when
    ///   `exit_on_error` is set, and is only logged otherwise;
    /// - with `exit_on_stop`, the group stops once every process has finished;
    /// - a signal received on `signals` stops the group with that same signal.
    pub async fn start_all(
        &self,
        mut signals: mpsc::Receiver<ProcessSignal>,
        exit_on_error: bool,
        exit_on_stop: bool,
    ) -> Result<(), SupervisorError> {
        let (errors, mut error_rx) = runner::error_slot();

        let handles: Vec<JoinHandle<()>> = self
            .registry
            .processes()
            .iter()
            .filter_map(|process| self.launch(process, &errors))
            .collect();

        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        if exit_on_stop {
            tokio::spawn(async move {
                for handle in handles {
                    let _ = handle.await;
                }
                let _ = done_tx.send(());
            });
        }

        loop {
            tokio::select! {
                Some(err) = error_rx.recv() => {
                    let failed = err.process_name().unwrap_or_default();
                    if exit_on_error {
                        warn!(process = %failed, error = %err, "process failed, stopping all processes");
                        if let Err(stop_err) = self.stop_all(ProcessSignal::SigInt).await {
                            warn!(error = %stop_err, "shutdown after failure reported an error");
                        }
                        return Err(err);
                    }
                    warn!(process = %failed, error = %err, "process failed, continuing");
                }
                Ok(()) = &mut done_rx, if exit_on_stop => {
                    info!("all processes have stopped");
                    return self.stop_all(ProcessSignal::SigInt).await;
                }
                Some(signal) = signals.recv() => {
                    return self.stop_all(signal).await;
                }
            }
        }
    }
}
