//! Data structures for tracking process state.
//!
//! This module defines the validated input for a process (`ServiceDescriptor`),
//! its lifecycle (`ProcessState`), and the runtime record the supervisor keeps for
//! each process (`ManagedProcess`).

use std::process::ExitStatus;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::config::{Config, ServiceConfig};

/// A validated, interpolated service definition ready to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unique process name, `<service key>-<environment>` (just the key when
    /// the environment is empty).
    pub name: String,
    /// Environment label.
    pub environment: String,
    /// Shell command line with all variables substituted.
    pub command_line: String,
    /// Port taken from a `port` variable, if one is bound.
    pub port: Option<u16>,
    /// Disabled descriptors are skipped by the registry. Descriptors built from
    /// configuration are always enabled.
    pub enabled: bool,
}

impl ServiceDescriptor {
    /// Builds a descriptor from a configured service.
    ///
    /// Returns `Ok(None)` for disabled services, which are never interpolated,
    /// and for services whose template and bindings do not match. A bound `port`
    /// that is not a number is an error.
    pub fn from_service(key: &str, service: &ServiceConfig) -> Result<Option<Self>> {
        if !service.enable || !service.is_valid() {
            return Ok(None);
        }
        let command_line = service.interpolated_command()?;
        let port = service
            .variable_value("port")
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid port {:?} for service {}", raw, key))
            })
            .transpose()?;
        let name = if service.environment.is_empty() {
            key.to_string()
        } else {
            format!("{}-{}", key, service.environment)
        };
        Ok(Some(Self {
            name,
            environment: service.environment.clone(),
            command_line,
            port,
            enabled: true,
        }))
    }
}

/// Converts every enabled, valid service in `config` into a descriptor, in key
/// order.
///
/// Disabled services are skipped silently and invalid ones with a warning.
pub fn descriptors_from_config(config: &Config) -> Result<Vec<ServiceDescriptor>> {
    let mut descriptors = Vec::with_capacity(config.services.len());
    for (key, service) in &config.services {
        if !service.enable {
            tracing::debug!(service = %key, "skipping disabled service");
            continue;
        }
        match ServiceDescriptor::from_service(key, service)? {
            Some(descriptor) => descriptors.push(descriptor),
            None => tracing::warn!(service = %key, "skipping service with invalid configuration"),
        }
    }
    Ok(descriptors)
}

/// How a process run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Exit status, if the process was started and reaped.
    pub status: Option<ExitStatus>,
    /// Human-readable termination error; `None` for a clean exit.
    pub error: Option<String>,
    /// True when the exit followed a stop request from the supervisor.
    pub stopped_by_supervisor: bool,
}

impl Termination {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// The lifecycle state of a managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Never started.
    Idle,
    /// Claimed by the run loop, OS process not launched yet.
    Starting,
    /// Running as the leader of its own process group.
    Running { pid: u32 },
    /// The supervisor has signaled the group and is waiting for the reap.
    Stopping { pid: u32 },
    /// Reaped, or failed to start.
    Exited(Termination),
}

impl ProcessState {
    /// The runtime handle: the PID of the group leader while it is alive.
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } | ProcessState::Stopping { pid } => Some(*pid),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running { .. } | ProcessState::Stopping { .. }
        )
    }
}

/// Runtime record for one supervised process.
///
/// The state lives in a watch channel: every transition is visible to any task
/// holding a receiver, and `wait_for` never misses the move into `Exited`.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    environment: String,
    command_line: String,
    port: Option<u16>,
    color_index: usize,
    state: watch::Sender<ProcessState>,
}

impl ManagedProcess {
    pub fn new(descriptor: ServiceDescriptor, color_index: usize) -> Self {
        let (state, _) = watch::channel(ProcessState::Idle);
        Self {
            name: descriptor.name,
            environment: descriptor.environment,
            command_line: descriptor.command_line,
            port: descriptor.port,
            color_index,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The name with the `-<environment>` suffix removed, for display.
    pub fn clear_name(&self) -> String {
        clear_name(&self.name, &self.environment)
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn color_index(&self) -> usize {
        self.color_index
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.borrow().pid()
    }

    /// Error text of the last run, kept after exit.
    pub fn termination_error(&self) -> Option<String> {
        match &*self.state.borrow() {
            ProcessState::Exited(termination) => termination.error.clone(),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// Claims the process for a new run. Fails if a run is already in progress.
    pub fn begin_start(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            *state = ProcessState::Starting;
            true
        })
    }

    pub(crate) fn mark_running(&self, pid: u32) {
        self.state.send_replace(ProcessState::Running { pid });
    }

    /// Moves `Running` to `Stopping` and returns the PID to signal.
    ///
    /// A process that is already stopping yields its PID again; anything else
    /// yields `None`.
    pub(crate) fn mark_stopping(&self) -> Option<u32> {
        let mut target = None;
        self.state.send_if_modified(|state| match *state {
            ProcessState::Running { pid } => {
                *state = ProcessState::Stopping { pid };
                target = Some(pid);
                true
            }
            ProcessState::Stopping { pid } => {
                target = Some(pid);
                false
            }
            _ => false,
        });
        target
    }

    /// Records the end of a run and wakes every waiter.
    ///
    /// The supervisor-initiated flag is derived from the state being replaced, so
    /// a stop request racing with a natural exit is resolved in one step.
    pub(crate) fn mark_exited(
        &self,
        status: Option<ExitStatus>,
        error: Option<String>,
    ) -> Termination {
        let mut termination = Termination {
            status,
            error,
            stopped_by_supervisor: false,
        };
        self.state.send_modify(|state| {
            termination.stopped_by_supervisor = matches!(state, ProcessState::Stopping { .. });
            *state = ProcessState::Exited(termination.clone());
        });
        termination
    }
}

/// Strips the `-<environment>` suffix from a process name.
pub fn clear_name(name: &str, environment: &str) -> String {
    if environment.is_empty() {
        return name.to_string();
    }
    name.replace(&format!("-{}", environment), "")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn descriptor(name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            environment: "dev".to_string(),
            command_line: "true".to_string(),
            port: None,
            enabled: true,
        }
    }

    fn service(command: &str, vars: &[(&str, &str)]) -> ServiceConfig {
        ServiceConfig {
            command: command.to_string(),
            environment: "dev".to_string(),
            enable: true,
            variables: vars
                .iter()
                .map(|(k, v)| HashMap::from([(k.to_string(), v.to_string())]))
                .collect(),
        }
    }

    #[test]
    fn descriptor_interpolates_and_extracts_port() {
        let d = ServiceDescriptor::from_service("web", &service("echo {{.port}}", &[("port", "8080")]))
            .unwrap()
            .unwrap();
        assert_eq!(d.name, "web-dev");
        assert_eq!(d.command_line, "echo 8080");
        assert_eq!(d.port, Some(8080));
        assert!(d.enabled);
    }

    #[test]
    fn descriptor_without_bindings_is_skipped() {
        let d = ServiceDescriptor::from_service("web", &service("echo {{.port}}", &[])).unwrap();
        assert!(d.is_none());
    }

    #[test]
    fn non_numeric_port_is_an_error() {
        let result = ServiceDescriptor::from_service("web", &service("echo {{.port}}", &[("port", "http")]));
        assert!(result.is_err());
    }

    #[test]
    fn disabled_service_yields_no_descriptor() {
        let mut s = service("sleep 1", &[]);
        s.enable = false;
        assert!(ServiceDescriptor::from_service("sleeper", &s).unwrap().is_none());
    }

    #[test]
    fn disabled_service_with_bad_port_does_not_fail_loading() {
        let mut config = Config::default();
        config.services.insert("ok".into(), service("true", &[]));
        let mut off = service("echo {{.port}}", &[("port", "http")]);
        off.enable = false;
        config.services.insert("off".into(), off);
        let mut broken = service("echo {{.missing}}", &[]);
        broken.enable = false;
        config.services.insert("broken".into(), broken);

        let descriptors = descriptors_from_config(&config).unwrap();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ok-dev"]);
    }

    #[test]
    fn descriptors_follow_key_order_and_skip_invalid() {
        let mut config = Config::default();
        config.services.insert("b".into(), service("true", &[]));
        config.services.insert("a".into(), service("echo {{.port}}", &[("port", "1")]));
        config.services.insert("c".into(), service("echo {{.missing}}", &[]));
        let names: Vec<String> = descriptors_from_config(&config)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a-dev", "b-dev"]);
    }

    #[test]
    fn clear_name_strips_environment_suffix() {
        assert_eq!(clear_name("api-prod", "prod"), "api");
        assert_eq!(clear_name("api-", ""), "api-");
        let p = ManagedProcess::new(descriptor("api-dev"), 0);
        assert_eq!(p.clear_name(), "api");
    }

    #[test]
    fn begin_start_refuses_active_process() {
        let p = ManagedProcess::new(descriptor("api-dev"), 0);
        assert!(p.begin_start());
        assert!(!p.begin_start());
        p.mark_running(42);
        assert!(!p.begin_start());
        assert_eq!(p.pid(), Some(42));
    }

    #[test]
    fn exit_after_stop_request_is_supervisor_initiated() {
        let p = ManagedProcess::new(descriptor("api-dev"), 0);
        p.begin_start();
        p.mark_running(7);
        assert_eq!(p.mark_stopping(), Some(7));
        assert_eq!(p.mark_stopping(), Some(7));
        let t = p.mark_exited(None, Some("signal: 2 (SIGINT)".into()));
        assert!(t.stopped_by_supervisor);
        assert_eq!(p.pid(), None);
        assert_eq!(p.termination_error().as_deref(), Some("signal: 2 (SIGINT)"));
        assert!(p.begin_start());
    }

    #[test]
    fn natural_exit_is_not_supervisor_initiated() {
        let p = ManagedProcess::new(descriptor("api-dev"), 0);
        p.begin_start();
        p.mark_running(7);
        let t = p.mark_exited(None, None);
        assert!(!t.stopped_by_supervisor);
        assert!(t.success());
        assert_eq!(p.mark_stopping(), None);
    }
}
