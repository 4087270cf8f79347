//! servrack: a local multi-process supervisor.
//!
//! Services from the configuration file become `ServiceDescriptor`s, the
//! `Registry` turns them into `ManagedProcess`es, and the `Supervisor` runs them
//! as process groups until one fails, all finish, or a termination signal
//! arrives.

pub mod config;
pub mod error;
pub mod events;
pub mod output;
pub mod process;
pub mod registry;
pub mod runner;
pub mod supervisor;
pub mod template;

pub use error::SupervisorError;
pub use events::ProcessSignal;
pub use registry::{Registry, SupervisorConfig};
pub use supervisor::Supervisor;
