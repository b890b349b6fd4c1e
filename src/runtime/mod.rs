//! The capabilities the agent needs from the container runtime.
//!
//! [`ContainerRuntime`] names every call the agent makes against the runtime's
//! control API: listing containers, checking readiness, running a command inside a
//! container's namespaces and following container lifecycle events.
//! [`DockerRuntime`] implements it against the Docker Engine API.
use std::fmt;

use tokio::sync::mpsc;

use crate::container::ContainerID;

mod docker;
mod error;

pub use docker::DockerRuntime;
pub use error::{Error, Result};

/// A container as reported by the runtime's list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Runtime names, each with a leading `/`.
    pub names: Vec<String>,
    /// Human readable status, e.g. `Up 3 hours` or `Exited (0) 2 minutes ago`.
    pub status: String,
}

impl ContainerSummary {
    /// Whether the container already exited.
    pub fn has_exited(&self) -> bool {
        self.status.starts_with("Exit")
    }
}

/// A container lifecycle change observed on the runtime's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Started { id: String, name: String },
    Stopped { id: String },
}

/// Identifier of an exec session created inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecID(String);

impl ExecID {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ContainerRuntime: Send + Sync + 'static {
    /// Lists all containers, including exited ones.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<ContainerSummary>>> + Send;

    /// Reports whether the container is running. An unknown container is not running.
    fn is_running(&self, container_id: &ContainerID) -> impl Future<Output = Result<bool>> + Send;

    /// Creates (but does not start) an exec session running `cmd` inside the
    /// container, with standard output captured.
    fn create_exec(
        &self,
        container_id: &ContainerID,
        cmd: &[&str],
    ) -> impl Future<Output = Result<ExecID>> + Send;

    /// Starts a created exec session and returns everything it wrote to standard output.
    ///
    /// A session can only be started once.
    fn start_exec(&self, exec_id: &ExecID) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Forwards container start and stop events to `tx` until the event stream ends
    /// or the receiver is dropped.
    fn watch_events(
        &self,
        tx: mpsc::Sender<ContainerEvent>,
    ) -> impl Future<Output = Result<()>> + Send;
}
