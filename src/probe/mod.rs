//! Network counters of application containers, read from inside their network
//! namespace through the container runtime.
//!
//! The runtime runs `cat /proc/net/dev` in the container as an exec session and the
//! probe parses the captured output. A [`ProbeHandle`] always holds one created but
//! not yet started session: reading starts it and immediately arms the next one, since
//! the runtime does not allow starting a session twice.
use std::sync::Arc;
use std::time::Duration;

use crate::container::ContainerID;
use crate::runtime::{ContainerRuntime, ExecID};

mod error;
pub mod netdev;

pub use error::{Error, ParseError, Result};
pub use netdev::NetworkCounters;

/// Command printing the kernel's per-interface traffic table.
const NETDEV_COMMAND: [&str; 2] = ["cat", "/proc/net/dev"];

/// Exponential backoff between readiness checks.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second check.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Total number of checks, including the first immediate one.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// The delay after the failed check number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// The in-namespace exec session of one application container.
#[derive(Debug)]
pub struct ProbeHandle {
    container_id: ContainerID,
    armed: Option<ExecID>,
}

impl ProbeHandle {
    pub fn container_id(&self) -> &ContainerID {
        &self.container_id
    }
}

#[derive(Debug)]
pub struct RuntimeProbe<R> {
    runtime: Arc<R>,
    readiness: Backoff,
}

impl<R: ContainerRuntime> RuntimeProbe<R> {
    pub fn new(runtime: Arc<R>, readiness: Backoff) -> Self {
        Self { runtime, readiness }
    }

    /// Waits until the runtime reports the container as running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] once every attempt allowed by the backoff failed.
    pub async fn wait_ready(&self, container_id: &ContainerID) -> Result<()> {
        let attempts = self.readiness.max_attempts.max(1);
        for attempt in 0..attempts {
            match self.runtime.is_running(container_id).await {
                Ok(true) => return Ok(()),
                Ok(false) => log::debug!(
                    "container `{container_id}` not running yet (check {}/{attempts})",
                    attempt + 1
                ),
                Err(err) => log::debug!(
                    "readiness check of `{container_id}` failed (check {}/{attempts}): {err}",
                    attempt + 1
                ),
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.readiness.delay_for_attempt(attempt)).await;
            }
        }

        Err(Error::NotReady {
            container_id: container_id.clone(),
            attempts,
        })
    }

    /// Creates the exec session that [`RuntimeProbe::read_counters`] will start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Probe`] if the runtime refuses to create the session.
    pub async fn attach(&self, container_id: &ContainerID) -> Result<ProbeHandle> {
        let exec_id = self.arm(container_id).await?;
        log::debug!("attached network probe `{exec_id}` to container `{container_id}`");
        Ok(ProbeHandle {
            container_id: container_id.clone(),
            armed: Some(exec_id),
        })
    }

    /// Runs the armed session, parses its output and arms a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Probe`] if the session cannot be run and [`Error::Parse`] if
    /// its output is not a valid interface table.
    pub async fn read_counters(&self, handle: &mut ProbeHandle) -> Result<NetworkCounters> {
        let exec_id = match handle.armed.take() {
            Some(exec_id) => exec_id,
            None => self.arm(&handle.container_id).await?,
        };
        let output = self
            .runtime
            .start_exec(&exec_id)
            .await
            .map_err(|source| Error::Probe {
                container_id: handle.container_id.clone(),
                source,
            })?;

        match self.arm(&handle.container_id).await {
            Ok(next) => handle.armed = Some(next),
            Err(err) => log::warn!("{err}; retrying on the next read"),
        }

        netdev::from_reader(&mut output.as_slice()).map_err(|source| Error::Parse {
            container_id: handle.container_id.clone(),
            source,
        })
    }

    async fn arm(&self, container_id: &ContainerID) -> Result<ExecID> {
        self.runtime
            .create_exec(container_id, &NETDEV_COMMAND)
            .await
            .map_err(|source| Error::Probe {
                container_id: container_id.clone(),
                source,
            })
    }
}
