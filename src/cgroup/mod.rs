//! Per-container CPU and memory counters from the Linux cgroup v2 filesystem.
//!
//! The [`CounterReader`] trait is the boundary the sampling engine depends on; it
//! answers one question, "what are this container's counters right now", and keeps
//! no state between calls. [`CgroupReader`] is the production implementation.
//!
//! # Supported Stats
//!
//! - `cpu.stat` (`usage_usec`, `user_usec`, `system_usec`)
//! - `memory.current` and `memory.peak`
//! - `memory.stat` (`anon`)
mod error;
mod reader;
pub mod stats;

pub use error::{Error, Result};
pub use reader::CgroupReader;

use crate::container::ContainerID;

/// A point-in-time copy of a container's kernel accounting counters.
///
/// CPU counters are cumulative nanoseconds; memory values are bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub cpu_user: u64,
    pub cpu_system: u64,
    pub cpu_total: u64,
    pub mem_usage: u64,
    pub mem_max_usage: u64,
    pub mem_rss: u64,
}

/// Reads the current counters of a container.
pub trait CounterReader: Send + Sync + 'static {
    /// # Errors
    ///
    /// Fails if the container's accounting data cannot be located or parsed.
    fn read_counters(&self, container_id: &ContainerID) -> Result<CounterSnapshot>;
}
