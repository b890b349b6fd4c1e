use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::container::ContainerID;

use super::stats::{CpuStat, KeyValueStat, MemoryStat, StatParseError, parse_single_value};
use super::{CounterReader, CounterSnapshot, Error, Result};

const NANOS_PER_MICRO: u64 = 1_000;

/// Reads container counters from a cgroup v2 hierarchy.
///
/// Both cgroup drivers of the Docker daemon are supported: the systemd layout
/// (`system.slice/docker-<id>.scope`) and the cgroupfs layout (`docker/<id>`).
#[derive(Debug, Clone)]
pub struct CgroupReader {
    root: PathBuf,
}

impl CgroupReader {
    /// Creates a reader for the cgroup v2 hierarchy mounted at `root`
    /// (usually `/sys/fs/cgroup`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, container_id: &ContainerID) -> Result<PathBuf> {
        let candidates = [
            self.root
                .join("system.slice")
                .join(format!("docker-{container_id}.scope")),
            self.root.join("docker").join(container_id.as_str()),
        ];
        candidates
            .into_iter()
            .find(|dir| dir.is_dir())
            .ok_or_else(|| Error::NotFound {
                container_id: container_id.clone(),
                root: self.root.clone(),
            })
    }
}

fn parse_file<T>(
    path: &Path,
    parser: impl FnOnce(&mut BufReader<File>) -> std::result::Result<T, StatParseError>,
) -> Result<T> {
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    parser(&mut BufReader::new(file)).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl CounterReader for CgroupReader {
    fn read_counters(&self, container_id: &ContainerID) -> Result<CounterSnapshot> {
        let dir = self.container_dir(container_id)?;
        log::trace!("reading counters of `{}` from {}", container_id, dir.display());

        let cpu = parse_file(&dir.join("cpu.stat"), CpuStat::from_reader)?;
        let memory = parse_file(&dir.join("memory.stat"), MemoryStat::from_reader)?;
        let usage = parse_file(&dir.join("memory.current"), parse_single_value)?;
        // memory.peak only exists since Linux 5.19
        let peak_path = dir.join("memory.peak");
        let max_usage = if peak_path.exists() {
            parse_file(&peak_path, parse_single_value)?
        } else {
            usage
        };

        Ok(CounterSnapshot {
            cpu_user: cpu.user_usec.saturating_mul(NANOS_PER_MICRO),
            cpu_system: cpu.system_usec.saturating_mul(NANOS_PER_MICRO),
            cpu_total: cpu.usage_usec.saturating_mul(NANOS_PER_MICRO),
            mem_usage: usage,
            mem_max_usage: max_usage,
            mem_rss: memory.anon,
        })
    }
}
