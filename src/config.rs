use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use hyper::http::uri::Authority;

use crate::container::{self, Classification};
use crate::probe::Backoff;
use crate::registry;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("report interval must be at least one second")]
    ZeroInterval,
    #[error("sample timeout must be at least one second")]
    ZeroSampleTimeout,
    #[error("at least one readiness check is required")]
    ZeroReadyAttempts,
    #[error("database name must not be empty")]
    EmptyDatabase,
    #[error("invalid time-series store address `{0}`, expected `<host>:<port>`")]
    InvalidHost(String),
    #[error("invalid application type: {0}")]
    InvalidAppType(#[from] container::Error),
    #[error("failed to determine hostname: {0}")]
    Hostname(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Samples per-container resource usage and reports it to InfluxDB.
#[derive(Debug, Clone, Parser)]
#[command(name = "container-metrics", version)]
pub struct Config {
    /// Report interval in seconds.
    #[arg(long = "report", env = "METRICS_REPORT_INTERVAL", default_value_t = 10)]
    pub report_interval: u64,

    /// InfluxDB address.
    #[arg(long, env = "METRICS_INFLUX_HOST", default_value = "127.0.0.1:8086")]
    pub host: String,

    #[arg(long, env = "METRICS_INFLUX_USERNAME", default_value = "root")]
    pub username: String,

    #[arg(
        long,
        env = "METRICS_INFLUX_PASSWORD",
        default_value = "root",
        hide_env_values = true
    )]
    pub password: String,

    #[arg(long, env = "METRICS_INFLUX_DATABASE", default_value = "test")]
    pub database: String,

    /// Docker endpoint (`unix://`, `tcp://` or `http://`). Defaults to the local socket.
    #[arg(long, env = "DOCKER_HOST")]
    pub endpoint: Option<String>,

    /// Value of the `host` column. Defaults to the kernel hostname.
    #[arg(long, env = "METRICS_HOSTNAME")]
    pub hostname: Option<String>,

    /// Mount point of the cgroup v2 hierarchy.
    #[arg(long, env = "METRICS_CGROUP_ROOT", default_value = "/sys/fs/cgroup")]
    pub cgroup_root: PathBuf,

    /// Classification of discovered containers.
    #[arg(long, env = "METRICS_APP_TYPE", default_value = "application")]
    pub app_type: String,

    /// Seconds a single container may take to sample. Defaults to the report interval.
    #[arg(long, env = "METRICS_SAMPLE_TIMEOUT")]
    pub sample_timeout: Option<u64>,

    /// Readiness checks before a container's network probe is attached.
    #[arg(long, env = "METRICS_READY_ATTEMPTS", default_value_t = 5)]
    pub ready_attempts: u32,
}

impl Config {
    /// # Errors
    ///
    /// Returns the first setting that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.report_interval == 0 {
            return Err(Error::ZeroInterval);
        }
        if self.sample_timeout == Some(0) {
            return Err(Error::ZeroSampleTimeout);
        }
        if self.ready_attempts == 0 {
            return Err(Error::ZeroReadyAttempts);
        }
        if self.database.trim().is_empty() {
            return Err(Error::EmptyDatabase);
        }
        match self.host.parse::<Authority>() {
            Ok(authority) if !authority.host().is_empty() => {}
            _ => return Err(Error::InvalidHost(self.host.clone())),
        }
        self.classification()?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn sample_timeout(&self) -> Duration {
        self.sample_timeout
            .map_or_else(|| self.interval(), Duration::from_secs)
    }

    pub fn classification(&self) -> Result<Classification> {
        Ok(self.app_type.parse()?)
    }

    pub fn readiness(&self) -> Backoff {
        Backoff {
            max_attempts: self.ready_attempts,
            ..Backoff::default()
        }
    }

    /// The configured hostname, or the kernel's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hostname`] if no hostname is configured and none can be read.
    pub fn resolve_hostname(&self) -> Result<String> {
        match self.hostname.as_deref().map(str::trim) {
            Some(hostname) if !hostname.is_empty() => Ok(hostname.to_owned()),
            _ => read_hostname(Path::new("/")),
        }
    }

    /// # Errors
    ///
    /// See [`Config::resolve_hostname`].
    pub fn registry_config(&self) -> Result<registry::Config> {
        Ok(registry::Config {
            interval: self.interval(),
            sample_timeout: self.sample_timeout(),
            hostname: self.resolve_hostname()?,
        })
    }
}

fn read_hostname(rootfs: &Path) -> Result<String> {
    let hostname = std::fs::read_to_string(rootfs.join("proc/sys/kernel/hostname"))
        .or_else(|_| std::fs::read_to_string(rootfs.join("etc/hostname")))
        .map_err(Error::Hostname)?;
    Ok(hostname.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("container-metrics").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.sample_timeout(), Duration::from_secs(10));
        assert_eq!(config.host, "127.0.0.1:8086");
        assert_eq!(config.username, "root");
        assert_eq!(config.password, "root");
        assert_eq!(config.database, "test");
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(config.classification().unwrap(), Classification::Application);
        assert_eq!(config.readiness().max_attempts, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--report",
            "30",
            "--host",
            "influx:8086",
            "--database",
            "metrics",
            "--hostname",
            "node-7",
            "--app-type",
            "db",
            "--sample-timeout",
            "5",
        ]);
        config.validate().unwrap();
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.sample_timeout(), Duration::from_secs(5));
        assert_eq!(config.resolve_hostname().unwrap(), "node-7");
        assert_eq!(
            config.classification().unwrap(),
            Classification::Other("db".to_owned())
        );
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            parse(&["--report", "0"]).validate(),
            Err(Error::ZeroInterval)
        ));
        assert!(matches!(
            parse(&["--sample-timeout", "0"]).validate(),
            Err(Error::ZeroSampleTimeout)
        ));
        assert!(matches!(
            parse(&["--ready-attempts", "0"]).validate(),
            Err(Error::ZeroReadyAttempts)
        ));
        assert!(matches!(
            parse(&["--database", " "]).validate(),
            Err(Error::EmptyDatabase)
        ));
        assert!(matches!(
            parse(&["--host", "http://influx:8086/db"]).validate(),
            Err(Error::InvalidHost(_))
        ));
        assert!(matches!(
            parse(&["--app-type", ""]).validate(),
            Err(Error::InvalidAppType(_))
        ));
    }

    #[test]
    fn test_read_hostname_fallback() {
        let rootfs = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_hostname(rootfs.path()),
            Err(Error::Hostname(_))
        ));

        std::fs::create_dir_all(rootfs.path().join("etc")).unwrap();
        std::fs::write(rootfs.path().join("etc/hostname"), "from-etc\n").unwrap();
        assert_eq!(read_hostname(rootfs.path()).unwrap(), "from-etc");

        std::fs::create_dir_all(rootfs.path().join("proc/sys/kernel")).unwrap();
        std::fs::write(rootfs.path().join("proc/sys/kernel/hostname"), "from-proc\n").unwrap();
        assert_eq!(read_hostname(rootfs.path()).unwrap(), "from-proc");
    }
}
