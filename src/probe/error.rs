use std::num::ParseIntError;

use crate::container::ContainerID;

/// Malformed `/proc/net/dev` output.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing interface table header")]
    MissingHeader,
    #[error("missing ':' after interface name at line {line}")]
    MissingSeparator { line: usize },
    #[error("interface '{iface}' at line {line} has {found} counters")]
    TooFewFields {
        iface: String,
        line: usize,
        found: usize,
    },
    #[error("invalid counter for '{iface}' at line {line}: '{value}': {source}")]
    InvalidValue {
        iface: String,
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },
    #[error("error reading probe output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container `{container_id}` not running after {attempts} readiness checks")]
    NotReady {
        container_id: ContainerID,
        attempts: u32,
    },
    #[error("network probe failed for container `{container_id}`: {source}")]
    Probe {
        container_id: ContainerID,
        #[source]
        source: crate::runtime::Error,
    },
    #[error("malformed network counters from container `{container_id}`: {source}")]
    Parse {
        container_id: ContainerID,
        #[source]
        source: ParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
