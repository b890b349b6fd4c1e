use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// Separator between the service part and the replica/suffix part of a container name.
const NAME_SEPARATOR: char = '_';

/// The classification value whose containers get network metrics.
const APPLICATION: &str = "application";

/// A validated container identifier.
///
/// # Examples
///
/// ```
/// # use container_metrics::container::ContainerID;
/// let container_id = ContainerID::new("4f1a7c2b9d0e").unwrap();
/// assert_eq!(container_id.as_ref(), "4f1a7c2b9d0e");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainerID`] for an empty id and
    /// [`Error::InvalidContainerID`] if the id is longer than [`CONTAINER_ID_MAX_LEN`]
    /// or contains characters that cannot appear in a runtime id.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() {
            return Err(Error::EmptyContainerID);
        }
        if src.len() > CONTAINER_ID_MAX_LEN
            || !src
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerID {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The workload class of a tracked container.
///
/// Only [`Classification::Application`] containers are probed for network counters;
/// every other class is carried through to the sink as an opaque label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
    Application,
    Other(String),
}

impl Classification {
    pub fn is_application(&self) -> bool {
        matches!(self, Classification::Application)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Classification::Application => APPLICATION,
            Classification::Other(kind) => kind,
        }
    }
}

impl FromStr for Classification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(Error::EmptyClassification),
            APPLICATION => Ok(Classification::Application),
            other => Ok(Classification::Other(other.to_owned())),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the short display name of a container from its runtime name.
///
/// The runtime reports names with a leading `/` (e.g. `/web_1`); the display name is
/// the part before the first `_`.
///
/// ```
/// # use container_metrics::container::display_name;
/// assert_eq!(display_name("/web_1"), "web");
/// assert_eq!(display_name("db"), "db");
/// ```
pub fn display_name(raw: &str) -> &str {
    let name = raw.trim_start_matches('/');
    name.split(NAME_SEPARATOR).next().unwrap_or(name)
}
