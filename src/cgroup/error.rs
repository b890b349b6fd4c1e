use std::path::PathBuf;

use crate::container::ContainerID;

use super::stats::StatParseError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no cgroup found for container `{container_id}` under `{}`", root.display())]
    NotFound {
        container_id: ContainerID,
        root: PathBuf,
    },
    #[error("failed to open file `{}`: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: StatParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
