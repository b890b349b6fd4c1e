#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to container runtime at `{endpoint}`: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("unsupported runtime endpoint `{0}`")]
    UnsupportedEndpoint(String),
    #[error("no such container or exec session: {0}")]
    NotFound(String),
    #[error("exec session `{0}` did not attach its output")]
    Detached(String),
    #[error("exec session `{exec_id}` exited with code {exit_code}")]
    ExecFailed { exec_id: String, exit_code: i64 },
    #[error("runtime request failed: {0}")]
    Request(#[from] bollard::errors::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
