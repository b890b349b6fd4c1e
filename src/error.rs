/// Errors that stop the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::Error),
    #[error("container runtime unavailable: {0}")]
    Runtime(#[from] crate::runtime::Error),
    #[error("startup discovery failed: {0}")]
    Discovery(#[from] crate::discovery::Error),
    #[error("invalid sink configuration: {0}")]
    Sink(#[from] crate::sink::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::warn!("{err}");
                None
            }
        }
    }
}
