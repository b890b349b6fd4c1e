#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid container id: {0}")]
    InvalidContainerID(String),
    #[error("empty container id")]
    EmptyContainerID,
    #[error("empty container classification")]
    EmptyClassification,
}
pub type Result<T> = std::result::Result<T, Error>;
