use hyper::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid time-series store address `{address}`: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: hyper::http::uri::InvalidUri,
    },
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to build write request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("failed to reach time-series store: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("time-series store did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("time-series store rejected batch with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

pub type Result<T> = std::result::Result<T, Error>;
