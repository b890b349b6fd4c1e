use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use super::{Batch, Error, Result, Sink};

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes batches to the series endpoint of an InfluxDB 0.8 server.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client<HttpConnector, Full<Bytes>>,
    uri: Uri,
    authorization: String,
}

impl InfluxSink {
    /// Creates a sink writing to database `database` on `host` (`<address>:<port>`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `host` and `database` do not form a valid URI.
    pub fn new(host: &str, database: &str, username: &str, password: &str) -> Result<Self> {
        let address = format!("http://{host}/db/{database}/series");
        let uri = address
            .parse::<Uri>()
            .map_err(|source| Error::InvalidAddress { address, source })?;
        let credentials = BASE64_STANDARD.encode(format!("{username}:{password}"));

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            uri,
            authorization: format!("Basic {credentials}"),
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl Sink for InfluxSink {
    async fn write(&self, batch: &Batch) -> Result<()> {
        let body = serde_json::to_vec(&batch.series())?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, &self.authorization)
            .body(Full::new(Bytes::from(body)))?;

        let response = tokio::time::timeout(WRITE_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| Error::Timeout(WRITE_TIMEOUT))??;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            return Err(Error::Rejected {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        log::trace!("wrote {} points to {}", batch.len(), self.uri);

        Ok(())
    }
}
