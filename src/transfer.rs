use std::io::Write;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::FetchError;

/// Mirrors are given ten minutes per file before a transfer counts as stuck.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Streams one remote payload into a sink. This is the seam between replicas
/// and the network; tests substitute an in-memory implementation.
pub trait Transfer: Send + Sync {
    /// Fetch `url` and write the payload into `sink`, returning the number
    /// of bytes transferred.
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError>;
}

#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("esgf-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transfer for HttpTransfer {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::TransferHttp {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(FetchError::TransferStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        std::io::copy(&mut response, sink).map_err(|err| FetchError::TransferHttp {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}
