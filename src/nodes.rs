use std::collections::BTreeMap;
use std::fs;
use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::store::Store;

/// How long a fetched node-status snapshot stays authoritative.
pub const NODE_STATUS_TTL: Duration = Duration::from_secs(600);

const NODE_STATUS_TIMEOUT: Duration = Duration::from_secs(60);

/// Reports which mirrors are currently reachable. Mirrors absent from the
/// mapping are treated as down by every caller.
pub trait NodeStatusOracle: Send + Sync {
    fn node_status(&self) -> Result<BTreeMap<String, bool>, FetchError>;
}

/// Fetches the federation's node-status page and caches the snapshot on
/// disk, so repeated filtering within one session does not hammer the
/// status endpoint.
pub struct EsgfStatusClient {
    client: Client,
    status_url: String,
    cache_file: Utf8PathBuf,
}

impl EsgfStatusClient {
    pub fn new(status_url: &str, cache_file: Utf8PathBuf) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("esgf-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(NODE_STATUS_TIMEOUT)
            .build()
            .map_err(|err| FetchError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            status_url: status_url.to_string(),
            cache_file,
        })
    }

    fn cache_is_fresh(&self) -> bool {
        let modified = fs::metadata(self.cache_file.as_std_path())
            .and_then(|meta| meta.modified())
            .ok();
        match modified {
            Some(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age < NODE_STATUS_TTL)
                .unwrap_or(false),
            None => false,
        }
    }

    fn load_cache(&self) -> Option<BTreeMap<String, bool>> {
        let content = fs::read_to_string(self.cache_file.as_std_path()).ok()?;
        match serde_json::from_str(&content) {
            Ok(status) => Some(status),
            Err(err) => {
                warn!("could not load node status cache, fetching again: {err}");
                None
            }
        }
    }

    fn fetch(&self) -> Result<BTreeMap<String, bool>, FetchError> {
        debug!("fetching node status from {}", self.status_url);
        let response = self
            .client
            .get(&self.status_url)
            .send()
            .map_err(|err| FetchError::NodeStatusHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError::NodeStatusStatus(response.status().as_u16()));
        }
        response
            .json()
            .map_err(|err| FetchError::NodeStatusHttp(err.to_string()))
    }
}

impl NodeStatusOracle for EsgfStatusClient {
    fn node_status(&self) -> Result<BTreeMap<String, bool>, FetchError> {
        if self.cache_is_fresh() {
            if let Some(status) = self.load_cache() {
                return Ok(status);
            }
        }
        let status = self.fetch()?;
        let content = serde_json::to_vec(&status)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&self.cache_file, &content)?;
        Ok(status)
    }
}
