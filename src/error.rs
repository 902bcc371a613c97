use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::replica::ReplicaClassKey;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("unknown table kind: {0}")]
    UnknownTableKind(String),

    #[error("unknown grid label: {0}")]
    UnknownGridLabel(String),

    #[error("invalid version stamp: {0}")]
    InvalidVersionStamp(String),

    #[error("no version stamp in record for {0}")]
    MissingVersionStamp(String),

    #[error("no date range in filename: {0}")]
    InvalidFileDateRange(String),

    #[error("search request to {url} failed: {message}")]
    SearchHttp { url: String, message: String },

    #[error("search endpoint {url} returned status {status}")]
    SearchStatus { url: String, status: u16 },

    #[error("unexpected search response from {url}: {message}")]
    SearchResponse { url: String, message: String },

    #[error("no index node reachable:\n{}", join_lines(.errors))]
    SearchUnavailable { errors: Vec<String> },

    #[error("node status request failed: {0}")]
    NodeStatusHttp(String),

    #[error("node status endpoint returned status {0}")]
    NodeStatusStatus(u16),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("transfer of {url} failed: {message}")]
    TransferHttp { url: String, message: String },

    #[error("{url} returned status {status}")]
    TransferStatus { url: String, status: u16 },

    #[error("wrong {algorithm} checksum for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedChecksum(String),

    #[error("{0} already exists but is not a valid data file")]
    LocalFileInvalid(String),

    #[error("no replica class common to every file of {0}")]
    NoCommonKey(String),

    #[error("failed to download {dataset} from any replica class:\n{report}")]
    DownloadExhausted {
        dataset: String,
        report: DownloadReport,
    },

    #[error("missing config file esgf-fetch.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Per-key error lists collected while trying every replica class of one
/// dataset.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub attempts: Vec<KeyAttempt>,
}

#[derive(Debug)]
pub struct KeyAttempt {
    pub key: ReplicaClassKey,
    pub errors: Vec<FetchError>,
}

impl DownloadReport {
    pub fn record(&mut self, key: ReplicaClassKey, errors: Vec<FetchError>) {
        self.attempts.push(KeyAttempt { key, errors });
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

impl fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for attempt in &self.attempts {
            writeln!(f, "- {}:", attempt.key)?;
            for error in &attempt.errors {
                writeln!(f, "    {error}")?;
            }
        }
        Ok(())
    }
}

fn join_lines(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("- {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
