use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::facets::FacetQuery;

/// Status page of the federation, also scraped by the original web UI.
pub const DEFAULT_NODE_STATUS_URL: &str = "https://aims2.llnl.gov/api/nodes";

/// The public index nodes queried by default. Every node is asked the same
/// question; reconciliation collapses the redundancy.
pub fn default_index_nodes() -> Vec<String> {
    [
        "https://esgf.ceda.ac.uk/esg-search",
        "https://esgf-node.llnl.gov/esg-search",
        "https://esgf-data.dkrz.de/esg-search",
        "https://esgf-node.ipsl.upmc.fr/esg-search",
        "https://esg-dn1.nsc.liu.se/esg-search",
        "https://esgf.nci.org.au/esg-search",
        "https://esgf.nccs.nasa.gov/esg-search",
        "https://esgdata.gfdl.noaa.gov/esg-search",
        "https://esgf-node.ornl.gov/esg-search",
    ]
    .map(str::to_string)
    .to_vec()
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub query: FacetQuery,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Year span `[start, stop)` used to filter files by temporal coverage.
    #[serde(default)]
    pub span: Option<(i32, i32)>,
    #[serde(default)]
    pub index_nodes: Option<Vec<String>>,
    #[serde(default)]
    pub node_status_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub query: FacetQuery,
    pub destination: Utf8PathBuf,
    pub max_workers: usize,
    pub span: Option<(i32, i32)>,
    pub index_nodes: Vec<String>,
    pub node_status_url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FetchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("esgf-fetch.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(FetchError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FetchError::ConfigRead(config_path.display().to_string()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            query: config.query,
            destination: Utf8PathBuf::from(
                config.destination.unwrap_or_else(|| "data".to_string()),
            ),
            max_workers: config.max_workers.unwrap_or(1),
            span: config.span,
            index_nodes: config.index_nodes.unwrap_or_else(default_index_nodes),
            node_status_url: config
                .node_status_url
                .unwrap_or_else(|| DEFAULT_NODE_STATUS_URL.to_string()),
        }
    }
}
