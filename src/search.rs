use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;
use crate::facets::FacetQuery;
use crate::record::RawRecord;

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(240);

const PAGE_SIZE: u64 = 500;

/// Yields the raw federation records for a facet query.
pub trait SearchProvider: Send + Sync {
    fn search(&self, query: &FacetQuery) -> Result<Vec<RawRecord>, FetchError>;
}

/// Explicit memo of past searches, passed into the client rather than hidden
/// behind process-global state, so sessions stay testable and cache reuse is
/// a caller decision.
#[derive(Default)]
pub struct SearchCache {
    entries: Mutex<HashMap<FacetQuery, Vec<RawRecord>>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, query: &FacetQuery) -> Option<Vec<RawRecord>> {
        self.entries.lock().ok()?.get(query).cloned()
    }

    fn put(&self, query: FacetQuery, records: Vec<RawRecord>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(query, records);
        }
    }
}

/// File search across every configured index node. Each node is asked for
/// the full result set; per-node failures are tolerated as long as at least
/// one node answers, since the reconciliation layer dedups the overlap.
pub struct EsgfSearchClient {
    client: Client,
    index_nodes: Vec<String>,
    cache: Arc<SearchCache>,
}

impl EsgfSearchClient {
    pub fn new(index_nodes: Vec<String>, cache: Arc<SearchCache>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("esgf-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|err| FetchError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            index_nodes,
            cache,
        })
    }

    fn search_node(&self, node: &str, query: &FacetQuery) -> Result<Vec<RawRecord>, FetchError> {
        let url = format!("{}/search", node.trim_end_matches('/'));
        let mut records = Vec::new();
        let mut offset = 0u64;
        loop {
            let mut pairs = query.to_query_pairs();
            pairs.push(("type".to_string(), "File".to_string()));
            pairs.push(("format".to_string(), "application/solr+json".to_string()));
            pairs.push(("limit".to_string(), PAGE_SIZE.to_string()));
            pairs.push(("offset".to_string(), offset.to_string()));

            let response = self
                .client
                .get(&url)
                .query(&pairs)
                .send()
                .map_err(|err| FetchError::SearchHttp {
                    url: url.clone(),
                    message: err.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(FetchError::SearchStatus {
                    url: url.clone(),
                    status: response.status().as_u16(),
                });
            }
            let body: Value = response.json().map_err(|err| FetchError::SearchResponse {
                url: url.clone(),
                message: err.to_string(),
            })?;
            let docs = body
                .get("response")
                .and_then(|r| r.get("docs"))
                .and_then(Value::as_array)
                .ok_or_else(|| FetchError::SearchResponse {
                    url: url.clone(),
                    message: "missing response.docs".to_string(),
                })?;
            let num_found = body
                .get("response")
                .and_then(|r| r.get("numFound"))
                .and_then(Value::as_u64)
                .unwrap_or(0);

            for doc in docs {
                match record_from_doc(doc) {
                    Some(record) => records.push(record),
                    None => debug!("skipping malformed search hit from {node}"),
                }
            }

            offset += docs.len() as u64;
            if docs.is_empty() || offset >= num_found {
                break;
            }
        }
        Ok(records)
    }
}

impl SearchProvider for EsgfSearchClient {
    fn search(&self, query: &FacetQuery) -> Result<Vec<RawRecord>, FetchError> {
        if let Some(records) = self.cache.get(query) {
            debug!("serving {} records from the search cache", records.len());
            return Ok(records);
        }
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for node in &self.index_nodes {
            match self.search_node(node, query) {
                Ok(mut node_records) => {
                    debug!("got {} records from {node}", node_records.len());
                    records.append(&mut node_records);
                }
                Err(err) => {
                    debug!("unable to search {node}: {err}");
                    errors.push(format!("{node}: {err}"));
                }
            }
        }
        if records.is_empty() && !errors.is_empty() {
            return Err(FetchError::SearchUnavailable { errors });
        }
        self.cache.put(query.clone(), records.clone());
        Ok(records)
    }
}

/// Strip one Solr file document down to a plain record. Index nodes wrap
/// most scalar fields in single-element arrays.
fn record_from_doc(doc: &Value) -> Option<RawRecord> {
    let url = doc
        .get("url")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find_map(http_server_url)?;
    Some(RawRecord {
        model: first_str(doc, "source_id")?,
        experiment: first_str(doc, "experiment_id")?,
        member: first_str(doc, "member_id")?,
        variable: first_str(doc, "variable")?,
        table: first_str(doc, "table_id")?,
        grid: first_str(doc, "grid_label")?,
        mirror: first_str(doc, "data_node")?,
        dataset_id: first_str(doc, "dataset_id")?,
        version: first_str(doc, "version"),
        filename: first_str(doc, "title")?,
        url,
        size: doc.get("size").and_then(Value::as_u64).unwrap_or(0),
        checksum_type: first_str(doc, "checksum_type"),
        checksum: first_str(doc, "checksum"),
    })
}

/// Index nodes report scalar facets either bare or as one-element arrays.
fn first_str(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Array(values) => values
            .first()
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Url entries look like `https://…/file.nc|application/netcdf|HTTPServer`.
fn http_server_url(entry: &str) -> Option<String> {
    let mut parts = entry.split('|');
    let url = parts.next()?;
    let service = parts.next_back()?;
    (service == "HTTPServer").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn doc_with_array_wrapped_fields() {
        let doc = json!({
            "source_id": ["AWI-CM-1-1-MR"],
            "experiment_id": ["historical"],
            "member_id": ["r1i1p1f1"],
            "variable": ["tos"],
            "table_id": ["Oday"],
            "grid_label": ["gn"],
            "data_node": "esgf.ceda.ac.uk",
            "dataset_id": "CMIP6.CMIP.AWI.x.v20181218|esgf.ceda.ac.uk",
            "title": "tos_Oday_AWI-CM-1-1-MR_historical_r1i1p1f1_gn_18500101-18501231.nc",
            "size": 1024,
            "checksum": ["abc123"],
            "checksum_type": ["SHA256"],
            "url": [
                "https://esgf.ceda.ac.uk/thredds/dodsC/x.nc|application/opendap|OPENDAP",
                "https://esgf.ceda.ac.uk/thredds/fileServer/x.nc|application/netcdf|HTTPServer"
            ]
        });
        let record = record_from_doc(&doc).unwrap();
        assert_eq!(record.model, "AWI-CM-1-1-MR");
        assert_eq!(record.mirror, "esgf.ceda.ac.uk");
        assert_eq!(
            record.url,
            "https://esgf.ceda.ac.uk/thredds/fileServer/x.nc"
        );
        assert_eq!(record.checksum_type.as_deref(), Some("SHA256"));
    }

    #[test]
    fn doc_without_http_endpoint_is_skipped() {
        let doc = json!({
            "source_id": ["AWI-CM-1-1-MR"],
            "url": ["https://esgf.ceda.ac.uk/thredds/dodsC/x.nc|application/opendap|OPENDAP"]
        });
        assert!(record_from_doc(&doc).is_none());
    }

    #[test]
    fn cache_round_trip() {
        let cache = SearchCache::new();
        let query = FacetQuery::default();
        assert!(cache.get(&query).is_none());
        cache.put(query.clone(), Vec::new());
        assert_eq!(cache.get(&query), Some(Vec::new()));
    }
}
