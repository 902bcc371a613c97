use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::facets::VersionStamp;

/// One raw file hit from an index node, stripped to plain data the moment it
/// is ingested. Search responses carry live session state that must not leak
/// into the reconciliation layer; everything a replica needs survives here as
/// owned values, so records can be cached, cloned and moved across threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub model: String,
    pub experiment: String,
    pub member: String,
    pub variable: String,
    pub table: String,
    pub grid: String,
    /// Data-node hostname serving this copy.
    pub mirror: String,
    /// Version-bearing dataset identifier, e.g.
    /// `CMIP6.CMIP.AWI.AWI-CM-1-1-MR.historical.r1i1p1f1.Oday.tos.gn.v20181218|esgf.node`.
    pub dataset_id: String,
    /// Explicit version facet when the node reports one.
    #[serde(default)]
    pub version: Option<String>,
    pub filename: String,
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub checksum_type: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl RawRecord {
    /// Resolve the record's version stamp. The explicit facet wins; nodes
    /// that omit it still carry the stamp as the trailing `.vYYYYMMDD`
    /// component of the dataset identifier.
    pub fn version_stamp(&self) -> Result<VersionStamp, FetchError> {
        if let Some(version) = &self.version {
            let stamped = if version.starts_with('v') {
                version.clone()
            } else {
                format!("v{version}")
            };
            return VersionStamp::parse(&stamped);
        }
        let id = self
            .dataset_id
            .split('|')
            .next()
            .unwrap_or(&self.dataset_id);
        let stamp = id
            .split('.')
            .rev()
            .find(|part| part.starts_with('v') && part.len() > 1)
            .ok_or_else(|| FetchError::MissingVersionStamp(self.dataset_id.clone()))?;
        VersionStamp::parse(stamp)
    }
}
