use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::LogicalDataset;
use crate::error::FetchError;
use crate::facets::FacetQuery;
use crate::nodes::NodeStatusOracle;
use crate::search::SearchProvider;
use crate::store::Store;
use crate::transfer::Transfer;
use crate::validate::FileValidator;

/// Immutable snapshot of reconciled datasets. Filters produce new catalogs;
/// the flag records whether unreachable mirrors were already dropped.
#[derive(Debug, Clone)]
pub struct Catalog {
    datasets: Vec<LogicalDataset>,
    nodes_filtered: bool,
}

impl Catalog {
    pub fn datasets(&self) -> &[LogicalDataset] {
        &self.datasets
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn nodes_filtered(&self) -> bool {
        self.nodes_filtered
    }

    /// Number of ensemble members per (model, experiment) pair.
    pub fn member_counts(&self) -> BTreeMap<(String, String), usize> {
        let mut counts = BTreeMap::new();
        for dataset in &self.datasets {
            let key = (
                dataset.model().to_string(),
                dataset.experiment().to_string(),
            );
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            datasets: self
                .datasets
                .iter()
                .map(|dataset| DatasetSummary {
                    name: dataset.name().to_string(),
                    files: dataset.files().len(),
                    replica_classes: dataset
                        .common_keys()
                        .iter()
                        .map(|key| key.to_string())
                        .collect(),
                })
                .collect(),
            members: self
                .member_counts()
                .into_iter()
                .map(|((model, experiment), members)| MemberCount {
                    model,
                    experiment,
                    members,
                })
                .collect(),
            nodes_filtered: self.nodes_filtered,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub datasets: Vec<DatasetSummary>,
    pub members: Vec<MemberCount>,
    pub nodes_filtered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub files: usize,
    pub replica_classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberCount {
    pub model: String,
    pub experiment: String,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    /// Dataset name to the local files one consistent replica class yielded.
    pub datasets: BTreeMap<String, Vec<String>>,
}

/// Ties the collaborator seams together: search, reconcile, filter,
/// download.
pub struct App<S, N, T, V>
where
    S: SearchProvider,
    N: NodeStatusOracle,
    T: Transfer,
    V: FileValidator,
{
    store: Store,
    search: S,
    nodes: N,
    transfer: T,
    validator: V,
}

impl<S, N, T, V> App<S, N, T, V>
where
    S: SearchProvider,
    N: NodeStatusOracle,
    T: Transfer,
    V: FileValidator,
{
    pub fn new(store: Store, search: S, nodes: N, transfer: T, validator: V) -> Self {
        Self {
            store,
            search,
            nodes,
            transfer,
            validator,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run the facet query and reconcile the raw hits into datasets.
    pub fn search(&self, query: &FacetQuery) -> Result<Catalog, FetchError> {
        let records = self.search.search(query)?;
        info!("reconciling {} raw records", records.len());
        let datasets = LogicalDataset::from_records(records)?;
        info!("found {} datasets", datasets.len());
        Ok(Catalog {
            datasets,
            nodes_filtered: false,
        })
    }

    /// Catalog restricted to currently reachable mirrors. Datasets emptied
    /// by the filter are dropped.
    pub fn filter_reachable(&self, catalog: &Catalog) -> Result<Catalog, FetchError> {
        let status = self.nodes.node_status()?;
        let datasets: Vec<LogicalDataset> = catalog
            .datasets
            .iter()
            .filter_map(|dataset| dataset.filter_reachable(&status))
            .collect();
        info!(
            "{} of {} datasets remain on reachable mirrors",
            datasets.len(),
            catalog.datasets.len()
        );
        Ok(Catalog {
            datasets,
            nodes_filtered: true,
        })
    }

    /// Catalog restricted to files overlapping `[span_start, span_stop)`.
    pub fn filter_span(&self, catalog: &Catalog, span_start: i32, span_stop: i32) -> Catalog {
        let datasets: Vec<LogicalDataset> = catalog
            .datasets
            .iter()
            .filter_map(|dataset| dataset.filter_span(span_start, span_stop))
            .collect();
        Catalog {
            datasets,
            nodes_filtered: catalog.nodes_filtered,
        }
    }

    /// Download every dataset in the catalog, one consistent replica class
    /// each. Fails on the first dataset that exhausts all of its classes,
    /// carrying that dataset's per-class diagnostics.
    pub fn download_all(
        &self,
        catalog: &Catalog,
        max_workers: usize,
    ) -> Result<DownloadOutcome, FetchError> {
        if !catalog.nodes_filtered {
            warn!(
                "downloading without having filtered reachable mirrors, expect failed transfers"
            );
        }
        self.store.ensure_dest_root()?;
        let mut stored = BTreeMap::new();
        for dataset in &catalog.datasets {
            let local_files = dataset.download(
                &self.transfer,
                &self.validator,
                self.store.dest_root(),
                max_workers,
            )?;
            stored.insert(
                dataset.name().to_string(),
                local_files.iter().map(|path| path.to_string()).collect(),
            );
        }
        Ok(DownloadOutcome { datasets: stored })
    }
}
