use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{DownloadReport, FetchError};
use crate::facets::{format_file_date, overlapping_years};
use crate::file::LogicalFile;
use crate::group::group_by_key;
use crate::record::RawRecord;
use crate::replica::{Replica, ReplicaClassKey};
use crate::transfer::Transfer;
use crate::validate::FileValidator;

/// The unit a user downloads: every logical file belonging to one model /
/// experiment / member / variable combination, together with the replica
/// classes available on all of them. Never mutated in place; filters return
/// fresh snapshots.
#[derive(Debug, Clone)]
pub struct LogicalDataset {
    model: String,
    experiment: String,
    member: String,
    variable: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    name: String,
    files: Vec<LogicalFile>,
    common_keys: Vec<ReplicaClassKey>,
}

impl LogicalDataset {
    pub fn from_records(records: Vec<RawRecord>) -> Result<Vec<LogicalDataset>, FetchError> {
        let files = LogicalFile::from_records(records)?;
        Ok(Self::from_files(files))
    }

    /// Group logical files into datasets by their non-temporal identity.
    pub fn from_files(files: Vec<LogicalFile>) -> Vec<LogicalDataset> {
        let mut datasets = Vec::new();
        for (name, group) in group_by_key(files, |file| file.dataset_name().to_string()) {
            debug!("creating dataset {name} from {} files", group.len());
            datasets.push(Self::new(group));
        }
        datasets
    }

    /// `files` must be non-empty and share identity facets; both grouping
    /// and the filters uphold this.
    fn new(files: Vec<LogicalFile>) -> LogicalDataset {
        let start_date = files
            .iter()
            .map(LogicalFile::start_date)
            .min()
            .unwrap_or_default();
        let end_date = files
            .iter()
            .map(LogicalFile::end_date)
            .max()
            .unwrap_or_default();
        let (model, experiment, member, variable) = match files.first() {
            Some(file) => (
                file.model().to_string(),
                file.experiment().to_string(),
                file.member().to_string(),
                file.variable().to_string(),
            ),
            None => Default::default(),
        };
        let name = format!(
            "{}_{}_{}_{}_{}-{}",
            model,
            experiment,
            member,
            variable,
            format_file_date(start_date),
            format_file_date(end_date),
        );
        let common_keys = intersect_class_keys(&files);
        LogicalDataset {
            model,
            experiment,
            member,
            variable,
            start_date,
            end_date,
            name,
            files,
            common_keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn files(&self) -> &[LogicalFile] {
        &self.files
    }

    /// Replica classes present on every file, in selection priority order.
    /// Empty means the dataset cannot be downloaded consistently.
    pub fn common_keys(&self) -> &[ReplicaClassKey] {
        &self.common_keys
    }

    /// Copy of this dataset restricted to replicas on reachable mirrors.
    /// `None` when nothing survives; callers must check before use.
    pub fn filter_reachable(
        &self,
        status: &BTreeMap<String, bool>,
    ) -> Option<LogicalDataset> {
        let kept: Vec<LogicalFile> = self
            .files
            .iter()
            .filter_map(|file| file.filter_reachable(status))
            .collect();
        if kept.is_empty() {
            warn!("filtering reachable mirrors emptied dataset {}", self.name);
            return None;
        }
        Some(Self::new(kept))
    }

    /// Copy of this dataset keeping only files overlapping the year span
    /// `[span_start, span_stop)`. `None` when nothing survives.
    pub fn filter_span(&self, span_start: i32, span_stop: i32) -> Option<LogicalDataset> {
        use chrono::Datelike;
        let kept: Vec<LogicalFile> = self
            .files
            .iter()
            .filter(|file| {
                overlapping_years(
                    file.start_date().year(),
                    file.end_date().year(),
                    span_start,
                    span_stop,
                )
            })
            .cloned()
            .collect();
        if kept.is_empty() {
            warn!(
                "filtering years {span_start} to {span_stop} emptied dataset {}",
                self.name
            );
            return None;
        }
        Some(Self::new(kept))
    }

    /// The replicas selected by one class key, one per file. Only valid for
    /// keys from `common_keys`.
    fn select_class(&self, key: &ReplicaClassKey) -> Result<Vec<&Replica>, FetchError> {
        let mut selected = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let replica = file
                .replica_for(key)
                .ok_or_else(|| FetchError::NoCommonKey(self.name.clone()))?;
            selected.push(replica);
        }
        Ok(selected)
    }

    /// Download one self-consistent copy of this dataset.
    ///
    /// Replica classes are tried in priority order. For each class, every
    /// file's matching replica is downloaded on a bounded worker pool; the
    /// whole batch runs to completion so the class's full error list is
    /// known. A clean batch wins and returns the local paths. A batch with
    /// any failure abandons the whole class, since mixing classes across
    /// files would produce a scientifically inconsistent dataset, and the
    /// next class is tried. Exhausting every class fails with the per-class
    /// diagnostics.
    pub fn download(
        &self,
        transfer: &dyn Transfer,
        validator: &dyn FileValidator,
        dest_root: &Utf8Path,
        max_workers: usize,
    ) -> Result<Vec<Utf8PathBuf>, FetchError> {
        if self.common_keys.is_empty() {
            return Err(FetchError::NoCommonKey(self.name.clone()));
        }
        let mut report = DownloadReport::default();
        for key in &self.common_keys {
            let replicas = self.select_class(key)?;
            info!(
                "attempting to download {} with replica class {key} ({} files, {} workers)",
                self.name,
                replicas.len(),
                max_workers.max(1),
            );
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(max_workers.max(1))
                .build()
                .map_err(|err| FetchError::WorkerPool(err.to_string()))?;
            let results: Vec<Result<Utf8PathBuf, FetchError>> = pool.install(|| {
                replicas
                    .par_iter()
                    .map(|replica| replica.download(transfer, validator, dest_root))
                    .collect()
            });

            let mut local_files = Vec::new();
            let mut errors = Vec::new();
            for result in results {
                match result {
                    Ok(path) => local_files.push(path),
                    Err(err) => {
                        debug!("failed to download part of {} via {key}: {err}", self.name);
                        errors.push(err);
                    }
                }
            }
            if errors.is_empty() {
                info!("downloaded {} with replica class {key}", self.name);
                return Ok(local_files);
            }
            report.record(*key, errors);
        }
        Err(FetchError::DownloadExhausted {
            dataset: self.name.clone(),
            report,
        })
    }
}

/// Intersection of the files' class-key sets. Once empty it stays empty:
/// a dataset with any keyless file has no consistent combination at all.
fn intersect_class_keys(files: &[LogicalFile]) -> Vec<ReplicaClassKey> {
    let mut files_iter = files.iter();
    let mut common: BTreeSet<ReplicaClassKey> = match files_iter.next() {
        Some(first) => first.class_keys().into_iter().collect(),
        None => return Vec::new(),
    };
    for file in files_iter {
        let keys: BTreeSet<ReplicaClassKey> = file.class_keys().into_iter().collect();
        common = common.intersection(&keys).copied().collect();
        if common.is_empty() {
            break;
        }
    }
    // BTreeSet iterates in key order, which is the selection priority.
    common.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        variable: &str,
        table: &str,
        grid: &str,
        version: &str,
        mirror: &str,
        dates: &str,
    ) -> RawRecord {
        let filename = format!(
            "{variable}_{table}_AWI-CM-1-1-MR_historical_r1i1p1f1_{grid}_{dates}.nc"
        );
        RawRecord {
            model: "AWI-CM-1-1-MR".to_string(),
            experiment: "historical".to_string(),
            member: "r1i1p1f1".to_string(),
            variable: variable.to_string(),
            table: table.to_string(),
            grid: grid.to_string(),
            mirror: mirror.to_string(),
            dataset_id: format!(
                "CMIP6.CMIP.AWI.AWI-CM-1-1-MR.historical.r1i1p1f1.{table}.{variable}.{grid}.{version}|{mirror}"
            ),
            version: None,
            filename: filename.clone(),
            url: format!("https://{mirror}/thredds/fileServer/{filename}"),
            size: 1024,
            checksum_type: None,
            checksum: None,
        }
    }

    #[test]
    fn groups_files_into_datasets_and_spans() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18510101-18511231"),
            record("ua", "day", "gn", "v20181218", "a.example.org", "18500101-18501231"),
        ];
        let mut datasets = LogicalDataset::from_records(records).unwrap();
        datasets.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(datasets.len(), 2);

        let tos = datasets
            .iter()
            .find(|d| d.variable() == "tos")
            .unwrap();
        assert_eq!(tos.files().len(), 2);
        assert_eq!(
            tos.name(),
            "AWI-CM-1-1-MR_historical_r1i1p1f1_tos_18500101-18511231"
        );
    }

    #[test]
    fn common_keys_are_the_exact_intersection() {
        let records = vec![
            // first file: gn + gr
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gr", "v20181218", "a.example.org", "18500101-18501231"),
            // second file: gn only
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18510101-18511231"),
        ];
        let datasets = LogicalDataset::from_records(records).unwrap();
        assert_eq!(datasets.len(), 1);
        let dataset = &datasets[0];
        let common = dataset.common_keys();
        assert_eq!(common.len(), 1);
        assert_eq!(common[0].to_string(), "Oday/v20181218/gn");
        for key in common {
            for file in dataset.files() {
                assert!(file.replica_for(key).is_some());
            }
        }
    }

    #[test]
    fn empty_intersection_stays_empty() {
        let records = vec![
            // files 1 and 3 share gn; file 2 has only gr
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gr", "v20181218", "a.example.org", "18510101-18511231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18520101-18521231"),
        ];
        let datasets = LogicalDataset::from_records(records).unwrap();
        assert_eq!(datasets.len(), 1);
        assert!(datasets[0].common_keys().is_empty());
    }

    #[test]
    fn common_keys_follow_priority_order() {
        let mk = |table: &str, grid: &str, version: &str, dates: &str| {
            record("tos", table, grid, version, "a.example.org", dates)
        };
        let records = vec![
            mk("Oday", "gn", "v20181218", "18500101-18501231"),
            mk("Oday", "gr", "v20181218", "18500101-18501231"),
            mk("Oday", "gn", "v20190308", "18500101-18501231"),
            mk("Oday", "gn", "v20181218", "18510101-18511231"),
            mk("Oday", "gr", "v20181218", "18510101-18511231"),
            mk("Oday", "gn", "v20190308", "18510101-18511231"),
        ];
        let datasets = LogicalDataset::from_records(records).unwrap();
        let shown: Vec<String> = datasets[0]
            .common_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(
            shown,
            vec!["Oday/v20190308/gn", "Oday/v20181218/gn", "Oday/v20181218/gr"]
        );
    }

    #[test]
    fn span_filter_boundaries() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-19001231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "19010101-19501231"),
        ];
        let datasets = LogicalDataset::from_records(records).unwrap();
        let dataset = &datasets[0];

        // file ending exactly at the span start is kept
        let filtered = dataset.filter_span(1900, 1950).unwrap();
        assert_eq!(filtered.files().len(), 2);

        // file starting exactly at the span stop is dropped
        let filtered = dataset.filter_span(1850, 1901).unwrap();
        assert_eq!(filtered.files().len(), 1);
        assert_eq!(
            filtered.name(),
            "AWI-CM-1-1-MR_historical_r1i1p1f1_tos_18500101-19001231"
        );

        assert!(dataset.filter_span(2000, 2100).is_none());
    }

    #[test]
    fn filter_reachable_empties_to_none() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "down.example.org", "18500101-18501231"),
        ];
        let datasets = LogicalDataset::from_records(records).unwrap();
        let status = BTreeMap::from([("down.example.org".to_string(), false)]);
        assert!(datasets[0].filter_reachable(&status).is_none());
    }

    #[test]
    fn filter_reachable_recomputes_intersection() {
        let records = vec![
            // file 1: gn on a live mirror, gr on a dead one
            record("tos", "Oday", "gn", "v20181218", "up.example.org", "18500101-18501231"),
            record("tos", "Oday", "gr", "v20181218", "down.example.org", "18500101-18501231"),
            // file 2: both grids on the live mirror
            record("tos", "Oday", "gn", "v20181218", "up.example.org", "18510101-18511231"),
            record("tos", "Oday", "gr", "v20181218", "up.example.org", "18510101-18511231"),
        ];
        let datasets = LogicalDataset::from_records(records).unwrap();
        assert_eq!(datasets[0].common_keys().len(), 2);

        let status = BTreeMap::from([
            ("up.example.org".to_string(), true),
            ("down.example.org".to_string(), false),
        ]);
        let filtered = datasets[0].filter_reachable(&status).unwrap();
        let shown: Vec<String> = filtered
            .common_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(shown, vec!["Oday/v20181218/gn"]);
    }
}
