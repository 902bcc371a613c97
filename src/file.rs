use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::facets::{file_date_range, format_file_date};
use crate::group::{dedup_by_key, group_by_key};
use crate::record::RawRecord;
use crate::replica::{Replica, ReplicaClassKey};

/// All replicas of one real-world file: same model, experiment, member,
/// variable and temporal coverage, spread over versions, grids and mirrors.
/// Replicas are deduplicated and held in fixed priority order, one per
/// replica class.
#[derive(Debug, Clone)]
pub struct LogicalFile {
    model: String,
    experiment: String,
    member: String,
    variable: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    name: String,
    replicas: Vec<Replica>,
}

impl LogicalFile {
    /// Group raw records into logical files. Records are equivalent when
    /// their derived name (identity facets plus the filename's date range)
    /// matches. Groups whose records all carry unusable version stamps are
    /// dropped with a warning.
    pub fn from_records(records: Vec<RawRecord>) -> Result<Vec<LogicalFile>, FetchError> {
        let mut keyed = Vec::with_capacity(records.len());
        for record in records {
            let name = derived_name(&record)?;
            keyed.push((name, record));
        }
        let mut files = Vec::new();
        for (name, group) in group_by_key(keyed, |(name, _)| name.clone()) {
            let group_records: Vec<RawRecord> =
                group.into_iter().map(|(_, record)| record).collect();
            if let Some(file) = Self::from_equivalent_records(&name, group_records)? {
                files.push(file);
            }
        }
        Ok(files)
    }

    fn from_equivalent_records(
        name: &str,
        records: Vec<RawRecord>,
    ) -> Result<Option<LogicalFile>, FetchError> {
        let mut replicas = Vec::new();
        for record in &records {
            match Replica::from_record(record) {
                Ok(replica) => replicas.push(replica),
                Err(
                    err @ (FetchError::InvalidVersionStamp(_)
                    | FetchError::MissingVersionStamp(_)),
                ) => {
                    warn!("ignoring record in {name}: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        if replicas.is_empty() {
            warn!("no usable records left for {name}, dropping it");
            return Ok(None);
        }

        // Canonical order: table rank, newest version, grid rank, mirror.
        replicas.sort_by_key(Replica::priority);
        // Every index node reports every copy, so the same file on the same
        // mirror shows up once per node queried.
        let mut replicas = dedup_by_key(replicas, Replica::identity);
        replicas.sort_by_key(Replica::priority);
        // One replica per class key, keeping the first under canonical order.
        let replicas = dedup_by_key(replicas, Replica::class_key);

        let (start_date, end_date) = file_date_range(replicas[0].stem())?;
        let first = &records[0];
        Ok(Some(LogicalFile {
            model: first.model.clone(),
            experiment: first.experiment.clone(),
            member: first.member.clone(),
            variable: first.variable.clone(),
            start_date,
            end_date,
            name: name.to_string(),
            replicas,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the dataset this file belongs to: identity facets without the
    /// trailing date-range segment.
    pub fn dataset_name(&self) -> &str {
        match self.name.rsplit_once('_') {
            Some((head, _)) => head,
            None => &self.name,
        }
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

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn class_keys(&self) -> Vec<ReplicaClassKey> {
        self.replicas.iter().map(Replica::class_key).collect()
    }

    pub fn replica_for(&self, key: &ReplicaClassKey) -> Option<&Replica> {
        self.replicas
            .iter()
            .find(|replica| replica.class_key() == *key)
    }

    /// Copy of this file restricted to replicas on reachable mirrors.
    /// Mirrors missing from the status map count as down. `None` when no
    /// replica survives.
    pub fn filter_reachable(&self, status: &BTreeMap<String, bool>) -> Option<LogicalFile> {
        let kept: Vec<Replica> = self
            .replicas
            .iter()
            .filter(|replica| match status.get(replica.mirror()) {
                Some(up) => *up,
                None => {
                    debug!(
                        "mirror {} not part of the node status map, treating it as down",
                        replica.mirror()
                    );
                    false
                }
            })
            .cloned()
            .collect();
        if kept.is_empty() {
            warn!("filtering reachable mirrors emptied {}", self.name);
            return None;
        }
        let mut filtered = self.clone();
        filtered.replicas = kept;
        Some(filtered)
    }
}

fn derived_name(record: &RawRecord) -> Result<String, FetchError> {
    let (start, end) = file_date_range(&record.filename)?;
    Ok(format!(
        "{}_{}_{}_{}_{}-{}",
        record.model,
        record.experiment,
        record.member,
        record.variable,
        format_file_date(start),
        format_file_date(end),
    ))
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
    fn groups_by_identity_and_date_range() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18510101-18511231"),
            record("ua", "day", "gn", "v20181218", "a.example.org", "18500101-18501231"),
        ];
        let files = LogicalFile::from_records(records).unwrap();
        assert_eq!(files.len(), 3);
        let names: Vec<&str> = files.iter().map(LogicalFile::name).collect();
        assert!(names.contains(&"AWI-CM-1-1-MR_historical_r1i1p1f1_tos_18500101-18501231"));
        assert!(names.contains(&"AWI-CM-1-1-MR_historical_r1i1p1f1_tos_18510101-18511231"));
        assert!(names.contains(&"AWI-CM-1-1-MR_historical_r1i1p1f1_ua_18500101-18501231"));
    }

    #[test]
    fn dedups_same_copy_reported_by_every_node() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
        ];
        let files = LogicalFile::from_records(records).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].replicas().len(), 1);
    }

    #[test]
    fn one_replica_per_class_key() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "b.example.org", "18500101-18501231"),
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
        ];
        let files = LogicalFile::from_records(records).unwrap();
        assert_eq!(files[0].replicas().len(), 1);
        // deterministic tiebreak: lowest mirror wins
        assert_eq!(files[0].replicas()[0].mirror(), "a.example.org");
    }

    #[test]
    fn replica_order_is_deterministic_under_permutation() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gr", "v20181218", "a.example.org", "18500101-18501231"),
            record("tos", "Eday", "gn", "v20170101", "a.example.org", "18500101-18501231"),
            record("tos", "Oday", "gn", "v20190308", "a.example.org", "18500101-18501231"),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let keys = |records: Vec<RawRecord>| {
            let files = LogicalFile::from_records(records).unwrap();
            files[0].class_keys()
        };
        let forward = keys(records);
        let backward = keys(reversed);
        assert_eq!(forward, backward);

        let shown: Vec<String> = forward.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            shown,
            vec![
                "Eday/v20170101/gn",
                "Oday/v20190308/gn",
                "Oday/v20181218/gn",
                "Oday/v20181218/gr",
            ]
        );
    }

    #[test]
    fn skips_unparseable_versions() {
        let mut bad = record("tos", "Oday", "gn", "v2018", "a.example.org", "18500101-18501231");
        bad.version = Some("not-a-version".to_string());
        let good = record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231");
        let files = LogicalFile::from_records(vec![bad, good]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].replicas().len(), 1);
    }

    #[test]
    fn all_versions_unparseable_drops_file() {
        let mut bad = record("tos", "Oday", "gn", "v2018", "a.example.org", "18500101-18501231");
        bad.version = Some("latest".to_string());
        let files = LogicalFile::from_records(vec![bad]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn unknown_table_kind_is_fatal() {
        use assert_matches::assert_matches;
        let records = vec![record("tos", "Amon", "gn", "v20181218", "a.example.org", "18500101-18501231")];
        assert_matches!(
            LogicalFile::from_records(records),
            Err(FetchError::UnknownTableKind(_))
        );
    }

    #[test]
    fn filter_reachable_drops_dead_and_unknown_mirrors() {
        let records = vec![
            record("tos", "Oday", "gn", "v20181218", "up.example.org", "18500101-18501231"),
            record("tos", "Oday", "gr", "v20181218", "down.example.org", "18500101-18501231"),
            record("tos", "Oday", "gr1", "v20181218", "unknown.example.org", "18500101-18501231"),
        ];
        let files = LogicalFile::from_records(records).unwrap();
        let status = BTreeMap::from([
            ("up.example.org".to_string(), true),
            ("down.example.org".to_string(), false),
        ]);
        let filtered = files[0].filter_reachable(&status).unwrap();
        assert_eq!(filtered.replicas().len(), 1);
        assert_eq!(filtered.replicas()[0].mirror(), "up.example.org");

        let none = files[0].filter_reachable(&BTreeMap::new());
        assert!(none.is_none());
    }

    #[test]
    fn dataset_name_strips_date_range() {
        let records = vec![record("tos", "Oday", "gn", "v20181218", "a.example.org", "18500101-18501231")];
        let files = LogicalFile::from_records(records).unwrap();
        assert_eq!(
            files[0].dataset_name(),
            "AWI-CM-1-1-MR_historical_r1i1p1f1_tos"
        );
    }
}
