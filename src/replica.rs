use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::facets::{GridLabel, TableKind, VersionStamp, file_stem};
use crate::record::RawRecord;
use crate::transfer::Transfer;
use crate::validate::FileValidator;

/// The (table, version, grid) triple along which replicas of the same file
/// compete. Its ordering is the selection priority: table rank first, then
/// newest version, then grid rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicaClassKey {
    pub table: TableKind,
    pub version: VersionStamp,
    pub grid: GridLabel,
}

impl Ord for ReplicaClassKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.table, Reverse(self.version), self.grid).cmp(&(
            other.table,
            Reverse(other.version),
            other.grid,
        ))
    }
}

impl PartialOrd for ReplicaClassKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReplicaClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.table, self.version, self.grid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Md5,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
        }
    }
}

impl ChecksumAlgorithm {
    fn parse(value: &str) -> Result<Self, FetchError> {
        match value.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            other => Err(FetchError::UnsupportedChecksum(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

/// One downloadable copy of one file version on one mirror. A plain
/// immutable value: derived collections clone it instead of sharing state,
/// and nothing here holds a connection or session.
#[derive(Debug, Clone)]
pub struct Replica {
    model: String,
    experiment: String,
    member: String,
    variable: String,
    key: ReplicaClassKey,
    mirror: String,
    url: String,
    size: u64,
    checksum: Option<Checksum>,
    stem: String,
}

impl Replica {
    /// Build a replica from a raw record. Unknown table kinds and grid
    /// labels mean the priority vocabulary is incomplete and fail hard;
    /// version-stamp errors are left to the caller, which skips the record.
    pub fn from_record(record: &RawRecord) -> Result<Self, FetchError> {
        let table: TableKind = record.table.parse()?;
        let grid: GridLabel = record.grid.parse()?;
        let version = record.version_stamp()?;
        let checksum = match (&record.checksum_type, &record.checksum) {
            (Some(algorithm), Some(digest)) => match ChecksumAlgorithm::parse(algorithm) {
                Ok(algorithm) => Some(Checksum {
                    algorithm,
                    digest: digest.to_ascii_lowercase(),
                }),
                Err(err) => {
                    warn!("{} from {}: {err}, integrity will not be verified", record.filename, record.mirror);
                    None
                }
            },
            _ => None,
        };
        Ok(Self {
            model: record.model.clone(),
            experiment: record.experiment.clone(),
            member: record.member.clone(),
            variable: record.variable.clone(),
            key: ReplicaClassKey {
                table,
                version,
                grid,
            },
            mirror: record.mirror.clone(),
            url: record.url.clone(),
            size: record.size,
            checksum,
            stem: file_stem(&record.filename).to_string(),
        })
    }

    pub fn class_key(&self) -> ReplicaClassKey {
        self.key
    }

    pub fn mirror(&self) -> &str {
        &self.mirror
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    /// Identity of one physical copy: the same file advertised by the same
    /// mirror. Querying every index node yields this combination many times.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.stem, self.mirror)
    }

    /// Canonical ordering among replicas of one file: class-key priority
    /// with the mirror as a deterministic tiebreak.
    pub fn priority(&self) -> (ReplicaClassKey, String) {
        (self.key, self.mirror.clone())
    }

    /// Storage path relative to the destination root. Stable layout other
    /// tooling relies on.
    pub fn relative_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.model)
            .join(&self.experiment)
            .join(&self.member)
            .join(self.key.table.to_string())
            .join(&self.variable)
            .join(self.key.version.to_string())
            .join(format!("{}.nc", self.stem))
    }

    pub fn local_path(&self, dest_root: &Utf8Path) -> Utf8PathBuf {
        dest_root.join(self.relative_path())
    }

    /// Download this replica under `dest_root`.
    ///
    /// A file already present at the final path is returned as-is when the
    /// validator accepts it; when it does not, the call fails rather than
    /// re-fetching over an artifact a previous run left behind. Fresh
    /// payloads are streamed into a uniquely named temporary file next to
    /// the final path, digested on the fly, and only moved into place once
    /// the digest matches. A mismatch leaves nothing at the final path.
    pub fn download(
        &self,
        transfer: &dyn Transfer,
        validator: &dyn FileValidator,
        dest_root: &Utf8Path,
    ) -> Result<Utf8PathBuf, FetchError> {
        let local_file = self.local_path(dest_root);
        if local_file.as_std_path().exists() {
            if validator.validate(&local_file)? {
                warn!("{local_file} already exists and is a valid data file, not downloading");
                return Ok(local_file);
            }
            return Err(FetchError::LocalFileInvalid(local_file.to_string()));
        }

        let parent = local_file
            .parent()
            .ok_or_else(|| FetchError::Filesystem(format!("no parent for {local_file}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let mut tmp_file = tempfile::Builder::new()
            .prefix(".esgf-fetch-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;

        debug!(
            "downloading {} ({} bytes) from {}",
            self.identity(),
            self.size,
            self.mirror
        );
        let digest = {
            let mut sink = DigestingWriter::new(
                tmp_file.as_file_mut(),
                self.checksum.as_ref().map(|c| c.algorithm),
            );
            transfer.fetch(&self.url, &mut sink)?;
            sink.finish()?
        };

        match (&self.checksum, digest) {
            (Some(checksum), Some(actual)) => {
                if actual != checksum.digest {
                    return Err(FetchError::ChecksumMismatch {
                        url: self.url.clone(),
                        algorithm: checksum.algorithm.to_string(),
                        expected: checksum.digest.clone(),
                        actual,
                    });
                }
            }
            _ => warn!(
                "no checksum available, unable to verify integrity of {}",
                self.url
            ),
        }

        tmp_file
            .persist(local_file.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        debug!("downloaded {local_file} from {}", self.mirror);
        Ok(local_file)
    }
}

enum DigestState {
    Sha256(Sha256),
    Md5(md5::Context),
}

impl DigestState {
    fn update(&mut self, chunk: &[u8]) {
        match self {
            DigestState::Sha256(hasher) => hasher.update(chunk),
            DigestState::Md5(context) => context.consume(chunk),
        }
    }

    fn finish(self) -> String {
        match self {
            DigestState::Sha256(hasher) => hex::encode(hasher.finalize()),
            DigestState::Md5(context) => format!("{:x}", context.compute()),
        }
    }
}

/// Write adapter that feeds every stored byte into the running digest.
struct DigestingWriter<W: Write> {
    inner: W,
    digest: Option<DigestState>,
}

impl<W: Write> DigestingWriter<W> {
    fn new(inner: W, algorithm: Option<ChecksumAlgorithm>) -> Self {
        let digest = algorithm.map(|algorithm| match algorithm {
            ChecksumAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            ChecksumAlgorithm::Md5 => DigestState::Md5(md5::Context::new()),
        });
        Self { inner, digest }
    }

    fn finish(mut self) -> Result<Option<String>, FetchError> {
        self.inner
            .flush()
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        Ok(self.digest.map(DigestState::finish))
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if let Some(digest) = &mut self.digest {
            digest.update(&buf[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(table: &str, version: &str, grid: &str) -> ReplicaClassKey {
        ReplicaClassKey {
            table: table.parse().unwrap(),
            version: VersionStamp::parse(version).unwrap(),
            grid: grid.parse().unwrap(),
        }
    }

    #[test]
    fn key_ordering_table_first() {
        assert!(key("Eday", "v20180101", "gr9") < key("day", "v20200101", "gn"));
    }

    #[test]
    fn key_ordering_newest_version_first() {
        assert!(key("day", "v20200101", "gn") < key("day", "v20180101", "gn"));
    }

    #[test]
    fn key_ordering_grid_last() {
        assert!(key("day", "v20200101", "gn") < key("day", "v20200101", "gr"));
        assert!(key("day", "v20200101", "gr") < key("day", "v20200101", "gr3"));
    }

    #[test]
    fn relative_path_layout() {
        let record = crate::record::RawRecord {
            model: "AWI-CM-1-1-MR".to_string(),
            experiment: "historical".to_string(),
            member: "r1i1p1f1".to_string(),
            variable: "tos".to_string(),
            table: "Oday".to_string(),
            grid: "gn".to_string(),
            mirror: "esgf.ceda.ac.uk".to_string(),
            dataset_id: "CMIP6.x.v20181218|esgf.ceda.ac.uk".to_string(),
            version: None,
            filename: "tos_Oday_AWI-CM-1-1-MR_historical_r1i1p1f1_gn_18500101-18501231.nc"
                .to_string(),
            url: "https://example.org/tos.nc".to_string(),
            size: 10,
            checksum_type: None,
            checksum: None,
        };
        let replica = Replica::from_record(&record).unwrap();
        assert_eq!(
            replica.relative_path().as_str(),
            "AWI-CM-1-1-MR/historical/r1i1p1f1/Oday/tos/v20181218/\
             tos_Oday_AWI-CM-1-1-MR_historical_r1i1p1f1_gn_18500101-18501231.nc"
        );
    }

    #[test]
    fn digesting_writer_sha256() {
        let mut buffer = Vec::new();
        let mut writer = DigestingWriter::new(&mut buffer, Some(ChecksumAlgorithm::Sha256));
        writer.write_all(b"climate data").unwrap();
        let digest = writer.finish().unwrap().unwrap();
        assert_eq!(
            digest,
            "1af3654f6ff6af33193a13ce62101a370b020637a7222a5c1d848543e8a3572d"
        );
        assert_eq!(buffer, b"climate data");
    }

    #[test]
    fn digesting_writer_md5() {
        let mut buffer = Vec::new();
        let mut writer = DigestingWriter::new(&mut buffer, Some(ChecksumAlgorithm::Md5));
        writer.write_all(b"climate data").unwrap();
        let digest = writer.finish().unwrap().unwrap();
        assert_eq!(digest, "60d62ce77552c225646d922ae4df2b10");
    }

    #[test]
    fn digesting_writer_without_algorithm() {
        let mut buffer = Vec::new();
        let mut writer = DigestingWriter::new(&mut buffer, None);
        writer.write_all(b"climate data").unwrap();
        assert!(writer.finish().unwrap().is_none());
    }
}
