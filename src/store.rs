use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::error::FetchError;

/// Filesystem roots: the destination tree downloads land in, and a per-user
/// cache directory for federation metadata (node status, search results).
#[derive(Debug, Clone)]
pub struct Store {
    dest_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(dest_root: Utf8PathBuf) -> Result<Self, FetchError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("esgf-fetch"))
                    .ok()
            })
            .ok_or_else(|| {
                FetchError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self {
            dest_root,
            cache_root,
        })
    }

    pub fn new_with_paths(dest_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            dest_root,
            cache_root,
        }
    }

    pub fn dest_root(&self) -> &Utf8Path {
        &self.dest_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn node_status_cache_path(&self) -> Utf8PathBuf {
        self.cache_root.join("esgf-nodes-status.json")
    }

    pub fn ensure_dest_root(&self) -> Result<(), FetchError> {
        fs::create_dir_all(self.dest_root.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), FetchError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))
    }

    pub fn clear_cache(&self) -> Result<(), FetchError> {
        if self.cache_root.as_std_path().exists() {
            fs::remove_dir_all(self.cache_root.as_std_path())
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        }
        self.ensure_cache_root()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), FetchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/data/cmip6"),
            Utf8PathBuf::from("/home/user/.cache/esgf-fetch"),
        );
        assert_eq!(store.dest_root().as_str(), "/data/cmip6");
        assert!(
            store
                .node_status_cache_path()
                .as_str()
                .ends_with("esgf-fetch/esgf-nodes-status.json")
        );
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("status.json")).unwrap();
        Store::write_bytes_atomic(&path, b"{\"a\": true}").unwrap();
        Store::write_bytes_atomic(&path, b"{\"a\": false}").unwrap();
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"{\"a\": false}");
        assert!(!path.with_extension("tmp").as_std_path().exists());
    }
}
