use std::fs;
use std::io::Read;

use camino::Utf8Path;

use crate::error::FetchError;

/// Decides whether a local file is a structurally valid instance of the
/// target scientific format. Only consulted for files that already exist at
/// a final destination path, to decide whether they can be trusted.
pub trait FileValidator: Send + Sync {
    fn validate(&self, path: &Utf8Path) -> Result<bool, FetchError>;
}

/// Signature check for netCDF payloads: the classic `CDF` container
/// (versions 1, 2 and 5) or an HDF5-backed netCDF-4 file.
pub struct NetcdfValidator;

impl FileValidator for NetcdfValidator {
    fn validate(&self, path: &Utf8Path) -> Result<bool, FetchError> {
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| FetchError::Filesystem(format!("open {path}: {err}")))?;
        let mut magic = Vec::with_capacity(8);
        file.take(8)
            .read_to_end(&mut magic)
            .map_err(|err| FetchError::Filesystem(format!("read {path}: {err}")))?;
        Ok(is_netcdf_magic(&magic))
    }
}

fn is_netcdf_magic(bytes: &[u8]) -> bool {
    const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
    if bytes.len() >= 8 && bytes[..8] == HDF5_SIGNATURE {
        return true;
    }
    bytes.len() >= 4 && &bytes[..3] == b"CDF" && matches!(bytes[3], 1 | 2 | 5)
}
