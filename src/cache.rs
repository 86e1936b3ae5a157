use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::metadata::{ChecksumType, MetadataError, Package};
use crate::utils;

const CACHED_CHECKSUM_BUFFER_LEN: usize = 2048;

/// Compute the content checksum of a package file, consulting the on-disk
/// cache when a cache directory is configured.
///
/// The cache is keyed by the digest of the package's signature blobs and
/// header id, prefixed with the package filename and suffixed with installed
/// size and mtime, so a re-signed, rebuilt or moved package never hits a
/// stale entry. Cache failures of any kind fall back to recomputation.
pub(crate) fn package_checksum(
    path: &Path,
    checksum_type: ChecksumType,
    pkg: &Package,
    cachedir: Option<&Path>,
) -> Result<String, MetadataError> {
    let cachefile = match cachedir {
        Some(dir) => Some(cache_file_path(dir, pkg, checksum_type)?),
        None => None,
    };

    if let Some(cachefile) = &cachefile {
        if let Some(checksum) = read_cached_checksum(cachefile) {
            debug!(
                "Cached checksum used: {}: \"{}\"",
                cachefile.display(),
                checksum
            );
            return Ok(checksum);
        }
    }

    let computed = utils::checksum_file(path, checksum_type)?;
    let (_, checksum) = computed.to_values()?;
    let checksum = checksum.to_owned();

    if let Some(cachefile) = &cachefile {
        if !cachefile.exists() {
            if let Err(e) = store_cached_checksum(cachefile, &checksum) {
                debug!(
                    "Cannot store checksum cache entry {}: {}",
                    cachefile.display(),
                    e
                );
            }
        }
    }

    Ok(checksum)
}

fn cache_file_path(
    cachedir: &Path,
    pkg: &Package,
    checksum_type: ChecksumType,
) -> Result<PathBuf, MetadataError> {
    let mut chunks: Vec<&[u8]> = Vec::new();
    if let Some(sig) = &pkg.sig_gpg {
        chunks.push(sig);
    }
    if let Some(sig) = &pkg.sig_pgp {
        chunks.push(sig);
    }
    if let Some(hdr_id) = &pkg.hdr_id {
        chunks.push(hdr_id.as_bytes());
    }
    let key = utils::checksum_data(checksum_type, &chunks)?;

    let name = format!(
        "{}-{}-{}-{}",
        utils::href_filename(&pkg.location_href),
        key,
        pkg.size_installed,
        pkg.time_file
    );
    Ok(cachedir.join(name))
}

fn read_cached_checksum(cachefile: &Path) -> Option<String> {
    let mut file = File::open(cachefile).ok()?;
    let mut buffer = vec![0u8; CACHED_CHECKSUM_BUFFER_LEN];
    let count = file.read(&mut buffer).ok()?;
    if count == 0 {
        return None;
    }
    buffer.truncate(count);
    String::from_utf8(buffer).ok()
}

fn store_cached_checksum(cachefile: &Path, checksum: &str) -> Result<(), MetadataError> {
    let dir = cachefile
        .parent()
        .ok_or(MetadataError::MissingFieldError("cachedir"))?;
    let prefix = cachefile
        .file_name()
        .ok_or(MetadataError::MissingFieldError("cachefile"))?
        .to_string_lossy()
        .into_owned();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{}-", prefix))
        .tempfile_in(dir)?;
    tmp.write_all(checksum.as_bytes())?;
    // dropping the temp file on a failed rename unlinks it
    tmp.persist(cachefile).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Package;

    fn test_package() -> Package {
        let mut pkg = Package::default();
        pkg.set_location_href("subdir/foo-1.0-1.noarch.rpm");
        pkg.size_installed = 117;
        pkg.time_file = 1627052744;
        pkg.hdr_id = Some("da39a3ee5e6b4b0d3255bfef95601890afd80709".to_owned());
        pkg
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let rpm_path = dir.path().join("foo-1.0-1.noarch.rpm");
        std::fs::write(&rpm_path, b"not really an rpm").unwrap();

        let pkg = test_package();
        let first =
            package_checksum(&rpm_path, ChecksumType::Sha256, &pkg, Some(dir.path())).unwrap();
        assert_eq!(
            first,
            utils::checksum_data(ChecksumType::Sha256, &[b"not really an rpm"]).unwrap()
        );

        // modifying the file does not change the cached answer - the key is
        // derived from the package identity, not the file contents
        std::fs::write(&rpm_path, b"different bytes").unwrap();
        let second =
            package_checksum(&rpm_path, ChecksumType::Sha256, &pkg, Some(dir.path())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_key_includes_location_and_times() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = test_package();
        let path_a = cache_file_path(dir.path(), &pkg, ChecksumType::Sha256).unwrap();

        let mut moved = test_package();
        moved.set_location_href("other/foo-1.0-2.noarch.rpm");
        let path_b = cache_file_path(dir.path(), &moved, ChecksumType::Sha256).unwrap();
        assert_ne!(path_a, path_b);

        let mut touched = test_package();
        touched.time_file += 1;
        let path_c = cache_file_path(dir.path(), &touched, ChecksumType::Sha256).unwrap();
        assert_ne!(path_a, path_c);
    }

    #[test]
    fn test_no_cachedir_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let rpm_path = dir.path().join("foo.rpm");
        std::fs::write(&rpm_path, b"contents").unwrap();
        let pkg = test_package();

        let checksum = package_checksum(&rpm_path, ChecksumType::Sha1, &pkg, None).unwrap();
        assert_eq!(
            checksum,
            utils::checksum_data(ChecksumType::Sha1, &[b"contents"]).unwrap()
        );
    }
}
