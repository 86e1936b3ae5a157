use std::collections::HashMap;
use std::io::BufReader;
use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use crate::filelist::FilelistsXmlReader;
use crate::metadata::{METADATA_FILELISTS, METADATA_OTHER, METADATA_PRIMARY};
use crate::other::OtherXmlReader;
use crate::primary::PrimaryXmlReader;
use crate::utils;
use crate::{FilelistsXml, MetadataError, OtherXml, Package, PrimaryXml, RepomdData, RepomdXml};

type DynReader = BufReader<Box<dyn std::io::Read + Send>>;

/// Streams an existing primary/filelists/other triple and yields one fully
/// populated [`Package`] per `<package>` element, reading the three documents
/// in lockstep.
pub struct PackageIterator {
    primary_xml: PrimaryXmlReader<DynReader>,
    filelists_xml: FilelistsXmlReader<DynReader>,
    other_xml: OtherXmlReader<DynReader>,

    num_packages: usize,
    num_remaining: usize,
    in_progress_package: Option<Package>,
}

impl PackageIterator {
    pub fn from_repodata(base: &Path, repomd: &RepomdData) -> Result<Self, MetadataError> {
        let locate = |name: &'static str| -> Result<PathBuf, MetadataError> {
            repomd
                .get_record(name)
                .map(|r| base.join(&r.location_href))
                .ok_or(MetadataError::MissingFieldError("data"))
        };
        Self::from_files(
            &locate(METADATA_PRIMARY)?,
            &locate(METADATA_FILELISTS)?,
            &locate(METADATA_OTHER)?,
        )
    }

    pub fn from_files(
        primary_path: &Path,
        filelists_path: &Path,
        other_path: &Path,
    ) -> Result<Self, MetadataError> {
        let primary_xml = PrimaryXml::new_reader(utils::xml_reader_from_path(primary_path)?);
        let filelists_xml = FilelistsXml::new_reader(utils::xml_reader_from_path(filelists_path)?);
        let other_xml = OtherXml::new_reader(utils::xml_reader_from_path(other_path)?);

        let mut parser = Self {
            primary_xml,
            filelists_xml,
            other_xml,
            num_packages: 0,
            num_remaining: 0,
            in_progress_package: None,
        };
        parser.parse_headers()?;

        Ok(parser)
    }

    fn parse_headers(&mut self) -> Result<(), MetadataError> {
        let primary_pkg_count = self.primary_xml.read_header()?;
        let filelists_pkg_count = self.filelists_xml.read_header()?;
        let other_pkg_count = self.other_xml.read_header()?;

        if primary_pkg_count != filelists_pkg_count || primary_pkg_count != other_pkg_count {
            return Err(MetadataError::InconsistentMetadataError(
                "Metadata package counts don't match".to_owned(),
            ));
        }

        self.num_packages = primary_pkg_count;
        self.num_remaining = self.num_packages;

        Ok(())
    }

    pub fn parse_package(&mut self) -> Result<Option<Package>, MetadataError> {
        self.primary_xml
            .read_package(&mut self.in_progress_package)?;
        self.filelists_xml
            .read_package(&mut self.in_progress_package)?;
        self.other_xml.read_package(&mut self.in_progress_package)?;

        let package = self.in_progress_package.take();
        if package.is_some() {
            self.num_remaining = self.num_remaining.saturating_sub(1);
        }

        Ok(package)
    }

    pub fn remaining_packages(&self) -> usize {
        self.num_remaining
    }

    pub fn total_packages(&self) -> usize {
        self.num_packages
    }
}

impl Iterator for PackageIterator {
    type Item = Result<Package, MetadataError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.parse_package().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining_packages()))
    }
}

/// Packages rehydrated from previously generated metadata, keyed by cleaned
/// location href. Entries are removed ("stolen") on lookup so no two workers
/// can reuse the same cached package.
#[derive(Default)]
pub struct OldMetadataCache {
    packages: Mutex<HashMap<String, Package>>,
}

impl OldMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every package described by `<base>/repodata/` into the cache.
    /// Returns the number of packages loaded. Malformed metadata aborts the
    /// load of this directory with a warning; packages materialized before
    /// the error stay available.
    pub fn load_repodata(&self, base: &Path) -> Result<usize, MetadataError> {
        let repomd_path = base.join("repodata").join("repomd.xml");
        let repomd = RepomdXml::read_data(utils::xml_reader_from_path(&repomd_path)?)?;

        let iter = PackageIterator::from_repodata(base, &repomd)?;
        let mut count = 0;
        for result in iter {
            match result {
                Ok(package) => {
                    self.insert(package);
                    count += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to load old metadata from {}: {}",
                        base.display(),
                        e
                    );
                    break;
                }
            }
        }
        debug!("Loaded {} packages of old metadata from {}", count, base.display());
        Ok(count)
    }

    /// Add a package to the cache, keyed by its cleaned location href.
    pub fn insert(&self, package: Package) {
        let key = utils::cache_key(package.location_href()).to_owned();
        let mut packages = self.packages.lock().unwrap();
        if packages.contains_key(&key) {
            warn!("Old metadata contains \"{}\" more than once", key);
        }
        packages.insert(key, package);
    }

    /// Remove and return the cached package for a cleaned location href.
    pub fn steal(&self, key: &str) -> Option<Package> {
        self.packages.lock().unwrap().remove(key)
    }

    pub fn len(&self) -> usize {
        self.packages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The staleness test: a cached package may be reused only if mtime, size and
/// checksum type all still match.
pub(crate) fn metadata_is_fresh(
    md: &Package,
    stat: &std::fs::Metadata,
    checksum_name: &str,
) -> bool {
    stat.mtime() == md.time_file as i64
        && stat.size() == md.size_package
        && checksum_name == md.checksum_name()
}
