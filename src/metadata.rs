// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::utils;
use crate::EVR;

pub struct RepomdXml;
pub struct PrimaryXml;
pub struct FilelistsXml;
pub struct OtherXml;

pub const METADATA_PRIMARY: &str = "primary";
pub const METADATA_FILELISTS: &str = "filelists";
pub const METADATA_OTHER: &str = "other";

/// Default namespace for primary.xml
pub const XML_NS_COMMON: &str = "http://linux.duke.edu/metadata/common";
/// Default namespace for filelists.xml
pub const XML_NS_FILELISTS: &str = "http://linux.duke.edu/metadata/filelists";
/// Default namespace for other.xml
pub const XML_NS_OTHER: &str = "http://linux.duke.edu/metadata/other";
/// Default namespace for repomd.xml
pub const XML_NS_REPO: &str = "http://linux.duke.edu/metadata/repo";
/// Namespace for rpm (used in primary.xml and repomd.xml)
pub const XML_NS_RPM: &str = "http://linux.duke.edu/metadata/rpm";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    RpmReadError(#[from] rpm::Error),
    #[error(transparent)]
    XmlParseError(#[from] quick_xml::Error),
    #[error(transparent)]
    XmlAttrError(#[from] quick_xml::events::attributes::AttrError),
    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    IntFieldParseError(#[from] std::num::ParseIntError),
    #[error(transparent)]
    CompressionError(#[from] niffler::Error),
    #[error(transparent)]
    GlobPatternError(#[from] glob::PatternError),
    #[error("Checksum type {0} is not supported")]
    UnsupportedChecksumTypeError(String),
    #[error("\"{0}\" is not a valid checksum of type \"{1:?}\"")]
    InvalidChecksumError(String, ChecksumType),
    #[error("\"{0}\" is not a valid compression type")]
    UnsupportedCompressionTypeError(String),
    #[error("Metadata files are inconsistent: {0}")]
    InconsistentMetadataError(String),
    #[error("Missing metadata field: {0}")]
    MissingFieldError(&'static str),
    #[error("Missing metadata attribute: {0}")]
    MissingAttributeError(&'static str),
    #[error("Missing metadata header")]
    MissingHeaderError,
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Lock directory {0} exists - another process appears to be building this repository")]
    LockError(PathBuf),
}

impl MetadataError {
    /// Exit code the CLI should use for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            MetadataError::ConfigError(_) | MetadataError::LockError(_) => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Gzip,
    Bz2,
    Xz,
}

impl CompressionType {
    pub fn to_file_extension(&self) -> &str {
        match self {
            CompressionType::None => "",
            CompressionType::Gzip => ".gz",
            CompressionType::Bz2 => ".bz2",
            CompressionType::Xz => ".xz",
        }
    }
}

impl TryFrom<&str> for CompressionType {
    type Error = MetadataError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "gz" | "gzip" => Ok(CompressionType::Gzip),
            "bz2" | "bzip2" => Ok(CompressionType::Bz2),
            "xz" => Ok(CompressionType::Xz),
            "none" => Ok(CompressionType::None),
            _ => Err(MetadataError::UnsupportedCompressionTypeError(
                value.to_owned(),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Unknown,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
            ChecksumType::Unknown => "unknown",
        }
    }
}

impl TryFrom<&str> for ChecksumType {
    type Error = MetadataError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // value is case-folded before matching
        match value.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumType::Md5),
            "sha" | "sha1" => Ok(ChecksumType::Sha1),
            "sha224" => Ok(ChecksumType::Sha224),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha384" => Ok(ChecksumType::Sha384),
            "sha512" => Ok(ChecksumType::Sha512),
            _ => Err(MetadataError::UnsupportedChecksumTypeError(
                value.to_owned(),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Checksum {
    Md5(String),
    Sha1(String),
    Sha224(String),
    Sha256(String),
    Sha384(String),
    Sha512(String),
    Unknown(String),
    #[default]
    Empty,
}

impl Checksum {
    pub fn try_create<N: AsRef<[u8]> + Sized>(
        checksum_type: N,
        checksum: N,
    ) -> Result<Self, MetadataError> {
        let digest = std::str::from_utf8(checksum.as_ref())?.to_owned();

        let checksum = match checksum_type.as_ref() {
            b"md5" => (Checksum::Md5(digest), 32, ChecksumType::Md5),
            b"sha" | b"sha1" => (Checksum::Sha1(digest), 40, ChecksumType::Sha1),
            b"sha224" => (Checksum::Sha224(digest), 56, ChecksumType::Sha224),
            b"sha256" => (Checksum::Sha256(digest), 64, ChecksumType::Sha256),
            b"sha384" => (Checksum::Sha384(digest), 96, ChecksumType::Sha384),
            b"sha512" => (Checksum::Sha512(digest), 128, ChecksumType::Sha512),
            _ => {
                return Err(MetadataError::UnsupportedChecksumTypeError(
                    String::from_utf8_lossy(checksum_type.as_ref()).into_owned(),
                ));
            }
        };

        let (checksum, expected_len, ctype) = checksum;
        let value = checksum.value();
        if value.len() != expected_len || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MetadataError::InvalidChecksumError(value.to_owned(), ctype));
        }
        Ok(checksum)
    }

    pub fn from_type_and_value(checksum_type: ChecksumType, value: String) -> Self {
        match checksum_type {
            ChecksumType::Md5 => Checksum::Md5(value),
            ChecksumType::Sha1 => Checksum::Sha1(value),
            ChecksumType::Sha224 => Checksum::Sha224(value),
            ChecksumType::Sha256 => Checksum::Sha256(value),
            ChecksumType::Sha384 => Checksum::Sha384(value),
            ChecksumType::Sha512 => Checksum::Sha512(value),
            ChecksumType::Unknown => Checksum::Unknown(value),
        }
    }

    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Checksum::Md5(_) => ChecksumType::Md5,
            Checksum::Sha1(_) => ChecksumType::Sha1,
            Checksum::Sha224(_) => ChecksumType::Sha224,
            Checksum::Sha256(_) => ChecksumType::Sha256,
            Checksum::Sha384(_) => ChecksumType::Sha384,
            Checksum::Sha512(_) => ChecksumType::Sha512,
            Checksum::Unknown(_) | Checksum::Empty => ChecksumType::Unknown,
        }
    }

    fn value(&self) -> &str {
        match self {
            Checksum::Md5(c)
            | Checksum::Sha1(c)
            | Checksum::Sha224(c)
            | Checksum::Sha256(c)
            | Checksum::Sha384(c)
            | Checksum::Sha512(c)
            | Checksum::Unknown(c) => c.as_str(),
            Checksum::Empty => "",
        }
    }

    pub fn to_values(&self) -> Result<(&str, &str), MetadataError> {
        if matches!(self, Checksum::Empty) {
            return Err(MetadataError::MissingFieldError("checksum"));
        }
        Ok((self.checksum_type().as_str(), self.value()))
    }
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct Changelog {
    pub author: String,
    pub timestamp: u64,
    pub description: String,
}

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct HeaderRange {
    pub start: u64,
    pub end: u64,
}

/// A dependency entry (provides, requires, conflicts, obsoletes, weak deps).
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub flags: Option<String>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub preinstall: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FileType {
    #[default]
    File,
    Dir,
    Ghost,
}

impl FileType {
    pub fn try_create<N: AsRef<[u8]> + Sized>(val: N) -> Result<Self, MetadataError> {
        match val.as_ref() {
            b"dir" => Ok(FileType::Dir),
            b"ghost" => Ok(FileType::Ghost),
            b"" | b"file" => Ok(FileType::File),
            _ => Err(MetadataError::InconsistentMetadataError(format!(
                "unknown file type \"{}\"",
                String::from_utf8_lossy(val.as_ref())
            ))),
        }
    }

    pub fn to_values(&self) -> &[u8] {
        match self {
            FileType::File => b"file",
            FileType::Dir => b"dir",
            FileType::Ghost => b"ghost",
        }
    }
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct PackageFile {
    pub filetype: FileType,
    pub path: String,
}

/// The canonical in-memory record for one RPM, either parsed from the package
/// file or rehydrated from previously generated metadata. Both shapes go
/// through the same XML serializer.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Package {
    pub name: String,
    pub arch: String,
    pub evr: EVR,
    pub checksum: Checksum,
    pub location_href: String,
    pub location_base: Option<String>,
    pub summary: String,
    pub description: String,
    pub packager: String,
    pub url: String,
    pub time_file: u64,
    pub time_build: u64,
    pub size_package: u64,
    pub size_installed: u64,
    pub size_archive: u64,

    pub rpm_license: String,
    pub rpm_vendor: String,
    pub rpm_group: String,
    pub rpm_buildhost: String,
    pub rpm_sourcerpm: String,
    pub rpm_header_range: HeaderRange,

    pub rpm_provides: Vec<Requirement>,
    pub rpm_requires: Vec<Requirement>,
    pub rpm_conflicts: Vec<Requirement>,
    pub rpm_obsoletes: Vec<Requirement>,
    pub rpm_suggests: Vec<Requirement>,
    pub rpm_enhances: Vec<Requirement>,
    pub rpm_recommends: Vec<Requirement>,
    pub rpm_supplements: Vec<Requirement>,

    pub rpm_changelogs: Vec<Changelog>,
    pub rpm_files: Vec<PackageFile>,

    // Signature data used only for checksum cache keys, never serialized.
    pub sig_gpg: Option<Vec<u8>>,
    pub sig_pgp: Option<Vec<u8>>,
    pub hdr_id: Option<String>,
}

impl Package {
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_arch(&mut self, arch: impl Into<String>) -> &mut Self {
        self.arch = arch.into();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn set_epoch(&mut self, epoch: u64) -> &mut Self {
        self.evr.epoch = epoch.to_string();
        self
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.evr.version = version.into();
        self
    }

    pub fn set_release(&mut self, release: impl Into<String>) -> &mut Self {
        self.evr.release = release.into();
        self
    }

    pub fn set_evr(&mut self, evr: EVR) -> &mut Self {
        self.evr = evr;
        self
    }

    pub fn evr(&self) -> &EVR {
        &self.evr
    }

    pub fn nvra(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.name, self.evr.version, self.evr.release, self.arch
        )
    }

    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.evr.epoch, self.evr.version, self.evr.release, self.arch
        )
    }

    pub fn nevra_short(&self) -> String {
        if self.evr.epoch == "0" || self.evr.epoch.is_empty() {
            self.nvra()
        } else {
            self.nevra()
        }
    }

    pub fn set_checksum(&mut self, checksum: Checksum) -> &mut Self {
        self.checksum = checksum;
        self
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// The content checksum of the package file, aka the package id.
    pub fn pkgid(&self) -> &str {
        self.checksum.value()
    }

    pub fn checksum_name(&self) -> &'static str {
        self.checksum.checksum_type().as_str()
    }

    pub fn set_location_href(&mut self, location_href: impl Into<String>) -> &mut Self {
        self.location_href = location_href.into();
        self
    }

    pub fn location_href(&self) -> &str {
        &self.location_href
    }

    pub fn set_location_base(&mut self, location_base: Option<impl Into<String>>) -> &mut Self {
        self.location_base = location_base.map(|a| a.into());
        self
    }

    pub fn location_base(&self) -> Option<&str> {
        self.location_base.as_deref()
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> &mut Self {
        self.summary = summary.into();
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn set_packager(&mut self, packager: impl Into<String>) -> &mut Self {
        self.packager = packager.into();
        self
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    pub fn set_time(&mut self, file: u64, build: u64) -> &mut Self {
        self.time_file = file;
        self.time_build = build;
        self
    }

    pub fn set_size(&mut self, package: u64, installed: u64, archive: u64) -> &mut Self {
        self.size_package = package;
        self.size_installed = installed;
        self.size_archive = archive;
        self
    }

    pub fn set_rpm_license(&mut self, license: impl Into<String>) -> &mut Self {
        self.rpm_license = license.into();
        self
    }

    pub fn set_rpm_vendor(&mut self, vendor: impl Into<String>) -> &mut Self {
        self.rpm_vendor = vendor.into();
        self
    }

    pub fn set_rpm_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.rpm_group = group.into();
        self
    }

    pub fn set_rpm_buildhost(&mut self, buildhost: impl Into<String>) -> &mut Self {
        self.rpm_buildhost = buildhost.into();
        self
    }

    pub fn set_rpm_sourcerpm(&mut self, sourcerpm: impl Into<String>) -> &mut Self {
        self.rpm_sourcerpm = sourcerpm.into();
        self
    }

    pub fn set_rpm_header_range(&mut self, start: u64, end: u64) -> &mut Self {
        self.rpm_header_range = HeaderRange { start, end };
        self
    }

    pub fn rpm_header_range(&self) -> &HeaderRange {
        &self.rpm_header_range
    }

    pub fn set_provides(&mut self, provides: Vec<Requirement>) -> &mut Self {
        self.rpm_provides = provides;
        self
    }

    pub fn provides(&self) -> &[Requirement] {
        &self.rpm_provides
    }

    pub fn set_requires(&mut self, requires: Vec<Requirement>) -> &mut Self {
        self.rpm_requires = requires;
        self
    }

    pub fn requires(&self) -> &[Requirement] {
        &self.rpm_requires
    }

    pub fn set_conflicts(&mut self, conflicts: Vec<Requirement>) -> &mut Self {
        self.rpm_conflicts = conflicts;
        self
    }

    pub fn set_obsoletes(&mut self, obsoletes: Vec<Requirement>) -> &mut Self {
        self.rpm_obsoletes = obsoletes;
        self
    }

    pub fn set_suggests(&mut self, suggests: Vec<Requirement>) -> &mut Self {
        self.rpm_suggests = suggests;
        self
    }

    pub fn set_enhances(&mut self, enhances: Vec<Requirement>) -> &mut Self {
        self.rpm_enhances = enhances;
        self
    }

    pub fn set_recommends(&mut self, recommends: Vec<Requirement>) -> &mut Self {
        self.rpm_recommends = recommends;
        self
    }

    pub fn set_supplements(&mut self, supplements: Vec<Requirement>) -> &mut Self {
        self.rpm_supplements = supplements;
        self
    }

    pub fn add_file(&mut self, filetype: FileType, path: &str) -> &mut Self {
        self.rpm_files.push(PackageFile {
            filetype,
            path: path.to_owned(),
        });
        self
    }

    pub fn set_files(&mut self, files: Vec<PackageFile>) -> &mut Self {
        self.rpm_files = files;
        self
    }

    pub fn files(&self) -> &[PackageFile] {
        &self.rpm_files
    }

    pub fn add_changelog(&mut self, author: &str, description: &str, timestamp: u64) -> &mut Self {
        self.rpm_changelogs.push(Changelog {
            author: author.to_owned(),
            timestamp,
            description: description.to_owned(),
        });
        self
    }

    pub fn set_changelogs(&mut self, changelogs: Vec<Changelog>) -> &mut Self {
        self.rpm_changelogs = changelogs;
        self
    }

    pub fn changelogs(&self) -> &[Changelog] {
        &self.rpm_changelogs
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DistroTag {
    pub cpeid: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RepomdData {
    revision: Option<String>,
    repoid: Option<(String, String)>,
    contenthash: Option<(String, String)>,
    metadata_files: Vec<RepomdRecord>,

    repo_tags: Vec<String>,
    content_tags: Vec<String>,
    distro_tags: Vec<DistroTag>,
}

impl RepomdData {
    pub fn add_record(&mut self, record: RepomdRecord) {
        self.metadata_files.push(record);
    }

    pub fn get_record(&self, rectype: &str) -> Option<&RepomdRecord> {
        self.metadata_files
            .iter()
            .find(|r| r.metadata_name == rectype)
    }

    pub fn records(&self) -> &Vec<RepomdRecord> {
        &self.metadata_files
    }

    pub fn add_repo_tag(&mut self, repo: String) {
        self.repo_tags.push(repo)
    }

    pub fn repo_tags(&self) -> &Vec<String> {
        &self.repo_tags
    }

    pub fn add_content_tag(&mut self, content: String) {
        self.content_tags.push(content)
    }

    pub fn content_tags(&self) -> &Vec<String> {
        &self.content_tags
    }

    pub fn add_distro_tag(&mut self, name: String, cpeid: Option<String>) {
        self.distro_tags.push(DistroTag { name, cpeid })
    }

    pub fn distro_tags(&self) -> &Vec<DistroTag> {
        &self.distro_tags
    }

    pub fn set_revision(&mut self, revision: &str) {
        self.revision = Some(revision.to_owned());
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn set_repoid(&mut self, repoid_type: &str, repoid: &str) {
        self.repoid = Some((repoid_type.to_owned(), repoid.to_owned()));
    }

    pub fn repoid(&self) -> Option<(&str, &str)> {
        self.repoid.as_ref().map(|(t, v)| (t.as_str(), v.as_str()))
    }

    pub fn set_contenthash(&mut self, hash_type: &str, hash: &str) {
        self.contenthash = Some((hash_type.to_owned(), hash.to_owned()));
    }

    pub fn contenthash(&self) -> Option<(&str, &str)> {
        self.contenthash
            .as_ref()
            .map(|(t, v)| (t.as_str(), v.as_str()))
    }

    pub fn sort_records(&mut self) {
        fn value(item: &RepomdRecord) -> u32 {
            match item.metadata_name.as_str() {
                METADATA_PRIMARY => 1,
                METADATA_FILELISTS => 2,
                METADATA_OTHER => 3,
                _ => 10,
            }
        }
        self.metadata_files.sort_by_key(value);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepomdRecord {
    base_path: Option<PathBuf>,

    /// Record type
    pub metadata_name: String,
    /// Relative location of the file in a repository
    pub location_href: PathBuf,
    /// URL at which the location_href is relative - if it is not the current one
    pub location_base: Option<String>,
    /// Mtime of the file
    pub timestamp: i64,
    /// Size of the file
    pub size: Option<u64>,
    /// Checksum of the file
    pub checksum: Checksum,

    /// Size of the archive content (-1 when it cannot be determined)
    pub open_size: Option<i64>,
    /// Checksum of the archive content
    pub open_checksum: Option<Checksum>,

    /// Size of the zchunk header
    pub header_size: Option<u64>,
    /// Checksum of the zchunk header
    pub header_checksum: Option<Checksum>,

    /// Database version (used only for sqlite databases like primary.sqlite etc.)
    pub database_version: Option<u32>,
}

impl RepomdRecord {
    pub fn new(
        name: &str,
        href: &Path,
        base: &Path,
        checksum_type: ChecksumType,
    ) -> Result<Self, MetadataError> {
        let mut record = RepomdRecord {
            metadata_name: name.to_owned(),
            location_href: href.to_owned(),
            base_path: Some(base.to_owned()),
            ..RepomdRecord::default()
        };
        record.fill(checksum_type)?;
        Ok(record)
    }

    pub fn fill(&mut self, checksum_type: ChecksumType) -> Result<(), MetadataError> {
        let file_path = self
            .base_path
            .as_ref()
            .ok_or(MetadataError::MissingFieldError("base_path"))?
            .join(&self.location_href);
        let file_metadata = file_path.metadata()?;
        self.timestamp = file_metadata.mtime();
        self.size = Some(file_metadata.size());
        self.checksum = utils::checksum_file(&file_path, checksum_type)?;

        // An uncompressed stream has no distinct "open" representation.
        match utils::checksum_inner_file(&file_path, checksum_type)? {
            Some(open_checksum) => {
                self.open_checksum = Some(open_checksum);
                self.open_size = utils::size_inner_file(&file_path)?.map(|s| s as i64);
            }
            None => {
                self.open_checksum = Some(self.checksum.clone());
                self.open_size = self.size.map(|s| s as i64);
            }
        }

        Ok(())
    }
}
