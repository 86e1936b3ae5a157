// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::filelist::FilelistsXmlWriter;
use crate::metadata::{
    Checksum, ChecksumType, CompressionType, MetadataError, Package, RepomdData, RepomdRecord,
    METADATA_FILELISTS, METADATA_OTHER, METADATA_PRIMARY,
};
use crate::old_metadata::PackageIterator;
use crate::other::OtherXmlWriter;
use crate::primary::PrimaryXmlWriter;
use crate::utils;
use crate::{FilelistsXml, OtherXml, PrimaryXml, RepomdXml};

/// A fully materialized repository: a repomd plus every package, keyed by
/// package id.
#[derive(Debug, Default)]
pub struct Repository {
    repomd_data: RepomdData,
    packages: BTreeMap<String, Package>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repomd(&self) -> &RepomdData {
        &self.repomd_data
    }

    pub fn repomd_mut(&mut self) -> &mut RepomdData {
        &mut self.repomd_data
    }

    pub fn packages(&self) -> &BTreeMap<String, Package> {
        &self.packages
    }

    pub fn packages_mut(&mut self) -> &mut BTreeMap<String, Package> {
        &mut self.packages
    }

    pub fn load_from_directory(path: &Path) -> Result<Self, MetadataError> {
        RepositoryReader::new_from_directory(path)?.into_repo()
    }

    pub fn write_to_directory(
        &self,
        path: &Path,
        options: RepositoryOptions,
    ) -> Result<(), MetadataError> {
        let mut repo_writer =
            RepositoryWriter::new_with_options(path, self.packages().len(), options)?;
        for pkg in self.packages().values() {
            repo_writer.add_package(pkg)?;
        }
        repo_writer.finish()?;

        Ok(())
    }
}

#[derive(Debug, Copy, Clone)]
pub struct RepositoryOptions {
    pub simple_md_filenames: bool,
    pub metadata_compression_type: CompressionType,
    pub metadata_checksum_type: ChecksumType,
    pub package_checksum_type: ChecksumType,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            simple_md_filenames: false,
            metadata_compression_type: CompressionType::Gzip,
            metadata_checksum_type: ChecksumType::Sha256,
            package_checksum_type: ChecksumType::Sha256,
        }
    }
}

impl RepositoryOptions {
    pub fn package_checksum_type(self, chktype: ChecksumType) -> Self {
        Self {
            package_checksum_type: chktype,
            ..self
        }
    }

    pub fn metadata_checksum_type(self, chktype: ChecksumType) -> Self {
        Self {
            metadata_checksum_type: chktype,
            ..self
        }
    }

    pub fn metadata_compression_type(self, comptype: CompressionType) -> Self {
        Self {
            metadata_compression_type: comptype,
            ..self
        }
    }

    pub fn simple_md_filenames(self, val: bool) -> Self {
        Self {
            simple_md_filenames: val,
            ..self
        }
    }
}

/// Writes the three metadata streams package-by-package, then seals the
/// repository with a repomd.xml.
pub struct RepositoryWriter {
    options: RepositoryOptions,
    path: PathBuf,

    primary_xml_writer: Option<PrimaryXmlWriter<Box<dyn Write + Send>>>,
    filelists_xml_writer: Option<FilelistsXmlWriter<Box<dyn Write + Send>>>,
    other_xml_writer: Option<OtherXmlWriter<Box<dyn Write + Send>>>,

    repomd_data: RepomdData,
}

impl RepositoryWriter {
    pub fn new(path: &Path, num_pkgs: usize) -> Result<Self, MetadataError> {
        Self::new_with_options(path, num_pkgs, RepositoryOptions::default())
    }

    pub fn new_with_options(
        path: &Path,
        num_pkgs: usize,
        options: RepositoryOptions,
    ) -> Result<Self, MetadataError> {
        let repodata_dir = path.join("repodata");
        std::fs::create_dir_all(&repodata_dir)?;

        let compression = options.metadata_compression_type;
        let (_, primary_writer) =
            utils::create_xml_writer(&repodata_dir.join("primary.xml"), compression)?;
        let (_, filelists_writer) =
            utils::create_xml_writer(&repodata_dir.join("filelists.xml"), compression)?;
        let (_, other_writer) =
            utils::create_xml_writer(&repodata_dir.join("other.xml"), compression)?;

        let mut primary_xml_writer = PrimaryXml::new_writer(primary_writer);
        let mut filelists_xml_writer = FilelistsXml::new_writer(filelists_writer);
        let mut other_xml_writer = OtherXml::new_writer(other_writer);

        primary_xml_writer.write_header(num_pkgs)?;
        filelists_xml_writer.write_header(num_pkgs)?;
        other_xml_writer.write_header(num_pkgs)?;

        Ok(Self {
            options,
            path: path.to_owned(),

            primary_xml_writer: Some(primary_xml_writer),
            filelists_xml_writer: Some(filelists_xml_writer),
            other_xml_writer: Some(other_xml_writer),

            repomd_data: RepomdData::default(),
        })
    }

    pub fn repomd_mut(&mut self) -> &mut RepomdData {
        &mut self.repomd_data
    }

    pub fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        self.primary_xml_writer
            .as_mut()
            .ok_or(MetadataError::MissingFieldError("writer"))?
            .write_package(pkg)?;
        self.filelists_xml_writer
            .as_mut()
            .ok_or(MetadataError::MissingFieldError("writer"))?
            .write_package(pkg)?;
        self.other_xml_writer
            .as_mut()
            .ok_or(MetadataError::MissingFieldError("writer"))?
            .write_package(pkg)?;

        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // Close the root elements, then drop the writers - the compression
        // encoders only finish their streams when dropped.
        if let Some(mut writer) = self.primary_xml_writer.take() {
            writer.finish()?;
            writer.into_inner().flush()?;
        }
        if let Some(mut writer) = self.filelists_xml_writer.take() {
            writer.finish()?;
            writer.into_inner().flush()?;
        }
        if let Some(mut writer) = self.other_xml_writer.take() {
            writer.finish()?;
            writer.into_inner().flush()?;
        }

        let extension = self.options.metadata_compression_type.to_file_extension();
        for name in [METADATA_PRIMARY, METADATA_FILELISTS, METADATA_OTHER] {
            let href = PathBuf::from("repodata").join(format!("{}.xml{}", name, extension));
            let mut record = RepomdRecord::new(
                name,
                &href,
                &self.path,
                self.options.metadata_checksum_type,
            )?;
            if !self.options.simple_md_filenames {
                rename_with_checksum(&mut record, &self.path)?;
            }
            self.repomd_data.add_record(record);
        }

        self.repomd_data.sort_records();

        let (_, mut repomd_writer) = utils::create_xml_writer(
            &self.path.join("repodata").join("repomd.xml"),
            CompressionType::None,
        )?;
        RepomdXml::write_data(&self.repomd_data, &mut repomd_writer)?;
        repomd_writer.into_inner().flush()?;

        Ok(())
    }
}

/// The unique-md-filenames scheme: prefix a metadata filename with its
/// content checksum.
pub(crate) fn checksum_filename(checksum: &Checksum, name: &str) -> Result<String, MetadataError> {
    let (_, checksum_value) = checksum.to_values()?;
    Ok(format!("{}-{}", checksum_value, name))
}

// Rename a finished metadata file in place to its checksum-prefixed name and
// update the record's href accordingly.
fn rename_with_checksum(record: &mut RepomdRecord, base: &Path) -> Result<(), MetadataError> {
    let old_path = base.join(&record.location_href);
    let filename = old_path
        .file_name()
        .ok_or(MetadataError::MissingFieldError("location_href"))?
        .to_string_lossy()
        .into_owned();
    let new_name = checksum_filename(&record.checksum, &filename)?;
    let new_path = old_path.with_file_name(&new_name);
    std::fs::rename(&old_path, &new_path)?;
    record.location_href = PathBuf::from("repodata").join(new_name);
    Ok(())
}

/// Streaming access to an existing repository.
pub struct RepositoryReader {
    repomd_data: RepomdData,
    base: PathBuf,
}

impl RepositoryReader {
    pub fn new_from_directory(path: &Path) -> Result<Self, MetadataError> {
        let repomd_path = path.join("repodata").join("repomd.xml");
        let repomd_data = RepomdXml::read_data(utils::xml_reader_from_path(&repomd_path)?)?;

        Ok(Self {
            repomd_data,
            base: path.to_owned(),
        })
    }

    pub fn repomd(&self) -> &RepomdData {
        &self.repomd_data
    }

    pub fn iter_packages(&self) -> Result<PackageIterator, MetadataError> {
        PackageIterator::from_repodata(&self.base, &self.repomd_data)
    }

    pub fn into_repo(self) -> Result<Repository, MetadataError> {
        let mut repo = Repository::new();
        let packages = self.iter_packages()?;
        for package in packages {
            let package = package?;
            repo.packages_mut()
                .insert(package.pkgid().to_owned(), package);
        }
        repo.repomd_data = self.repomd_data;
        Ok(repo)
    }
}
