// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod cache;
mod common;
mod emit;
mod filelist;
mod generator;
mod metadata;
mod old_metadata;
mod other;
mod package;
mod pool;
mod primary;
mod repomd;
mod repository;
pub mod utils;

pub use common::EVR;
pub use generator::{Generator, GeneratorOptions, GeneratorSummary};
pub use metadata::{
    Changelog, Checksum, ChecksumType, CompressionType, FileType, FilelistsXml, HeaderRange,
    MetadataError, OtherXml, Package, PackageFile, PrimaryXml, RepomdData, RepomdRecord,
    RepomdXml, Requirement,
};
pub use old_metadata::{OldMetadataCache, PackageIterator};
pub use package::PackageParser;
pub use pool::PoolTask;
pub use repository::{Repository, RepositoryOptions, RepositoryReader, RepositoryWriter};
