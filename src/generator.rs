// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::emit::OrderedEmitter;
use crate::metadata::{
    ChecksumType, CompressionType, MetadataError, RepomdData, RepomdRecord, METADATA_FILELISTS,
    METADATA_OTHER, METADATA_PRIMARY,
};
use crate::old_metadata::OldMetadataCache;
use crate::pool::{PoolContext, PoolTask};
use crate::repository::checksum_filename;
use crate::utils;
use crate::RepomdXml;

const DEFAULT_WORKERS: usize = 5;
const MAX_WORKERS: usize = 100;
const DEFAULT_CHANGELOG_LIMIT: usize = 10;
const MAX_CHANGELOG_LIMIT: usize = 100;

/// Everything one generation run needs to know. Mirrors the createrepo
/// command line.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Directory of packages to index.
    pub input_dir: PathBuf,
    /// Base URL recorded for every package location.
    pub location_base: Option<String>,
    /// Where `repodata/` is produced. Defaults to the input directory.
    pub outputdir: Option<PathBuf>,
    /// Filename globs to exclude.
    pub excludes: Vec<String>,
    /// File with one package path per line, replacing directory discovery.
    pub pkglist: Option<PathBuf>,
    /// Package paths to include, replacing directory discovery.
    pub includepkg: Vec<String>,
    /// Reuse metadata of unchanged packages from the existing repodata.
    pub update: bool,
    /// Additional repositories to source old metadata from.
    pub update_md_paths: Vec<PathBuf>,
    /// Take every update cache hit without stat()ing the file.
    pub skip_stat: bool,
    /// Ignore symlinked packages.
    pub skip_symlinks: bool,
    pub checksum_type: ChecksumType,
    /// Keep only the newest N changelog entries per package.
    pub changelog_limit: Option<usize>,
    /// Prefix metadata filenames with their checksum (the default).
    pub unique_md_filenames: bool,
    pub workers: usize,
    /// Directory for the persistent package checksum cache.
    pub checksum_cachedir: Option<PathBuf>,
    /// Remove an existing `.repodata/` lock instead of failing.
    pub ignore_lock: bool,
    pub compression: CompressionType,
    /// Strip this many leading path components from package locations.
    pub cut_dirs: usize,
    /// Prepend this prefix to package locations.
    pub location_prefix: Option<String>,
    /// Serialize all packages single-threaded after the pool drains.
    pub delayed_dump: bool,
    /// Write the location of every newly read package to this file.
    pub read_pkgs_list: Option<PathBuf>,
    /// Revision string for repomd.xml; defaults to the current unix time.
    pub revision: Option<String>,
    pub distro_tags: Vec<(Option<String>, String)>,
    pub content_tags: Vec<String>,
    pub repo_tags: Vec<String>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            location_base: None,
            outputdir: None,
            excludes: Vec::new(),
            pkglist: None,
            includepkg: Vec::new(),
            update: false,
            update_md_paths: Vec::new(),
            skip_stat: false,
            skip_symlinks: false,
            checksum_type: ChecksumType::Sha256,
            changelog_limit: Some(DEFAULT_CHANGELOG_LIMIT),
            unique_md_filenames: true,
            workers: DEFAULT_WORKERS,
            checksum_cachedir: None,
            ignore_lock: false,
            compression: CompressionType::Gzip,
            cut_dirs: 0,
            location_prefix: None,
            delayed_dump: false,
            read_pkgs_list: None,
            revision: None,
            distro_tags: Vec::new(),
            content_tags: Vec::new(),
            repo_tags: Vec::new(),
        }
    }
}

impl GeneratorOptions {
    fn validate(&mut self) -> Result<(), MetadataError> {
        if !self.input_dir.is_dir() {
            return Err(MetadataError::ConfigError(format!(
                "directory {} does not exist",
                self.input_dir.display()
            )));
        }

        if let Some(outputdir) = &self.outputdir {
            if !outputdir.is_dir() {
                return Err(MetadataError::ConfigError(format!(
                    "specified outputdir {} does not exist",
                    outputdir.display()
                )));
            }
        }

        if self.workers < 1 || self.workers > MAX_WORKERS {
            warn!(
                "Wrong number of workers - using {} workers",
                DEFAULT_WORKERS
            );
            self.workers = DEFAULT_WORKERS;
        }

        if let Some(limit) = self.changelog_limit {
            if limit > MAX_CHANGELOG_LIMIT {
                warn!(
                    "Wrong changelog limit \"{}\" - using {}",
                    limit, DEFAULT_CHANGELOG_LIMIT
                );
                self.changelog_limit = Some(DEFAULT_CHANGELOG_LIMIT);
            }
        }

        Ok(())
    }
}

/// What a finished run looked like.
#[derive(Debug)]
pub struct GeneratorSummary {
    /// Packages actually written to the metadata.
    pub package_count: u64,
    /// At least one package was dropped or a stream write failed.
    pub had_errors: bool,
    /// NEVRAs which appeared at more than one location.
    pub duplicate_nevras: Vec<(String, Vec<String>)>,
}

// Directories the signal handler must remove if the process is killed. The
// handler is installed once per process; the set is updated per run.
static CLEANUP_PATHS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
static SIGNAL_HANDLER: Once = Once::new();

fn install_signal_handler() {
    SIGNAL_HANDLER.call_once(|| {
        let result = ctrlc::set_handler(|| {
            eprintln!("Terminating...");
            if let Ok(paths) = CLEANUP_PATHS.lock() {
                for path in paths.iter() {
                    let _ = std::fs::remove_dir_all(path);
                }
            }
            std::process::exit(1);
        });
        if let Err(e) = result {
            warn!("Cannot set signal cleanup handler: {}", e);
        }
    });
}

// Removes the registered scratch directories on drop, covering the normal
// exit paths; the signal handler covers the rest.
struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    fn register(paths: Vec<PathBuf>) -> Self {
        CLEANUP_PATHS.lock().unwrap().extend(paths.iter().cloned());
        Self { paths }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let mut registered = CLEANUP_PATHS.lock().unwrap();
        for path in &self.paths {
            registered.retain(|p| p != path);
            if path.exists() {
                debug!("Removing {}", path.display());
                let _ = std::fs::remove_dir_all(path);
            }
        }
    }
}

pub struct Generator {
    options: GeneratorOptions,
}

impl Generator {
    pub fn new(mut options: GeneratorOptions) -> Result<Self, MetadataError> {
        options.validate()?;
        Ok(Self { options })
    }

    /// Build the repository metadata: discover packages, run the worker
    /// pool, seal the streams and atomically publish `repodata/`.
    pub fn run(&self) -> Result<GeneratorSummary, MetadataError> {
        let options = &self.options;
        let in_dir = options.input_dir.clone();
        let out_dir = options.outputdir.clone().unwrap_or_else(|| in_dir.clone());
        let out_repo = out_dir.join("repodata");

        if out_repo.exists() && !out_repo.is_dir() {
            return Err(MetadataError::ConfigError(format!(
                "{} exists and is not a directory",
                out_repo.display()
            )));
        }

        // The presence of .repodata/ is the lock.
        let lock_dir = out_dir.join(".repodata");
        match std::fs::create_dir(&lock_dir) {
            Ok(()) => (),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !options.ignore_lock {
                    return Err(MetadataError::LockError(lock_dir));
                }
                warn!("Removing existing lock dir {}", lock_dir.display());
                std::fs::remove_dir_all(&lock_dir)?;
                std::fs::create_dir(&lock_dir)?;
            }
            Err(e) => return Err(e.into()),
        }

        // With --ignore-lock the metadata is staged in a separate
        // pid-suffixed directory, so a second forced run can't corrupt it.
        let staging_dir = if options.ignore_lock {
            let staging = out_dir.join(format!(".repodata.{}", std::process::id()));
            if staging.exists() {
                std::fs::remove_dir_all(&staging)?;
            }
            std::fs::create_dir(&staging)?;
            staging
        } else {
            lock_dir.clone()
        };

        install_signal_handler();
        let _cleanup = CleanupGuard::register(vec![lock_dir.clone(), staging_dir.clone()]);

        // Load old metadata if --update
        let old_metadata = if options.update {
            let cache = OldMetadataCache::new();
            match cache.load_repodata(&in_dir) {
                Ok(count) => debug!("Old metadata loaded ({} packages)", count),
                Err(e) => warn!("Old metadata not found: {}", e),
            }
            for path in &options.update_md_paths {
                info!("Using md path: {}", path.display());
                if let Err(e) = cache.load_repodata(path) {
                    warn!("Loading md path {} failed: {}", path.display(), e);
                }
            }
            Some(cache)
        } else {
            None
        };

        info!("Directory walk started");
        let tasks = self.discover_tasks(&in_dir)?;
        let task_count = tasks.len() as u64;
        info!("Directory walk done - {} packages", task_count);

        // Open the output streams and write the document headers, now that
        // the package count is known.
        let (pri_path, pri_writer) =
            utils::create_compressed_writer(&staging_dir.join("primary.xml"), options.compression)?;
        let (fil_path, fil_writer) = utils::create_compressed_writer(
            &staging_dir.join("filelists.xml"),
            options.compression,
        )?;
        let (oth_path, oth_writer) =
            utils::create_compressed_writer(&staging_dir.join("other.xml"), options.compression)?;

        let had_errors = Arc::new(AtomicBool::new(false));
        let emitter = OrderedEmitter::new(
            pri_writer,
            fil_writer,
            oth_writer,
            task_count,
            Arc::clone(&had_errors),
        );
        emitter.write_headers(task_count)?;

        let output_pkg_list = match &options.read_pkgs_list {
            Some(path) => Some(Mutex::new(BufWriter::new(File::create(path)?))),
            None => None,
        };

        let mut ctx = PoolContext {
            emitter,
            checksum_type: options.checksum_type,
            checksum_cachedir: options.checksum_cachedir.clone(),
            changelog_limit: options.changelog_limit,
            location_base: options.location_base.clone(),
            cut_dirs: options.cut_dirs,
            location_prefix: options.location_prefix.clone(),
            skip_stat: options.skip_stat,
            old_metadata,
            nevra_table: Mutex::new(IndexMap::new()),
            had_errors: Arc::clone(&had_errors),
            output_pkg_list,
            delayed_tasks: options
                .delayed_dump
                .then(|| Mutex::new((0..task_count).map(|_| None).collect())),
            task_count,
        };

        info!("Pool started");
        ctx.run(tasks, options.workers);
        ctx.run_delayed_dump();
        info!("Pool finished");

        ctx.emitter.finish()?;

        if let Some(list) = ctx.output_pkg_list.take() {
            list.into_inner()
                .map_err(|e| {
                    MetadataError::ConfigError(format!("output package list poisoned: {}", e))
                })?
                .flush()?;
        }

        // Checksum the finished streams and build repomd.xml.
        let mut repomd = RepomdData::default();
        if let Some(revision) = &options.revision {
            repomd.set_revision(revision);
        }
        for (cpeid, name) in &options.distro_tags {
            repomd.add_distro_tag(name.clone(), cpeid.clone());
        }
        for tag in &options.content_tags {
            repomd.add_content_tag(tag.clone());
        }
        for tag in &options.repo_tags {
            repomd.add_repo_tag(tag.clone());
        }

        for (name, path) in [
            (METADATA_PRIMARY, &pri_path),
            (METADATA_FILELISTS, &fil_path),
            (METADATA_OTHER, &oth_path),
        ] {
            let filename = path
                .file_name()
                .ok_or(MetadataError::MissingFieldError("location_href"))?
                .to_string_lossy()
                .into_owned();
            let mut record = RepomdRecord::new(
                name,
                Path::new(&filename),
                &staging_dir,
                options.checksum_type,
            )?;

            let final_name = if options.unique_md_filenames {
                let unique_name = checksum_filename(&record.checksum, &filename)?;
                std::fs::rename(staging_dir.join(&filename), staging_dir.join(&unique_name))?;
                unique_name
            } else {
                filename
            };
            record.location_href = PathBuf::from("repodata").join(final_name);
            repomd.add_record(record);
        }
        repomd.sort_records();

        debug!("Generating repomd.xml");
        let (_, mut repomd_writer) =
            utils::create_xml_writer(&staging_dir.join("repomd.xml"), CompressionType::None)?;
        RepomdXml::write_data(&repomd, &mut repomd_writer)?;
        repomd_writer.into_inner().flush()?;

        // Atomically swap the staged tree into place.
        debug!("Publishing {}", out_repo.display());
        if out_repo.exists() {
            let graveyard = out_dir.join(format!(".repodata.old.{}", std::process::id()));
            std::fs::rename(&out_repo, &graveyard)?;
            std::fs::rename(&staging_dir, &out_repo)?;
            std::fs::remove_dir_all(&graveyard)?;
        } else {
            std::fs::rename(&staging_dir, &out_repo)?;
        }

        let duplicate_nevras = ctx.duplicate_nevras();
        for (nevra, locations) in &duplicate_nevras {
            warn!(
                "Package '{}' appears at multiple locations: {}",
                nevra,
                locations.join(", ")
            );
        }

        if had_errors.load(Ordering::Relaxed) {
            error!("Some packages could not be processed");
        }

        Ok(GeneratorSummary {
            package_count: ctx.emitter.package_count(),
            had_errors: had_errors.load(Ordering::Relaxed),
            duplicate_nevras,
        })
    }

    fn discover_tasks(&self, in_dir: &Path) -> Result<Vec<PoolTask>, MetadataError> {
        let options = &self.options;

        let mut exclude_masks = Vec::with_capacity(options.excludes.len());
        for pattern in &options.excludes {
            let compiled = glob::Pattern::new(pattern).map_err(|e| {
                MetadataError::ConfigError(format!("bad exclude glob \"{}\": {}", pattern, e))
            })?;
            exclude_masks.push(compiled);
        }

        let allowed = |filename: &str| -> bool {
            for mask in &exclude_masks {
                if mask.matches(filename) {
                    debug!("Exclude masks hit - skipping: {}", filename);
                    return false;
                }
            }
            true
        };

        // An explicit package list replaces the directory walk.
        let mut include_pkgs: Vec<String> = options.includepkg.clone();
        if let Some(pkglist) = &options.pkglist {
            match std::fs::read_to_string(pkglist) {
                Ok(content) => {
                    include_pkgs.extend(content.lines().filter(|l| !l.is_empty()).map(String::from));
                }
                Err(e) => warn!("Error while reading pkglist file: {}", e),
            }
        }

        let mut tasks = Vec::new();
        if !include_pkgs.is_empty() {
            debug!("Skipping dir walk - using pkglist");
            for relative_path in include_pkgs {
                let filename = utils::href_filename(&relative_path).to_owned();
                if !allowed(&filename) {
                    continue;
                }
                let full_path = in_dir.join(&relative_path);
                debug!("Adding pkg: {}", full_path.display());
                tasks.push(PoolTask {
                    id: tasks.len() as u64,
                    full_path,
                    filename,
                    relative_path,
                    media_id: None,
                });
            }
        } else {
            let walker = WalkDir::new(in_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    // stay out of the metadata and lock directories
                    let name = entry.file_name().to_string_lossy();
                    !(entry.file_type().is_dir()
                        && (name == "repodata" || name.starts_with(".repodata")))
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Cannot open directory entry: {}", e);
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }
                if options.skip_symlinks && entry.path_is_symlink() {
                    debug!("Skipping symlink: {}", entry.path().display());
                    continue;
                }

                let filename = entry.file_name().to_string_lossy().into_owned();
                if !filename.ends_with(".rpm") {
                    continue;
                }
                if !allowed(&filename) {
                    continue;
                }

                let relative_path = entry
                    .path()
                    .strip_prefix(in_dir)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| filename.clone());

                debug!("Adding pkg: {}", entry.path().display());
                tasks.push(PoolTask {
                    id: tasks.len() as u64,
                    full_path: entry.path().to_owned(),
                    filename,
                    relative_path,
                    media_id: None,
                });
            }
        }

        Ok(tasks)
    }
}
