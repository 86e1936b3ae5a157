use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::prelude::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::{debug, error, warn};

use crate::cache;
use crate::emit::{OrderedEmitter, XmlChunks};
use crate::metadata::{Checksum, ChecksumType, MetadataError, Package};
use crate::old_metadata::{metadata_is_fresh, OldMetadataCache};
use crate::package::PackageParser;
use crate::utils;

/// One unit of work: a single RPM file, numbered in submission order.
#[derive(Debug, Clone)]
pub struct PoolTask {
    pub id: u64,
    pub full_path: PathBuf,
    pub filename: String,
    /// Path relative to the repository root, before any href modifications.
    pub relative_path: String,
    /// Media number, when building a split-media repository.
    pub media_id: Option<u32>,
}

/// Shared state of one generation run, owned by the driver and referenced by
/// every worker. Each shared resource carries its own lock; everything else
/// is read-only.
pub(crate) struct PoolContext {
    pub emitter: OrderedEmitter,

    pub checksum_type: ChecksumType,
    pub checksum_cachedir: Option<PathBuf>,
    pub changelog_limit: Option<usize>,
    pub location_base: Option<String>,
    pub cut_dirs: usize,
    pub location_prefix: Option<String>,
    pub skip_stat: bool,

    pub old_metadata: Option<OldMetadataCache>,
    pub nevra_table: Mutex<IndexMap<String, Vec<String>>>,
    pub had_errors: Arc<AtomicBool>,
    pub output_pkg_list: Option<Mutex<BufWriter<File>>>,
    /// When set, workers record packages here instead of emitting, and the
    /// driver dumps the whole array in id order afterwards.
    pub delayed_tasks: Option<Mutex<Vec<Option<Package>>>>,
    pub task_count: u64,
}

impl PoolContext {
    /// Feed `tasks` through `workers` threads. Returns once every task has
    /// been handled and all workers have exited.
    pub fn run(&self, tasks: Vec<PoolTask>, workers: usize) {
        let (tx, rx) = crossbeam_channel::bounded::<PoolTask>(workers * 4);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                scope.spawn(move || {
                    for task in rx.iter() {
                        dumper_thread(task, self);
                    }
                });
            }
            drop(rx);

            for task in tasks {
                if tx.send(task).is_err() {
                    break;
                }
            }
            drop(tx);
        });
    }

    /// Deferred-dump mode: serialize every recorded package in task order.
    pub fn run_delayed_dump(&self) {
        let Some(slots) = &self.delayed_tasks else {
            return;
        };
        debug!("Performing the delayed metadata dump");

        let mut slots = slots.lock().unwrap();
        for (id, slot) in slots.iter_mut().enumerate() {
            let id = id as u64;
            match slot.take() {
                // invalid (failed) task, counters still have to advance
                None => self.emitter.skip_package(id),
                Some(pkg) => match XmlChunks::dump(&pkg) {
                    Ok(chunks) => self.emitter.write_package(id, &chunks),
                    Err(e) => {
                        error!("Cannot dump XML for {} ({}): {}", pkg.name(), pkg.pkgid(), e);
                        self.had_errors.store(true, Ordering::Relaxed);
                        self.emitter.skip_package(id);
                    }
                },
            }
        }
    }

    /// NEVRA buckets holding more than one location.
    pub fn duplicate_nevras(&self) -> Vec<(String, Vec<String>)> {
        self.nevra_table
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, locations)| locations.len() > 1)
            .map(|(nevra, locations)| (nevra.clone(), locations.clone()))
            .collect()
    }

    fn mark_error(&self) {
        self.had_errors.store(true, Ordering::Relaxed);
    }

    // A task failed before producing output. The stream counters still have
    // to advance or every following task would deadlock.
    fn finish_failed_task(&self, id: u64) {
        if self.delayed_tasks.is_some() {
            return;
        }
        self.emitter.skip_package(id);
        self.emitter.drain_ready();
    }
}

fn dumper_thread(task: PoolTask, ctx: &PoolContext) {
    // Effective location href: repo-relative path, minus cut dirs, plus the
    // configured prefix.
    let mut location_href = task.relative_path.clone();
    if ctx.cut_dirs > 0 {
        location_href = utils::cut_dirs(&location_href, ctx.cut_dirs).to_owned();
    }
    if let Some(prefix) = &ctx.location_prefix {
        location_href = format!("{}/{}", prefix.trim_end_matches('/'), location_href);
    }

    let location_base = match task.media_id {
        Some(media_id) => Some(utils::split_media_baseurl(
            media_id,
            ctx.location_base.as_deref(),
        )),
        None => ctx.location_base.clone(),
    };

    let stat = if ctx.old_metadata.is_some() && !ctx.skip_stat {
        match std::fs::metadata(&task.full_path) {
            Ok(stat) => Some(stat),
            Err(e) => {
                error!("Stat() on {}: {}", task.full_path.display(), e);
                ctx.mark_error();
                ctx.finish_failed_task(task.id);
                return;
            }
        }
    } else {
        None
    };

    // Update engine: steal the cached package so no other worker can reuse
    // it, then decide whether it is still fresh.
    let mut old_used = false;
    let mut pkg: Option<Package> = None;
    if let Some(old_metadata) = &ctx.old_metadata {
        let cache_key = utils::cache_key(&location_href);
        if let Some(mut md) = old_metadata.steal(cache_key) {
            debug!("CACHE HIT {}", task.filename);

            let fresh = ctx.skip_stat
                || stat
                    .as_ref()
                    .map(|s| metadata_is_fresh(&md, s, ctx.checksum_type.as_str()))
                    .unwrap_or(false);

            if fresh {
                // Usable old data - only the locations are rewritten.
                // location_base is kept unless a new one was supplied.
                md.set_location_href(&location_href);
                if location_base.is_some() {
                    md.set_location_base(location_base.clone());
                }
                pkg = Some(md);
                old_used = true;
            } else {
                debug!("{} metadata are obsolete -> generating new", task.filename);
            }
        }
    }

    let pkg = match pkg {
        Some(pkg) => pkg,
        None => match load_rpm(&task, &location_href, location_base, ctx) {
            Ok(pkg) => pkg,
            Err(e) => {
                warn!("Cannot read package: {}: {}", task.full_path.display(), e);
                ctx.mark_error();
                ctx.finish_failed_task(task.id);
                return;
            }
        },
    };

    if !old_used {
        if let Some(list) = &ctx.output_pkg_list {
            let mut list = list.lock().unwrap();
            let _ = writeln!(list, "{}", pkg.location_href());
        }
    }

    // Track every handled package by NEVRA so duplicates can be reported
    // after the pool drains.
    {
        let mut table = ctx.nevra_table.lock().unwrap();
        table
            .entry(pkg.nevra())
            .or_default()
            .push(pkg.location_href().to_owned());
    }

    if let Some(slots) = &ctx.delayed_tasks {
        slots.lock().unwrap()[task.id as usize] = Some(pkg);
        return;
    }

    // Pre-calculate the XML outside any critical section.
    let chunks = match XmlChunks::dump(&pkg) {
        Ok(chunks) => chunks,
        Err(e) => {
            error!("Cannot dump XML for {} ({}): {}", pkg.name(), pkg.pkgid(), e);
            ctx.mark_error();
            ctx.finish_failed_task(task.id);
            return;
        }
    };

    // Park the result if the serializer isn't ready for it; once the buffer
    // holds 20 results, workers block on their emit turn instead.
    match ctx.emitter.try_buffer(task.id, chunks) {
        None => return,
        Some(chunks) => ctx.emitter.write_package(task.id, &chunks),
    }

    // Emit buffered results which were waiting on this task.
    ctx.emitter.drain_ready();
}

fn load_rpm(
    task: &PoolTask,
    location_href: &str,
    location_base: Option<String>,
    ctx: &PoolContext,
) -> Result<Package, MetadataError> {
    // Signatures and the header id only matter for checksum cache keys.
    let parser = PackageParser::new(ctx.changelog_limit, ctx.checksum_cachedir.is_some());
    let mut pkg = parser.parse_file(&task.full_path)?;

    pkg.set_location_href(location_href);
    pkg.set_location_base(location_base);

    let stat = std::fs::metadata(&task.full_path)?;
    pkg.time_file = stat.mtime() as u64;
    pkg.size_package = stat.size();

    let checksum = cache::package_checksum(
        &task.full_path,
        ctx.checksum_type,
        &pkg,
        ctx.checksum_cachedir.as_deref(),
    )?;
    pkg.set_checksum(Checksum::from_type_and_value(ctx.checksum_type, checksum));

    Ok(pkg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EVR;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cached_package(href: &str, name: &str) -> Package {
        let mut pkg = Package::default();
        pkg.set_name(name)
            .set_arch("noarch")
            .set_evr(EVR::new("0", "1.0", "1"))
            .set_checksum(Checksum::Sha256(format!("{:0>64}", name.len())))
            .set_location_href(href)
            .set_summary("cached")
            .set_time(1000, 900)
            .set_size(10, 20, 30);
        pkg
    }

    fn context(task_count: u64, old: OldMetadataCache, had_errors: Arc<AtomicBool>) -> (PoolContext, SharedBuf) {
        let out = SharedBuf::default();
        let emitter = OrderedEmitter::new(
            Box::new(out.clone()),
            Box::new(out.clone()),
            Box::new(out.clone()),
            task_count,
            Arc::clone(&had_errors),
        );
        let ctx = PoolContext {
            emitter,
            checksum_type: ChecksumType::Sha256,
            checksum_cachedir: None,
            changelog_limit: None,
            location_base: None,
            cut_dirs: 0,
            location_prefix: None,
            skip_stat: true,
            old_metadata: Some(old),
            nevra_table: Mutex::new(IndexMap::new()),
            had_errors,
            output_pkg_list: None,
            delayed_tasks: None,
            task_count,
        };
        (ctx, out)
    }

    fn task(id: u64, relative_path: &str) -> PoolTask {
        PoolTask {
            id,
            full_path: PathBuf::from("/nonexistent").join(relative_path),
            filename: utils::href_filename(relative_path).to_owned(),
            relative_path: relative_path.to_owned(),
            media_id: None,
        }
    }

    // With --update and --skip-stat every task is served from the cache, so
    // the whole pipeline runs without touching the filesystem.
    #[test]
    fn test_pool_emits_cache_hits_in_submission_order() {
        let old = OldMetadataCache::new();
        let names = ["alpha", "bravo", "charlie", "delta", "echo"];
        for name in names {
            let href = format!("{}-1.0-1.noarch.rpm", name);
            old.insert(cached_package(&href, name));
        }

        let had_errors = Arc::new(AtomicBool::new(false));
        let (ctx, out) = context(names.len() as u64, old, Arc::clone(&had_errors));

        let tasks: Vec<PoolTask> = names
            .iter()
            .enumerate()
            .map(|(id, name)| task(id as u64, &format!("{}-1.0-1.noarch.rpm", name)))
            .collect();

        ctx.run(tasks, 4);
        ctx.emitter.finish().unwrap();

        assert!(!had_errors.load(Ordering::Relaxed));
        assert_eq!(ctx.emitter.package_count(), 5);

        // every stream interleaves into one buffer here, but per-package
        // name order must still follow submission order
        let output = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let mut positions = Vec::new();
        for name in names {
            positions.push(output.find(&format!("<name>{}</name>", name)).unwrap());
        }
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_pool_missing_file_sets_had_errors_and_advances() {
        let old = OldMetadataCache::new();
        let href = "ok-1.0-1.noarch.rpm";
        old.insert(cached_package(href, "ok"));

        let had_errors = Arc::new(AtomicBool::new(false));
        let (ctx, _out) = context(2, old, Arc::clone(&had_errors));

        // task 0 misses the cache and fails to load; task 1 hits the cache
        let tasks = vec![task(0, "missing-1.0-1.noarch.rpm"), task(1, href)];
        ctx.run(tasks, 2);
        ctx.emitter.finish().unwrap();

        assert!(had_errors.load(Ordering::Relaxed));
        assert_eq!(ctx.emitter.package_count(), 1);
        // counters advanced past the dropped task
        assert_eq!(ctx.emitter.pri_next_id(), 2);
    }

    #[test]
    fn test_pool_reports_duplicate_nevras() {
        let old = OldMetadataCache::new();
        // different files in different directories, same NEVRA
        for href in ["a/dupe-1.0-1.noarch.rpm", "b/dupe-1.0-1.copy.noarch.rpm"] {
            old.insert(cached_package(href, "dupe"));
        }

        let had_errors = Arc::new(AtomicBool::new(false));
        let (ctx, _out) = context(2, old, had_errors);

        let tasks = vec![
            task(0, "a/dupe-1.0-1.noarch.rpm"),
            task(1, "b/dupe-1.0-1.copy.noarch.rpm"),
        ];
        ctx.run(tasks, 2);
        ctx.emitter.finish().unwrap();

        let duplicates = ctx.duplicate_nevras();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].0, "dupe-0:1.0-1.noarch");
        assert_eq!(duplicates[0].1.len(), 2);
    }

    #[test]
    fn test_delayed_dump_emits_in_order() {
        let old = OldMetadataCache::new();
        let names = ["one", "two", "three"];
        for name in names {
            let href = format!("{}-1.0-1.noarch.rpm", name);
            old.insert(cached_package(&href, name));
        }

        let had_errors = Arc::new(AtomicBool::new(false));
        let (mut ctx, out) = context(3, old, had_errors);
        ctx.delayed_tasks = Some(Mutex::new((0..3).map(|_| None).collect()));

        let tasks: Vec<PoolTask> = names
            .iter()
            .enumerate()
            .map(|(id, name)| task(id as u64, &format!("{}-1.0-1.noarch.rpm", name)))
            .collect();
        ctx.run(tasks, 3);

        // nothing was emitted by the pool itself
        assert_eq!(ctx.emitter.package_count(), 0);

        ctx.run_delayed_dump();
        ctx.emitter.finish().unwrap();
        assert_eq!(ctx.emitter.package_count(), 3);

        let output = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let one = output.find("<name>one</name>").unwrap();
        let two = output.find("<name>two</name>").unwrap();
        let three = output.find("<name>three</name>").unwrap();
        assert!(one < two && two < three);
    }
}
