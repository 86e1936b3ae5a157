// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::warn;

use crate::common::compare_version_string;
use crate::metadata::{Changelog, MetadataError, Package, PackageFile, Requirement};
use crate::utils::is_primary_path;
use crate::{FileType, EVR};

/// Reads RPM package files into [`Package`] records via the `rpm` crate,
/// applying the same field and dependency normalization rules yum-compatible
/// generators have always applied.
///
/// Location, file checksum and stat-derived fields are the caller's business;
/// this type only looks at the package header.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageParser {
    /// Keep only the newest N changelog entries. None means unlimited.
    pub changelog_limit: Option<usize>,
    /// Also pull signature blobs and the header id out of the signature
    /// header. Only needed when a checksum cache is in use.
    pub load_signatures: bool,
}

impl PackageParser {
    pub fn new(changelog_limit: Option<usize>, load_signatures: bool) -> Self {
        Self {
            changelog_limit,
            load_signatures,
        }
    }

    /// Parse the header of the RPM file at `path` into a [`Package`].
    pub fn parse_file(&self, path: &Path) -> Result<Package, MetadataError> {
        let file = File::open(path)?;
        let pkg = rpm::PackageMetadata::parse(&mut BufReader::new(&file))?;

        let mut pkg_metadata = Package::default();

        pkg_metadata.set_name(pkg.get_name()?);

        let arch = if pkg.is_source_package() {
            "src"
        } else {
            pkg.get_arch()?
        };
        pkg_metadata.set_arch(arch);
        pkg_metadata.set_epoch(pkg.get_epoch().unwrap_or(0) as u64);
        pkg_metadata.set_version(pkg.get_version()?);
        pkg_metadata.set_release(pkg.get_release()?);

        pkg_metadata.set_summary(pkg.get_summary().unwrap_or_default());
        pkg_metadata.set_description(pkg.get_description().unwrap_or_default());
        pkg_metadata.set_packager(pkg.get_packager().unwrap_or_default());
        pkg_metadata.set_url(pkg.get_url().unwrap_or_default());
        pkg_metadata.set_rpm_license(pkg.get_license().unwrap_or_default());
        pkg_metadata.set_rpm_vendor(pkg.get_vendor().unwrap_or_default());
        pkg_metadata.set_rpm_group(pkg.get_group().unwrap_or_default());
        pkg_metadata.set_rpm_buildhost(pkg.get_build_host().unwrap_or_default());
        pkg_metadata.set_rpm_sourcerpm(pkg.get_source_rpm().unwrap_or_default());
        pkg_metadata.time_build = pkg.get_build_time().unwrap_or(0);

        let archive_size = pkg
            .signature
            .get_entry_data_as_u64(rpm::IndexSignatureTag::RPMSIGTAG_LONGARCHIVESIZE)
            .unwrap_or_else(|_| {
                pkg.signature
                    .get_entry_data_as_u32(rpm::IndexSignatureTag::RPMSIGTAG_PAYLOADSIZE)
                    .unwrap_or(0) as u64
            });
        pkg_metadata.size_archive = archive_size;
        pkg_metadata.size_installed = pkg.get_installed_size().unwrap_or(0);

        let mut files: Vec<PackageFile> = Vec::new();
        for entry in pkg.get_file_entries().unwrap_or_default() {
            files.push(convert_file_entry(entry));
        }
        pkg_metadata.set_files(files);

        let nevra = format!(
            "{}-{}-{}.{}",
            pkg_metadata.name, pkg_metadata.evr.version, pkg_metadata.evr.release, arch
        );
        let provides = pkg.get_provides()?;
        pkg_metadata.set_requires(filter_requires(
            pkg.get_requires()?,
            &provides,
            pkg_metadata.files(),
            &nevra,
        )?);
        pkg_metadata.set_provides(convert_dependencies(provides, &nevra)?);
        pkg_metadata.set_conflicts(convert_dependencies(pkg.get_conflicts()?, &nevra)?);
        pkg_metadata.set_obsoletes(convert_dependencies(pkg.get_obsoletes()?, &nevra)?);
        pkg_metadata.set_suggests(convert_dependencies(
            pkg.get_suggests().unwrap_or_default(),
            &nevra,
        )?);
        pkg_metadata.set_enhances(convert_dependencies(
            pkg.get_enhances().unwrap_or_default(),
            &nevra,
        )?);
        pkg_metadata.set_recommends(convert_dependencies(
            pkg.get_recommends().unwrap_or_default(),
            &nevra,
        )?);
        pkg_metadata.set_supplements(convert_dependencies(
            pkg.get_supplements().unwrap_or_default(),
            &nevra,
        )?);

        let mut changelogs: Vec<Changelog> = pkg
            .get_changelog_entries()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| Changelog {
                author: entry.name.trim_end_matches(' ').to_owned(),
                timestamp: entry.timestamp,
                description: entry.description,
            })
            .collect();
        pkg_metadata.set_changelogs(normalize_changelogs(&mut changelogs, self.changelog_limit));

        if self.load_signatures {
            pkg_metadata.sig_gpg = pkg
                .signature
                .get_entry_data_as_binary(rpm::IndexSignatureTag::RPMSIGTAG_GPG)
                .ok()
                .map(<[u8]>::to_vec);
            pkg_metadata.sig_pgp = pkg
                .signature
                .get_entry_data_as_binary(rpm::IndexSignatureTag::RPMSIGTAG_PGP)
                .ok()
                .map(<[u8]>::to_vec);
            pkg_metadata.hdr_id = pkg
                .signature
                .get_entry_data_as_string(rpm::IndexSignatureTag::RPMSIGTAG_SHA1)
                .ok()
                .map(str::to_owned);
        }

        let offsets = pkg.get_package_segment_offsets();
        pkg_metadata.set_rpm_header_range(offsets.header, offsets.payload);

        Ok(pkg_metadata)
    }
}

fn convert_file_entry(entry: rpm::FileEntry) -> PackageFile {
    let filetype = if entry.flags.contains(rpm::FileFlags::GHOST) {
        FileType::Ghost
    } else {
        match entry.mode.file_type() {
            rpm::FileType::Dir => FileType::Dir,
            _ => FileType::File,
        }
    };
    PackageFile {
        filetype,
        path: entry.path.to_string_lossy().into_owned(),
    }
}

fn flags_to_str(flags: rpm::DependencyFlags) -> Option<&'static str> {
    if flags.contains(rpm::DependencyFlags::GE) {
        Some("GE")
    } else if flags.contains(rpm::DependencyFlags::LE) {
        Some("LE")
    } else if flags.contains(rpm::DependencyFlags::EQUAL) {
        Some("EQ")
    } else if flags.contains(rpm::DependencyFlags::LESS) {
        Some("LT")
    } else if flags.contains(rpm::DependencyFlags::GREATER) {
        Some("GT")
    } else {
        None
    }
}

fn is_pre_requirement(flags: rpm::DependencyFlags) -> bool {
    flags.intersects(
        rpm::DependencyFlags::SCRIPT_PRE
            | rpm::DependencyFlags::SCRIPT_POST
            | rpm::DependencyFlags::PREREQ,
    )
}

// A name+flags+version key, used to match requires against provides and to
// drop repeated entries.
fn dependency_key(dep: &rpm::Dependency) -> String {
    format!(
        "{}{}{}",
        dep.name,
        flags_to_str(dep.flags).unwrap_or(""),
        dep.version
    )
}

/// Convert one header dependency into a metadata requirement. Returns None
/// (with a warning) for entries whose version string carries a non-numeric
/// epoch.
fn convert_dependency(
    dep: &rpm::Dependency,
    pre: bool,
    pkg_nevra: &str,
) -> Option<Requirement> {
    let evr = EVR::parse(&dep.version);

    if !evr.epoch.is_empty() && !evr.epoch.bytes().all(|b| b.is_ascii_digit()) {
        warn!(
            "Bad epoch in version string \"{}\" for dependency \"{}\" in package \"{}\" - skipping this dependency",
            dep.version, dep.name, pkg_nevra
        );
        return None;
    }

    let epoch = if evr.epoch.is_empty() {
        if dep.version.is_empty() {
            None
        } else {
            Some("0".to_owned())
        }
    } else {
        Some(evr.epoch)
    };
    let version = if evr.version.is_empty() && dep.version.is_empty() {
        None
    } else {
        Some(evr.version)
    };
    let release = if evr.release.is_empty() {
        None
    } else {
        Some(evr.release)
    };

    Some(Requirement {
        name: dep.name.clone(),
        flags: flags_to_str(dep.flags).map(str::to_owned),
        epoch,
        version,
        release,
        preinstall: pre,
    })
}

fn convert_dependencies(
    deps: Vec<rpm::Dependency>,
    pkg_nevra: &str,
) -> Result<Vec<Requirement>, MetadataError> {
    Ok(deps
        .iter()
        .filter_map(|d| convert_dependency(d, false, pkg_nevra))
        .collect())
}

/// Normalize the requires list: drop rpmlib() pseudo-dependencies, entries
/// satisfied by the package's own primary files or its provides, and repeats.
/// Of all `libc.so.6*` entries only the one with the highest parenthesized
/// version is kept, at the end of the list.
fn filter_requires(
    requires: Vec<rpm::Dependency>,
    provides: &[rpm::Dependency],
    files: &[PackageFile],
    pkg_nevra: &str,
) -> Result<Vec<Requirement>, MetadataError> {
    let provided: HashSet<String> = provides.iter().map(dependency_key).collect();
    let file_paths: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

    // name -> (flags, version, pre) of requires already emitted
    let mut seen: HashMap<String, (Option<&'static str>, String, bool)> = HashMap::new();
    let mut libc_require_highest: Option<(rpm::Dependency, bool)> = None;
    let mut out = Vec::new();

    for dep in requires {
        if dep.name.starts_with("rpmlib(") {
            continue;
        }

        // Skip package primary files
        if dep.name.starts_with('/')
            && file_paths.contains(dep.name.as_str())
            && is_primary_path(&dep.name)
        {
            continue;
        }

        // Skip deps which are provided by the package itself
        if provided.contains(&dependency_key(&dep)) {
            continue;
        }

        let pre = is_pre_requirement(dep.flags);

        // Skip repeated entries
        if let Some((flags, version, prev_pre)) = seen.get(&dep.name) {
            if *flags == flags_to_str(dep.flags) && *version == dep.version && *prev_pre == pre {
                continue;
            }
        }

        if dep.name.starts_with("libc.so.6") {
            let replace = match &libc_require_highest {
                None => true,
                Some((current, _)) => libc_dependency_newer(&dep.name, &current.name),
            };
            if replace {
                libc_require_highest = Some((dep, pre));
            }
            continue;
        }

        seen.insert(
            dep.name.clone(),
            (flags_to_str(dep.flags), dep.version.clone(), pre),
        );
        if let Some(requirement) = convert_dependency(&dep, pre, pkg_nevra) {
            out.push(requirement);
        }
    }

    if let Some((dep, pre)) = libc_require_highest {
        if let Some(requirement) = convert_dependency(&dep, pre, pkg_nevra) {
            out.push(requirement);
        }
    }

    Ok(out)
}

// The version inside the first parenthesized group, from its first digit:
// "libc.so.6(GLIBC_2.3.4)(64bit)" -> "2.3.4"
fn parenthesized_version(name: &str) -> Option<&str> {
    let start = name.find('(')? + 1;
    let end = start + name[start..].find(')')?;
    let inner = &name[start..end];
    let digit = inner.find(|c: char| c.is_ascii_digit())?;
    Some(&inner[digit..])
}

fn libc_dependency_newer(candidate: &str, current: &str) -> bool {
    match (
        parenthesized_version(candidate),
        parenthesized_version(current),
    ) {
        (Some(a), Some(b)) => compare_version_string(a, b) == std::cmp::Ordering::Greater,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Sort changelogs oldest-first, apply the limit (keeping the newest
/// entries), and make colliding timestamps strictly increasing.
fn normalize_changelogs(changelogs: &mut Vec<Changelog>, limit: Option<usize>) -> Vec<Changelog> {
    changelogs.sort_by_key(|c| c.timestamp);

    let skip = match limit {
        Some(limit) if changelogs.len() > limit => changelogs.len() - limit,
        _ => 0,
    };
    let mut result: Vec<Changelog> = changelogs.split_off(skip);

    let mut last: Option<u64> = None;
    for entry in result.iter_mut() {
        if let Some(last) = last {
            if entry.timestamp <= last {
                entry.timestamp = last + 1;
            }
        }
        last = Some(entry.timestamp);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(name: &str) -> rpm::Dependency {
        rpm::Dependency::any(name)
    }

    #[test]
    fn test_convert_dependency_versions() {
        let requirement = convert_dependency(
            &rpm::Dependency::greater_eq("foo", "1.0.0-1"),
            false,
            "pkg",
        )
        .unwrap();
        assert_eq!(requirement.flags.as_deref(), Some("GE"));
        assert_eq!(requirement.epoch.as_deref(), Some("0"));
        assert_eq!(requirement.version.as_deref(), Some("1.0.0"));
        assert_eq!(requirement.release.as_deref(), Some("1"));

        let requirement =
            convert_dependency(&rpm::Dependency::eq("bar", "3:2.4"), false, "pkg").unwrap();
        assert_eq!(requirement.flags.as_deref(), Some("EQ"));
        assert_eq!(requirement.epoch.as_deref(), Some("3"));
        assert_eq!(requirement.version.as_deref(), Some("2.4"));
        assert_eq!(requirement.release, None);

        let unversioned = convert_dependency(&plain("baz"), true, "pkg").unwrap();
        assert_eq!(unversioned.flags, None);
        assert_eq!(unversioned.epoch, None);
        assert_eq!(unversioned.version, None);
        assert!(unversioned.preinstall);

        // non-numeric epoch drops the entry
        assert!(
            convert_dependency(&rpm::Dependency::eq("broken", "abc:1.0"), false, "pkg").is_none()
        );
    }

    #[test]
    fn test_filter_requires_drops_rpmlib_and_provided() {
        let provides = vec![rpm::Dependency::eq("mylib", "1.0-1")];
        let requires = vec![
            plain("rpmlib(CompressedFileNames)"),
            rpm::Dependency::eq("mylib", "1.0-1"),
            plain("other"),
        ];
        let result = filter_requires(requires, &provides, &[], "pkg").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "other");
    }

    #[test]
    fn test_filter_requires_drops_own_primary_files() {
        let files = vec![
            PackageFile {
                filetype: FileType::File,
                path: "/usr/bin/tool".to_owned(),
            },
            PackageFile {
                filetype: FileType::File,
                path: "/usr/share/doc/README".to_owned(),
            },
        ];
        let requires = vec![plain("/usr/bin/tool"), plain("/usr/share/doc/README")];
        let result = filter_requires(requires, &[], &files, "pkg").unwrap();
        // only the primary file reference is dropped
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "/usr/share/doc/README");
    }

    #[test]
    fn test_filter_requires_deduplicates() {
        let requires = vec![
            rpm::Dependency::greater_eq("dupe", "2.0"),
            rpm::Dependency::greater_eq("dupe", "2.0"),
            rpm::Dependency::greater_eq("dupe", "3.0"),
        ];
        let result = filter_requires(requires, &[], &[], "pkg").unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_filter_requires_keeps_highest_libc() {
        let requires = vec![
            plain("libc.so.6(GLIBC_2.3.4)(64bit)"),
            plain("libc.so.6()(64bit)"),
            plain("libc.so.6(GLIBC_2.28)(64bit)"),
            plain("libc.so.6(GLIBC_2.4)(64bit)"),
            plain("something-else"),
        ];
        let result = filter_requires(requires, &[], &[], "pkg").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].name, "something-else");
        // the libc entry lands at the end of the list
        assert_eq!(result[1].name, "libc.so.6(GLIBC_2.28)(64bit)");
    }

    #[test]
    fn test_parenthesized_version() {
        assert_eq!(
            parenthesized_version("libc.so.6(GLIBC_2.3.4)(64bit)"),
            Some("2.3.4")
        );
        assert_eq!(parenthesized_version("libc.so.6()(64bit)"), None);
        assert_eq!(parenthesized_version("libc.so.6"), None);
    }

    #[test]
    fn test_normalize_changelogs_collisions() {
        let mut changelogs = vec![
            Changelog {
                author: "a".into(),
                timestamp: 200,
                description: "two".into(),
            },
            Changelog {
                author: "a".into(),
                timestamp: 100,
                description: "one".into(),
            },
            Changelog {
                author: "a".into(),
                timestamp: 200,
                description: "three".into(),
            },
        ];
        let result = normalize_changelogs(&mut changelogs, None);
        let times: Vec<u64> = result.iter().map(|c| c.timestamp).collect();
        assert_eq!(times, vec![100, 200, 201]);
    }

    #[test]
    fn test_normalize_changelogs_limit_keeps_newest() {
        let mut changelogs = (1..=5u64)
            .map(|i| Changelog {
                author: "a".into(),
                timestamp: i * 100,
                description: format!("entry {}", i),
            })
            .collect::<Vec<_>>();
        let result = normalize_changelogs(&mut changelogs, Some(2));
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].timestamp, 400);
        assert_eq!(result[1].timestamp, 500);

        let mut changelogs = vec![Changelog {
            author: "a".into(),
            timestamp: 1,
            description: "only".into(),
        }];
        assert!(normalize_changelogs(&mut changelogs, Some(0)).is_empty());
    }
}
