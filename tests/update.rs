mod common;

use pretty_assertions::assert_eq;
use quick_xml::Writer;
use rpmrepo_gen::{
    FilelistsXml, OldMetadataCache, OtherXml, Package, PrimaryXml, RepositoryWriter,
};

fn write_fixture_repo(dir: &std::path::Path) {
    let fixtures = common::complex_repo_fixture_data();
    let mut writer = RepositoryWriter::new(dir, fixtures.len()).unwrap();
    for package in fixtures {
        writer.add_package(package).unwrap();
    }
    writer.finish().unwrap();
}

fn primary_doc(package: &Package) -> String {
    let mut writer = PrimaryXml::new_writer(Writer::new_with_indent(Vec::new(), b' ', 2));
    writer.write_package(package).unwrap();
    String::from_utf8(writer.into_inner()).unwrap()
}

fn filelists_doc(package: &Package) -> String {
    let mut writer = FilelistsXml::new_writer(Writer::new_with_indent(Vec::new(), b' ', 2));
    writer.write_package(package).unwrap();
    String::from_utf8(writer.into_inner()).unwrap()
}

fn other_doc(package: &Package) -> String {
    let mut writer = OtherXml::new_writer(Writer::new_with_indent(Vec::new(), b' ', 2));
    writer.write_package(package).unwrap();
    String::from_utf8(writer.into_inner()).unwrap()
}

#[test]
fn test_load_and_steal() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_repo(dir.path());

    let cache = OldMetadataCache::new();
    let count = cache.load_repodata(dir.path()).unwrap();
    assert_eq!(count, 4);
    assert_eq!(cache.len(), 4);

    let stolen = cache.steal("complex-package-2.3.4-5.el8.x86_64.rpm");
    assert!(stolen.is_some());
    // the entry was removed at lookup time, a second steal misses
    assert!(cache.steal("complex-package-2.3.4-5.el8.x86_64.rpm").is_none());
    assert_eq!(cache.len(), 3);
}

// A rehydrated package serializes to the same bytes as the package it was
// generated from.
#[test]
fn test_cached_package_roundtrips_to_identical_xml() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_repo(dir.path());

    let cache = OldMetadataCache::new();
    cache.load_repodata(dir.path()).unwrap();

    for fixture in common::complex_repo_fixture_data() {
        let cached = cache
            .steal(rpmrepo_gen::utils::cache_key(fixture.location_href()))
            .unwrap();
        assert_eq!(primary_doc(&cached), primary_doc(fixture));
        assert_eq!(filelists_doc(&cached), filelists_doc(fixture));
        assert_eq!(other_doc(&cached), other_doc(fixture));
    }
}

// After a location rewrite, the primary serialization differs only in its
// <location/> element; filelists and other are untouched.
#[test]
fn test_location_rewrite_changes_only_location_element() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_repo(dir.path());

    let cache = OldMetadataCache::new();
    cache.load_repodata(dir.path()).unwrap();

    let fixture = &*common::COMPLEX_PACKAGE;
    let mut cached = cache
        .steal(rpmrepo_gen::utils::cache_key(fixture.location_href()))
        .unwrap();

    let primary_before = primary_doc(&cached);
    let filelists_before = filelists_doc(&cached);
    let other_before = other_doc(&cached);

    cached.set_location_href(format!("subdir/{}", fixture.location_href()));

    let primary_after = primary_doc(&cached);
    assert_ne!(primary_before, primary_after);

    let differing: Vec<(&str, &str)> = primary_before
        .lines()
        .zip(primary_after.lines())
        .filter(|(before, after)| before != after)
        .collect();
    assert_eq!(differing.len(), 1);
    assert!(differing[0].0.contains("<location"));
    assert!(differing[0].1.contains("<location href=\"subdir/complex-package-2.3.4-5.el8.x86_64.rpm\"/>"));

    assert_eq!(filelists_before, filelists_doc(&cached));
    assert_eq!(other_before, other_doc(&cached));
}

// Rewriting the base URL also only affects the location element.
#[test]
fn test_location_base_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_repo(dir.path());

    let cache = OldMetadataCache::new();
    cache.load_repodata(dir.path()).unwrap();

    let fixture = &*common::RPM_EMPTY;
    let mut cached = cache
        .steal(rpmrepo_gen::utils::cache_key(fixture.location_href()))
        .unwrap();

    let primary_before = primary_doc(&cached);
    cached.set_location_base(Some("http://mirror.example.com/el8"));
    let primary_after = primary_doc(&cached);

    let differing: Vec<(&str, &str)> = primary_before
        .lines()
        .zip(primary_after.lines())
        .filter(|(before, after)| before != after)
        .collect();
    assert_eq!(differing.len(), 1);
    assert!(differing[0].1.contains("xml:base=\"http://mirror.example.com/el8\""));
}
