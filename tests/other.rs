mod common;

use std::io::BufReader;

use pretty_assertions::assert_eq;
use quick_xml::{Reader, Writer};
use rpmrepo_gen::{OtherXml, Package};

fn write_doc(packages: &[&Package]) -> String {
    let mut writer = OtherXml::new_writer(Writer::new_with_indent(Vec::new(), b' ', 2));
    writer.write_header(packages.len()).unwrap();
    for package in packages {
        writer.write_package(package).unwrap();
    }
    writer.finish().unwrap();
    String::from_utf8(writer.into_inner()).unwrap()
}

fn parse_doc(doc: &str) -> Vec<Package> {
    let mut reader = Reader::from_reader(BufReader::new(doc.as_bytes()));
    reader.expand_empty_elements(true).trim_text(true);
    let mut reader = OtherXml::new_reader(reader);

    let count = reader.read_header().unwrap();
    let mut packages = Vec::new();
    loop {
        let mut package = None;
        reader.read_package(&mut package).unwrap();
        match package {
            Some(package) => packages.push(package),
            None => break,
        }
    }
    assert_eq!(count, packages.len());
    packages
}

#[test]
fn test_header_and_root_element() {
    let doc = write_doc(&[]);
    assert!(doc.contains("<otherdata xmlns=\"http://linux.duke.edu/metadata/other\" packages=\"0\">"));
    assert!(doc.ends_with("</otherdata>\n"));
}

#[test]
fn test_changelogs_in_stored_order() {
    let doc = write_doc(&[&common::COMPLEX_PACKAGE]);

    assert!(doc.contains(
        "<changelog author=\"Lucille Bluth &lt;lucille@bluthcompany.com&gt; - 1.1.1-1\" \
date=\"1617192000\">"
    ));

    let first = doc.find("date=\"1617192000\"").unwrap();
    let second = doc.find("date=\"1619352000\"").unwrap();
    let third = doc.find("date=\"1623672000\"").unwrap();
    assert!(first < second && second < third);
}

#[test]
fn test_changelog_dates_strictly_increasing() {
    let doc = write_doc(&[&common::COMPLEX_PACKAGE]);
    let parsed = parse_doc(&doc);

    let mut last = 0;
    for changelog in parsed[0].changelogs() {
        assert!(changelog.timestamp > last);
        last = changelog.timestamp;
    }
}

#[test]
fn test_write_parse_roundtrip() {
    let fixtures = common::complex_repo_fixture_data();
    let doc = write_doc(&fixtures);
    let parsed = parse_doc(&doc);

    assert_eq!(parsed.len(), fixtures.len());
    for (parsed, fixture) in parsed.iter().zip(fixtures) {
        assert_eq!(parsed.name(), fixture.name());
        assert_eq!(parsed.arch(), fixture.arch());
        assert_eq!(parsed.evr(), fixture.evr());
        assert_eq!(parsed.pkgid(), fixture.pkgid());
        assert_eq!(parsed.changelogs(), fixture.changelogs());
    }
}
