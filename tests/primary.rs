mod common;

use std::io::BufReader;

use pretty_assertions::assert_eq;
use quick_xml::{Reader, Writer};
use rpmrepo_gen::{Package, PrimaryXml};

fn write_doc(packages: &[&Package]) -> String {
    let mut writer = PrimaryXml::new_writer(Writer::new_with_indent(Vec::new(), b' ', 2));
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
    let mut reader = PrimaryXml::new_reader(reader);

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
    assert!(doc.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(doc.contains("xmlns=\"http://linux.duke.edu/metadata/common\""));
    assert!(doc.contains("xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\""));
    assert!(doc.contains("packages=\"0\""));
    assert!(doc.ends_with("</metadata>\n"));
}

#[test]
fn test_complex_package_fields() {
    let doc = write_doc(&[&common::COMPLEX_PACKAGE]);

    assert!(doc.contains("<package type=\"rpm\">"));
    assert!(doc.contains("<name>complex-package</name>"));
    assert!(doc.contains("<version epoch=\"1\" ver=\"2.3.4\" rel=\"5.el8\"/>"));
    assert!(doc.contains(
        "<checksum type=\"sha256\" pkgid=\"YES\">\
bbb7b0e9350a0f75b923bdd0ef4f9af39765c668a3e70bfd3486ea9f0f618aaf</checksum>"
    ));
    assert!(doc.contains("<location href=\"complex-package-2.3.4-5.el8.x86_64.rpm\"/>"));
    assert!(doc.contains("<time file=\"1627052744\" build=\"1627052743\"/>"));
    assert!(doc.contains("<size package=\"8680\" installed=\"117\" archive=\"932\"/>"));
    assert!(doc.contains("<rpm:header-range start=\"4504\" end=\"8413\"/>"));

    // dependency sections, including a pre-install requirement
    assert!(doc.contains("<rpm:entry name=\"/usr/sbin/useradd\" pre=\"1\"/>"));
    assert!(doc.contains(
        "<rpm:entry name=\"arson\" flags=\"GE\" epoch=\"0\" ver=\"1.0.0\" rel=\"1\"/>"
    ));

    // provides must come before requires, requires before conflicts/obsoletes
    let provides = doc.find("<rpm:provides>").unwrap();
    let requires = doc.find("<rpm:requires>").unwrap();
    let conflicts = doc.find("<rpm:conflicts>").unwrap();
    let obsoletes = doc.find("<rpm:obsoletes>").unwrap();
    assert!(provides < requires && requires < conflicts && conflicts < obsoletes);
}

#[test]
fn test_only_primary_files_are_emitted() {
    let doc = write_doc(&[&common::COMPLEX_PACKAGE]);

    assert!(doc.contains("<file>/etc/complex/pkg.cfg</file>"));
    assert!(doc.contains("<file>/usr/bin/complex_a</file>"));
    // not bin/, not /etc/ -> filelists only
    assert!(!doc.contains("/usr/share/doc/complex-package/README"));
    assert!(!doc.contains("/var/log/complex.log"));
}

#[test]
fn test_illegal_characters_are_escaped() {
    let doc = write_doc(&[&common::RPM_WITH_INVALID_CHARS]);
    assert!(doc.contains("ampersand &amp; and less-than &lt; greater-than &gt;"));
    assert!(doc.contains("&lt;/description&gt;"));
}

#[test]
fn test_location_base_attribute() {
    let mut package = common::RPM_EMPTY.clone();
    package.set_location_base(Some("http://mirror.example.com/el8"));
    let doc = write_doc(&[&package]);
    assert!(doc.contains(
        "<location xml:base=\"http://mirror.example.com/el8\" href=\"rpm-empty-0-0.x86_64.rpm\"/>"
    ));
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
        assert_eq!(parsed.checksum(), fixture.checksum());
        assert_eq!(parsed.summary, fixture.summary);
        assert_eq!(parsed.description, fixture.description);
        assert_eq!(parsed.location_href(), fixture.location_href());
        assert_eq!(parsed.time_file, fixture.time_file);
        assert_eq!(parsed.time_build, fixture.time_build);
        assert_eq!(parsed.size_package, fixture.size_package);
        assert_eq!(parsed.size_installed, fixture.size_installed);
        assert_eq!(parsed.size_archive, fixture.size_archive);
        assert_eq!(parsed.rpm_header_range(), fixture.rpm_header_range());
        assert_eq!(parsed.provides(), fixture.provides());
        assert_eq!(parsed.requires(), fixture.requires());
        assert_eq!(parsed.rpm_conflicts, fixture.rpm_conflicts);
        assert_eq!(parsed.rpm_obsoletes, fixture.rpm_obsoletes);
        assert_eq!(parsed.rpm_suggests, fixture.rpm_suggests);
        assert_eq!(parsed.rpm_enhances, fixture.rpm_enhances);
        assert_eq!(parsed.rpm_recommends, fixture.rpm_recommends);
        assert_eq!(parsed.rpm_supplements, fixture.rpm_supplements);
    }
}
