use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::filelist;
use crate::metadata::{
    Checksum, MetadataError, Package, PrimaryXml, Requirement, XML_NS_COMMON, XML_NS_RPM,
};
use crate::utils::{is_primary_path, read_element_text, sanitize_xml_str};
use crate::EVR;

const TAG_METADATA: &[u8] = b"metadata";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_NAME: &[u8] = b"name";
const TAG_VERSION: &[u8] = b"version";
const TAG_CHECKSUM: &[u8] = b"checksum";
const TAG_ARCH: &[u8] = b"arch";
const TAG_SUMMARY: &[u8] = b"summary";
const TAG_DESCRIPTION: &[u8] = b"description";
const TAG_PACKAGER: &[u8] = b"packager";
const TAG_URL: &[u8] = b"url";
const TAG_TIME: &[u8] = b"time";
const TAG_SIZE: &[u8] = b"size";
const TAG_LOCATION: &[u8] = b"location";
const TAG_FORMAT: &[u8] = b"format";

const TAG_RPM_LICENSE: &[u8] = b"rpm:license";
const TAG_RPM_VENDOR: &[u8] = b"rpm:vendor";
const TAG_RPM_GROUP: &[u8] = b"rpm:group";
const TAG_RPM_BUILDHOST: &[u8] = b"rpm:buildhost";
const TAG_RPM_SOURCERPM: &[u8] = b"rpm:sourcerpm";
const TAG_RPM_HEADER_RANGE: &[u8] = b"rpm:header-range";

const TAG_RPM_ENTRY: &[u8] = b"rpm:entry";
const TAG_RPM_PROVIDES: &[u8] = b"rpm:provides";
const TAG_RPM_REQUIRES: &[u8] = b"rpm:requires";
const TAG_RPM_CONFLICTS: &[u8] = b"rpm:conflicts";
const TAG_RPM_OBSOLETES: &[u8] = b"rpm:obsoletes";
const TAG_RPM_SUGGESTS: &[u8] = b"rpm:suggests";
const TAG_RPM_ENHANCES: &[u8] = b"rpm:enhances";
const TAG_RPM_RECOMMENDS: &[u8] = b"rpm:recommends";
const TAG_RPM_SUPPLEMENTS: &[u8] = b"rpm:supplements";
const TAG_FILE: &[u8] = b"file";

impl PrimaryXml {
    pub fn new_writer<W: Write>(writer: Writer<W>) -> PrimaryXmlWriter<W> {
        PrimaryXmlWriter { writer }
    }

    pub fn new_reader<R: BufRead>(reader: Reader<R>) -> PrimaryXmlReader<R> {
        PrimaryXmlReader { reader }
    }
}

pub struct PrimaryXmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> PrimaryXmlWriter<W> {
    pub fn write_header(&mut self, num_pkgs: usize) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="210">
        let mut metadata_tag = BytesStart::new("metadata");
        metadata_tag.push_attribute(("xmlns", XML_NS_COMMON));
        metadata_tag.push_attribute(("xmlns:rpm", XML_NS_RPM));
        metadata_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        self.writer.write_event(Event::Start(metadata_tag))?;

        Ok(())
    }

    pub fn write_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        write_package(&mut self.writer, package)
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // </metadata>
        self.writer
            .write_event(Event::End(BytesEnd::new("metadata")))?;

        // trailing newline
        self.writer.write_event(Event::Text(BytesText::new("\n")))?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Dump one package as a standalone primary.xml fragment, terminated by a
/// newline, suitable for concatenation inside the outer document.
pub(crate) fn dump_package_fragment(package: &Package) -> Result<String, MetadataError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_package(&mut writer, package)?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(String::from_utf8(bytes).map_err(|e| e.utf8_error())?)
}

pub fn write_package<W: Write>(
    writer: &mut Writer<W>,
    package: &Package,
) -> Result<(), MetadataError> {
    // <package type="rpm">
    let mut package_tag = BytesStart::new("package");
    package_tag.push_attribute(("type", "rpm"));
    writer.write_event(Event::Start(package_tag))?;

    // <name>horse</name>
    writer
        .create_element("name")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.name)))?;

    // <arch>noarch</arch>
    writer
        .create_element("arch")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.arch)))?;

    // <version epoch="0" ver="4.1" rel="1"/>
    let (epoch, version, release) = package.evr().values();
    writer
        .create_element("version")
        .with_attribute(("epoch", if epoch.is_empty() { "0" } else { epoch }))
        .with_attribute(("ver", version))
        .with_attribute(("rel", release))
        .write_empty()?;

    // <checksum type="sha256" pkgid="YES">6d0fd7f08cef63...</checksum>
    let (checksum_type, checksum_value) = package.checksum().to_values()?;
    writer
        .create_element("checksum")
        .with_attribute(("type", checksum_type))
        .with_attribute(("pkgid", "YES"))
        .write_text_content(BytesText::new(checksum_value))?;

    // <summary>A dummy package of horse</summary>
    writer
        .create_element("summary")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.summary)))?;

    // <description>A dummy package of horse</description>
    writer
        .create_element("description")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.description)))?;

    // <packager>Bojack Horseman</packager>
    writer
        .create_element("packager")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.packager)))?;

    // <url>http://arandomaddress.com</url>
    writer
        .create_element("url")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.url)))?;

    // <time file="1615451135" build="1331831374"/>
    writer
        .create_element("time")
        .with_attribute(("file", package.time_file.to_string().as_str()))
        .with_attribute(("build", package.time_build.to_string().as_str()))
        .write_empty()?;

    // <size package="1846" installed="42" archive="296"/>
    writer
        .create_element("size")
        .with_attribute(("package", package.size_package.to_string().as_str()))
        .with_attribute(("installed", package.size_installed.to_string().as_str()))
        .with_attribute(("archive", package.size_archive.to_string().as_str()))
        .write_empty()?;

    write_location_element(writer, package)?;

    // <format>
    writer.write_event(Event::Start(BytesStart::new("format")))?;

    // <rpm:license>GPLv2</rpm:license>
    writer
        .create_element("rpm:license")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.rpm_license)))?;

    // <rpm:vendor></rpm:vendor>
    writer
        .create_element("rpm:vendor")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.rpm_vendor)))?;

    // <rpm:group>Internet/Applications</rpm:group>
    writer
        .create_element("rpm:group")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.rpm_group)))?;

    // <rpm:buildhost>smqe-ws15</rpm:buildhost>
    writer
        .create_element("rpm:buildhost")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.rpm_buildhost)))?;

    // <rpm:sourcerpm>horse-4.1-1.src.rpm</rpm:sourcerpm>
    writer
        .create_element("rpm:sourcerpm")
        .write_text_content(BytesText::new(&sanitize_xml_str(&package.rpm_sourcerpm)))?;

    // <rpm:header-range start="280" end="1697"/>
    writer
        .create_element("rpm:header-range")
        .with_attribute(("start", package.rpm_header_range.start.to_string().as_str()))
        .with_attribute(("end", package.rpm_header_range.end.to_string().as_str()))
        .write_empty()?;

    write_requirement_section(writer, TAG_RPM_PROVIDES, package.provides())?;
    write_requirement_section(writer, TAG_RPM_REQUIRES, package.requires())?;
    write_requirement_section(writer, TAG_RPM_CONFLICTS, &package.rpm_conflicts)?;
    write_requirement_section(writer, TAG_RPM_OBSOLETES, &package.rpm_obsoletes)?;
    write_requirement_section(writer, TAG_RPM_SUGGESTS, &package.rpm_suggests)?;
    write_requirement_section(writer, TAG_RPM_ENHANCES, &package.rpm_enhances)?;
    write_requirement_section(writer, TAG_RPM_RECOMMENDS, &package.rpm_recommends)?;
    write_requirement_section(writer, TAG_RPM_SUPPLEMENTS, &package.rpm_supplements)?;

    // <file>/usr/bin/bash</file> - only "primary" files appear here
    package
        .files()
        .iter()
        .filter(|f| is_primary_path(&f.path))
        .try_for_each(|f| filelist::write_file_element(writer, f))?;

    // </format>
    writer.write_event(Event::End(BytesEnd::new("format")))?;

    // </package>
    writer.write_event(Event::End(BytesEnd::new("package")))?;

    Ok(())
}

// <location href="horse-4.1-1.noarch.rpm"/> with optional xml:base
fn write_location_element<W: Write>(
    writer: &mut Writer<W>,
    package: &Package,
) -> Result<(), MetadataError> {
    let element = writer.create_element("location");
    match package.location_base() {
        Some(base) => element
            .with_attribute(("xml:base", base))
            .with_attribute(("href", package.location_href()))
            .write_empty()?,
        None => element
            .with_attribute(("href", package.location_href()))
            .write_empty()?,
    };
    Ok(())
}

// <rpm:provides>
//   <rpm:entry name="horse" flags="EQ" epoch="0" ver="4.1" rel="1"/>
// </rpm:provides>
fn write_requirement_section<W: Write>(
    writer: &mut Writer<W>,
    section_name: &[u8],
    entry_list: &[Requirement],
) -> Result<(), MetadataError> {
    // skip writing empty sections
    if entry_list.is_empty() {
        return Ok(());
    }

    let section = std::str::from_utf8(section_name)?;
    writer.write_event(Event::Start(BytesStart::new(section)))?;

    for entry in entry_list {
        let mut entry_tag = BytesStart::new("rpm:entry");
        entry_tag.push_attribute(("name", entry.name.as_str()));

        if let Some(flags) = &entry.flags {
            entry_tag.push_attribute(("flags", flags.as_str()));
        }

        if let Some(epoch) = &entry.epoch {
            entry_tag.push_attribute(("epoch", epoch.as_str()));
        }

        if let Some(version) = &entry.version {
            entry_tag.push_attribute(("ver", version.as_str()));
        }

        if let Some(release) = &entry.release {
            entry_tag.push_attribute(("rel", release.as_str()));
        }

        if entry.preinstall {
            entry_tag.push_attribute(("pre", "1"));
        }
        writer.write_event(Event::Empty(entry_tag))?;
    }

    writer.write_event(Event::End(BytesEnd::new(section)))?;

    Ok(())
}

pub struct PrimaryXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> PrimaryXmlReader<R> {
    pub fn read_header(&mut self) -> Result<usize, MetadataError> {
        parse_header(&mut self.reader)
    }

    pub fn read_package(&mut self, package: &mut Option<Package>) -> Result<(), MetadataError> {
        parse_package(&mut self.reader, package)
    }
}

// <?xml version="1.0" encoding="UTF-8"?>
// <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="35">
fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name().as_ref() == TAG_METADATA => {
                let count = e
                    .try_get_attribute("packages")?
                    .ok_or(MetadataError::MissingAttributeError("packages"))?;
                return Ok(std::str::from_utf8(&count.value)?.parse()?);
            }
            _ => return Err(MetadataError::MissingHeaderError),
        }
        buf.clear();
    }
}

pub fn parse_package<R: BufRead>(
    reader: &mut Reader<R>,
    package: &mut Option<Package>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_PACKAGE => break,
            Event::Start(e) => match e.name().as_ref() {
                TAG_PACKAGE => {
                    let ptype = e
                        .try_get_attribute("type")?
                        .map(|a| a.unescape_value().map(|v| v.into_owned()))
                        .transpose()?
                        .unwrap_or_default();
                    if ptype != "rpm" {
                        return Err(MetadataError::InconsistentMetadataError(format!(
                            "package type \"{}\" is not \"rpm\"",
                            ptype
                        )));
                    }

                    if package.is_none() {
                        *package = Some(Package::default());
                    }
                }
                TAG_NAME => {
                    let name = read_element_text(reader, TAG_NAME)?;
                    get_mut(package)?.set_name(name);
                }
                TAG_VERSION => {
                    get_mut(package)?.set_evr(parse_evr_attrs(&e)?);
                }
                TAG_CHECKSUM => {
                    let checksum_type = e
                        .try_get_attribute("type")?
                        .ok_or(MetadataError::MissingAttributeError("type"))?
                        .unescape_value()?
                        .into_owned();
                    let checksum_value = read_element_text(reader, TAG_CHECKSUM)?;
                    get_mut(package)?
                        .set_checksum(Checksum::try_create(checksum_type, checksum_value)?);
                }
                TAG_ARCH => {
                    let arch = read_element_text(reader, TAG_ARCH)?;
                    get_mut(package)?.set_arch(arch);
                }
                TAG_SUMMARY => {
                    let summary = read_element_text(reader, TAG_SUMMARY)?;
                    get_mut(package)?.set_summary(summary);
                }
                TAG_DESCRIPTION => {
                    let description = read_element_text(reader, TAG_DESCRIPTION)?;
                    get_mut(package)?.set_description(description);
                }
                TAG_PACKAGER => {
                    let packager = read_element_text(reader, TAG_PACKAGER)?;
                    get_mut(package)?.set_packager(packager);
                }
                TAG_URL => {
                    let url = read_element_text(reader, TAG_URL)?;
                    get_mut(package)?.set_url(url);
                }
                TAG_TIME => {
                    let file = e
                        .try_get_attribute("file")?
                        .ok_or(MetadataError::MissingAttributeError("file"))?
                        .unescape_value()?
                        .parse()?;
                    let build = e
                        .try_get_attribute("build")?
                        .ok_or(MetadataError::MissingAttributeError("build"))?
                        .unescape_value()?
                        .parse()?;
                    get_mut(package)?.set_time(file, build);
                }
                TAG_SIZE => {
                    let size_package = e
                        .try_get_attribute("package")?
                        .ok_or(MetadataError::MissingAttributeError("package"))?
                        .unescape_value()?
                        .parse()?;
                    let size_installed = e
                        .try_get_attribute("installed")?
                        .ok_or(MetadataError::MissingAttributeError("installed"))?
                        .unescape_value()?
                        .parse()?;
                    let size_archive = e
                        .try_get_attribute("archive")?
                        .ok_or(MetadataError::MissingAttributeError("archive"))?
                        .unescape_value()?
                        .parse()?;
                    get_mut(package)?.set_size(size_package, size_installed, size_archive);
                }
                TAG_LOCATION => {
                    let href = e
                        .try_get_attribute("href")?
                        .ok_or(MetadataError::MissingAttributeError("href"))?
                        .unescape_value()?
                        .into_owned();
                    let base = e
                        .try_get_attribute("xml:base")?
                        .map(|a| a.unescape_value().map(|v| v.into_owned()))
                        .transpose()?;
                    let pkg = get_mut(package)?;
                    pkg.set_location_href(href);
                    if base.is_some() {
                        pkg.set_location_base(base);
                    }
                }
                TAG_FORMAT => parse_format(reader, package)?,
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_format<R: BufRead>(
    reader: &mut Reader<R>,
    package: &mut Option<Package>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_FORMAT => break,
            Event::Start(e) => match e.name().as_ref() {
                TAG_RPM_LICENSE => {
                    let license = read_element_text(reader, TAG_RPM_LICENSE)?;
                    get_mut(package)?.set_rpm_license(license);
                }
                TAG_RPM_VENDOR => {
                    let vendor = read_element_text(reader, TAG_RPM_VENDOR)?;
                    get_mut(package)?.set_rpm_vendor(vendor);
                }
                TAG_RPM_GROUP => {
                    let group = read_element_text(reader, TAG_RPM_GROUP)?;
                    get_mut(package)?.set_rpm_group(group);
                }
                TAG_RPM_BUILDHOST => {
                    let buildhost = read_element_text(reader, TAG_RPM_BUILDHOST)?;
                    get_mut(package)?.set_rpm_buildhost(buildhost);
                }
                TAG_RPM_SOURCERPM => {
                    let sourcerpm = read_element_text(reader, TAG_RPM_SOURCERPM)?;
                    get_mut(package)?.set_rpm_sourcerpm(sourcerpm);
                }
                TAG_RPM_HEADER_RANGE => {
                    let start = e
                        .try_get_attribute("start")?
                        .ok_or(MetadataError::MissingAttributeError("start"))?
                        .unescape_value()?
                        .parse()?;
                    let end = e
                        .try_get_attribute("end")?
                        .ok_or(MetadataError::MissingAttributeError("end"))?
                        .unescape_value()?
                        .parse()?;
                    get_mut(package)?.set_rpm_header_range(start, end);
                }
                TAG_RPM_PROVIDES => {
                    let list = parse_requirement_list(reader, TAG_RPM_PROVIDES)?;
                    get_mut(package)?.set_provides(list);
                }
                TAG_RPM_REQUIRES => {
                    let list = parse_requirement_list(reader, TAG_RPM_REQUIRES)?;
                    get_mut(package)?.set_requires(list);
                }
                TAG_RPM_CONFLICTS => {
                    let list = parse_requirement_list(reader, TAG_RPM_CONFLICTS)?;
                    get_mut(package)?.set_conflicts(list);
                }
                TAG_RPM_OBSOLETES => {
                    let list = parse_requirement_list(reader, TAG_RPM_OBSOLETES)?;
                    get_mut(package)?.set_obsoletes(list);
                }
                TAG_RPM_SUGGESTS => {
                    let list = parse_requirement_list(reader, TAG_RPM_SUGGESTS)?;
                    get_mut(package)?.set_suggests(list);
                }
                TAG_RPM_ENHANCES => {
                    let list = parse_requirement_list(reader, TAG_RPM_ENHANCES)?;
                    get_mut(package)?.set_enhances(list);
                }
                TAG_RPM_RECOMMENDS => {
                    let list = parse_requirement_list(reader, TAG_RPM_RECOMMENDS)?;
                    get_mut(package)?.set_recommends(list);
                }
                TAG_RPM_SUPPLEMENTS => {
                    let list = parse_requirement_list(reader, TAG_RPM_SUPPLEMENTS)?;
                    get_mut(package)?.set_supplements(list);
                }
                // primary carries only the "primary" subset of files; the
                // authoritative list comes from filelists
                TAG_FILE => {
                    read_element_text(reader, TAG_FILE)?;
                }
                _ => (),
            },
            Event::Eof => {
                return Err(MetadataError::InconsistentMetadataError(
                    "unclosed <format> element".to_owned(),
                ));
            }
            _ => (),
        }
        buf.clear();
    }
    Ok(())
}

// <version epoch="0" ver="4.1" rel="1"/>
fn parse_evr_attrs(open_tag: &BytesStart) -> Result<EVR, MetadataError> {
    // epoch is always present on the wire, but an empty value means zero
    let epoch = match open_tag.try_get_attribute("epoch")? {
        Some(a) => {
            let value = a.unescape_value()?;
            if value.is_empty() {
                "0".to_owned()
            } else {
                value.into_owned()
            }
        }
        None => "0".to_owned(),
    };
    let version = open_tag
        .try_get_attribute("ver")?
        .ok_or(MetadataError::MissingAttributeError("ver"))?
        .unescape_value()?
        .into_owned();
    let release = open_tag
        .try_get_attribute("rel")?
        .ok_or(MetadataError::MissingAttributeError("rel"))?
        .unescape_value()?
        .into_owned();

    Ok(EVR::new(epoch, version, release))
}

pub(crate) fn parse_requirement_list<R: BufRead>(
    reader: &mut Reader<R>,
    section_tag: &[u8],
) -> Result<Vec<Requirement>, MetadataError> {
    let mut list = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == TAG_RPM_ENTRY => {
                let mut requirement = Requirement::default();
                let mut name_found = false;

                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"name" => {
                            requirement.name = attr.unescape_value()?.into_owned();
                            name_found = true;
                        }
                        b"flags" => requirement.flags = Some(attr.unescape_value()?.into_owned()),
                        b"epoch" => requirement.epoch = Some(attr.unescape_value()?.into_owned()),
                        b"ver" => requirement.version = Some(attr.unescape_value()?.into_owned()),
                        b"rel" => requirement.release = Some(attr.unescape_value()?.into_owned()),
                        b"pre" => {
                            let value = attr.unescape_value()?;
                            requirement.preinstall =
                                value != "0" && !value.eq_ignore_ascii_case("false");
                        }
                        _ => (),
                    }
                }

                if !name_found {
                    return Err(MetadataError::MissingAttributeError("name"));
                }

                list.push(requirement);
            }
            Event::End(e) if e.name().as_ref() == section_tag => break,
            Event::Eof => {
                return Err(MetadataError::InconsistentMetadataError(
                    "unclosed dependency section".to_owned(),
                ));
            }
            _ => (),
        }
        buf.clear();
    }

    Ok(list)
}

fn get_mut(package: &mut Option<Package>) -> Result<&mut Package, MetadataError> {
    package.as_mut().ok_or_else(|| {
        MetadataError::InconsistentMetadataError(
            "package field encountered outside of a <package> element".to_owned(),
        )
    })
}
