use std::io::{BufRead, Write};

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::filelist::parse_evr_attrs;
use crate::metadata::{Changelog, Checksum, MetadataError, OtherXml, Package, XML_NS_OTHER};
use crate::utils::{read_element_text, sanitize_xml_str};

const TAG_OTHERDATA: &[u8] = b"otherdata";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_VERSION: &[u8] = b"version";
const TAG_CHANGELOG: &[u8] = b"changelog";

impl OtherXml {
    pub fn new_writer<W: Write>(writer: Writer<W>) -> OtherXmlWriter<W> {
        OtherXmlWriter { writer }
    }

    pub fn new_reader<R: BufRead>(reader: Reader<R>) -> OtherXmlReader<R> {
        OtherXmlReader { reader }
    }
}

pub struct OtherXmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> OtherXmlWriter<W> {
    pub fn write_header(&mut self, num_pkgs: usize) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <otherdata xmlns="http://linux.duke.edu/metadata/other" packages="200">
        let mut other_tag = BytesStart::new("otherdata");
        other_tag.push_attribute(("xmlns", XML_NS_OTHER));
        other_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        self.writer.write_event(Event::Start(other_tag))?;

        Ok(())
    }

    pub fn write_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        write_package(&mut self.writer, package)
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // </otherdata>
        self.writer
            .write_event(Event::End(BytesEnd::new("otherdata")))?;

        // trailing newline
        self.writer.write_event(Event::Text(BytesText::new("\n")))?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Dump one package as a standalone other.xml fragment, terminated by a
/// newline.
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
    // <package pkgid="6a915b6e1ad740994aa9688d70a67ff2b6b72e0ced668794aeb27b2d0f2e237b" name="fontconfig" arch="x86_64">
    let (_, pkgid) = package.checksum().to_values()?;
    let mut package_tag = BytesStart::new("package");
    package_tag.push_attribute(("pkgid", pkgid));
    package_tag.push_attribute(("name", package.name()));
    package_tag.push_attribute(("arch", package.arch()));
    writer.write_event(Event::Start(package_tag))?;

    // <version epoch="0" ver="2.8.0" rel="5.el6"/>
    let (epoch, version, release) = package.evr().values();
    writer
        .create_element("version")
        .with_attribute(("epoch", if epoch.is_empty() { "0" } else { epoch }))
        .with_attribute(("ver", version))
        .with_attribute(("rel", release))
        .write_empty()?;

    // <changelog author="dalley &lt;dalley@redhat.com&gt; - 2.7.2-1" date="1251720000">- Update to 2.7.2</changelog>
    for changelog in package.changelogs() {
        let description = sanitize_xml_str(&changelog.description);
        writer
            .create_element("changelog")
            .with_attribute(("author", sanitize_xml_str(&changelog.author).as_ref()))
            .with_attribute(("date", changelog.timestamp.to_string().as_str()))
            .write_text_content(BytesText::from_escaped(partial_escape(&description)))?;
    }

    // </package>
    writer.write_event(Event::End(BytesEnd::new("package")))?;

    Ok(())
}

pub struct OtherXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> OtherXmlReader<R> {
    pub fn read_header(&mut self) -> Result<usize, MetadataError> {
        parse_header(&mut self.reader)
    }

    pub fn read_package(&mut self, package: &mut Option<Package>) -> Result<(), MetadataError> {
        parse_package(package, &mut self.reader)
    }
}

// <?xml version="1.0" encoding="UTF-8"?>
// <otherdata xmlns="http://linux.duke.edu/metadata/other" packages="35">
fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name().as_ref() == TAG_OTHERDATA => {
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

//   <package pkgid="6a915b6e1ad740994aa9688d70a67ff2b6b72e0ced668794aeb27b2d0f2e237b" name="fontconfig" arch="x86_64">
//     <version epoch="0" ver="2.8.0" rel="5.el6"/>
//     <changelog author="Behdad Esfahbod &lt;besfahbo@redhat.com&gt; - 2.7.3-1" date="1252411200">- Update to 2.7.3</changelog>
//   </package>
pub fn parse_package<R: BufRead>(
    package: &mut Option<Package>,
    reader: &mut Reader<R>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_PACKAGE => break,
            Event::Start(e) => match e.name().as_ref() {
                TAG_PACKAGE => {
                    let pkgid = e
                        .try_get_attribute("pkgid")?
                        .ok_or(MetadataError::MissingAttributeError("pkgid"))?
                        .unescape_value()?
                        .into_owned();
                    let name = e
                        .try_get_attribute("name")?
                        .ok_or(MetadataError::MissingAttributeError("name"))?
                        .unescape_value()?
                        .into_owned();
                    let arch = e
                        .try_get_attribute("arch")?
                        .ok_or(MetadataError::MissingAttributeError("arch"))?
                        .unescape_value()?
                        .into_owned();

                    match package {
                        Some(pkg) => {
                            if pkg.pkgid() != pkgid {
                                return Err(MetadataError::InconsistentMetadataError(format!(
                                    "other package {} does not match primary package {}",
                                    pkgid,
                                    pkg.pkgid()
                                )));
                            }
                        }
                        None => {
                            let mut pkg = Package::default();
                            pkg.set_name(name)
                                .set_arch(arch)
                                .set_checksum(Checksum::Unknown(pkgid));
                            *package = Some(pkg);
                        }
                    }
                }
                TAG_VERSION => {
                    let evr = parse_evr_attrs(&e)?;
                    get_mut(package)?.set_evr(evr);
                }
                TAG_CHANGELOG => {
                    let changelog = parse_changelog(reader, &e)?;
                    get_mut(package)?.rpm_changelogs.push(changelog);
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_changelog<R: BufRead>(
    reader: &mut Reader<R>,
    open_tag: &BytesStart,
) -> Result<Changelog, MetadataError> {
    let author = open_tag
        .try_get_attribute("author")?
        .ok_or(MetadataError::MissingAttributeError("author"))?
        .unescape_value()?
        .into_owned();
    let timestamp = open_tag
        .try_get_attribute("date")?
        .ok_or(MetadataError::MissingAttributeError("date"))?
        .unescape_value()?
        .parse()?;
    let description = read_element_text(reader, TAG_CHANGELOG)?;

    Ok(Changelog {
        author,
        timestamp,
        description,
    })
}

fn get_mut(package: &mut Option<Package>) -> Result<&mut Package, MetadataError> {
    package.as_mut().ok_or_else(|| {
        MetadataError::InconsistentMetadataError(
            "package field encountered outside of a <package> element".to_owned(),
        )
    })
}
