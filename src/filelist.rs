use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{
    Checksum, FileType, FilelistsXml, MetadataError, Package, PackageFile, XML_NS_FILELISTS,
};
use crate::utils::{read_element_text, sanitize_xml_str};
use crate::EVR;

const TAG_FILELISTS: &[u8] = b"filelists";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_VERSION: &[u8] = b"version";
const TAG_FILE: &[u8] = b"file";

impl FilelistsXml {
    pub fn new_writer<W: Write>(writer: Writer<W>) -> FilelistsXmlWriter<W> {
        FilelistsXmlWriter { writer }
    }

    pub fn new_reader<R: BufRead>(reader: Reader<R>) -> FilelistsXmlReader<R> {
        FilelistsXmlReader { reader }
    }
}

pub struct FilelistsXmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> FilelistsXmlWriter<W> {
    pub fn write_header(&mut self, num_pkgs: usize) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <filelists xmlns="http://linux.duke.edu/metadata/filelists" packages="210">
        let mut filelists_tag = BytesStart::new("filelists");
        filelists_tag.push_attribute(("xmlns", XML_NS_FILELISTS));
        filelists_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        self.writer.write_event(Event::Start(filelists_tag))?;

        Ok(())
    }

    pub fn write_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        write_package(&mut self.writer, package)
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // </filelists>
        self.writer
            .write_event(Event::End(BytesEnd::new("filelists")))?;

        // trailing newline
        self.writer.write_event(Event::Text(BytesText::new("\n")))?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Dump one package as a standalone filelists.xml fragment, terminated by a
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
    // <package pkgid="a2d3bce512f79b0bc840ca7912a86bbc0016cf06d5c363ffbb6fd5e1ef03de1b" name="fontconfig" arch="x86_64">
    let (_, pkgid) = package.checksum().to_values()?;
    let mut package_tag = BytesStart::new("package");
    package_tag.push_attribute(("pkgid", pkgid));
    package_tag.push_attribute(("name", package.name()));
    package_tag.push_attribute(("arch", package.arch()));
    writer.write_event(Event::Start(package_tag))?;

    // <version epoch="0" ver="2.8.0" rel="5.fc33"/>
    let (epoch, version, release) = package.evr().values();
    writer
        .create_element("version")
        .with_attribute(("epoch", if epoch.is_empty() { "0" } else { epoch }))
        .with_attribute(("ver", version))
        .with_attribute(("rel", release))
        .write_empty()?;

    // <file type="dir">/etc/fonts/conf.avail</file>
    package
        .files()
        .iter()
        .try_for_each(|f| write_file_element(writer, f))?;

    // </package>
    writer.write_event(Event::End(BytesEnd::new("package")))?;

    Ok(())
}

pub(crate) fn write_file_element<W: Write>(
    writer: &mut Writer<W>,
    file: &PackageFile,
) -> Result<(), MetadataError> {
    let element = writer.create_element("file");
    let path = sanitize_xml_str(&file.path);
    // plain files omit the type attribute
    if file.filetype == FileType::File {
        element.write_text_content(BytesText::new(&path))?;
    } else {
        let filetype = std::str::from_utf8(file.filetype.to_values())?;
        element
            .with_attribute(("type", filetype))
            .write_text_content(BytesText::new(&path))?;
    }
    Ok(())
}

pub struct FilelistsXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> FilelistsXmlReader<R> {
    pub fn read_header(&mut self) -> Result<usize, MetadataError> {
        parse_header(&mut self.reader)
    }

    pub fn read_package(&mut self, package: &mut Option<Package>) -> Result<(), MetadataError> {
        parse_package(package, &mut self.reader)
    }
}

// <?xml version="1.0" encoding="UTF-8"?>
// <filelists xmlns="http://linux.duke.edu/metadata/filelists" packages="35">
fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name().as_ref() == TAG_FILELISTS => {
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

//   <package pkgid="a2d3bce512f79b0bc840ca7912a86bbc0016cf06d5c363ffbb6fd5e1ef03de1b" name="fontconfig" arch="x86_64">
//     <version epoch="0" ver="2.8.0" rel="5.fc33"/>
//     <file type="dir">/etc/fonts/conf.avail</file>
//     ...
//     <file>/etc/fonts/conf.avail/10-autohint.conf</file>
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
                                    "filelists package {} does not match primary package {}",
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
                TAG_FILE => {
                    let filetype = match e.try_get_attribute("type")? {
                        Some(a) => FileType::try_create(a.value.as_ref())?,
                        None => FileType::File,
                    };
                    let path = read_element_text(reader, TAG_FILE)?;
                    get_mut(package)?.add_file(filetype, &path);
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

// <version epoch="0" ver="2.8.0" rel="5.fc33"/>
pub(crate) fn parse_evr_attrs(open_tag: &BytesStart) -> Result<EVR, MetadataError> {
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

fn get_mut(package: &mut Option<Package>) -> Result<&mut Package, MetadataError> {
    package.as_mut().ok_or_else(|| {
        MetadataError::InconsistentMetadataError(
            "package field encountered outside of a <package> element".to_owned(),
        )
    })
}
