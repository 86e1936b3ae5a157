use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{
    Checksum, MetadataError, RepomdData, RepomdRecord, RepomdXml, XML_NS_REPO, XML_NS_RPM,
};
use crate::utils::read_element_text;

const TAG_REPOMD: &[u8] = b"repomd";
const TAG_REVISION: &[u8] = b"revision";
const TAG_REPOID: &[u8] = b"repoid";
const TAG_CONTENTHASH: &[u8] = b"contenthash";
const TAG_TAGS: &[u8] = b"tags";
const TAG_DATA: &[u8] = b"data";
// Tags
const TAG_REPO: &[u8] = b"repo";
const TAG_CONTENT: &[u8] = b"content";
const TAG_DISTRO: &[u8] = b"distro";
// RepomdRecord
const TAG_LOCATION: &[u8] = b"location";
const TAG_CHECKSUM: &[u8] = b"checksum";
const TAG_OPEN_CHECKSUM: &[u8] = b"open-checksum";
const TAG_HEADER_CHECKSUM: &[u8] = b"header-checksum";
const TAG_TIMESTAMP: &[u8] = b"timestamp";
const TAG_SIZE: &[u8] = b"size";
const TAG_OPEN_SIZE: &[u8] = b"open-size";
const TAG_HEADER_SIZE: &[u8] = b"header-size";
const TAG_DATABASE_VERSION: &[u8] = b"database_version";

impl RepomdXml {
    pub fn write_data<W: Write>(
        repomd_data: &RepomdData,
        writer: &mut Writer<W>,
    ) -> Result<(), MetadataError> {
        write_repomd_xml(repomd_data, writer)
    }

    pub fn read_data<R: BufRead>(reader: Reader<R>) -> Result<RepomdData, MetadataError> {
        let mut repomd = RepomdData::default();
        read_repomd_xml(&mut repomd, reader)?;
        Ok(repomd)
    }
}

#[derive(Debug, PartialEq, Default)]
struct RepomdRecordBuilder {
    metadata_name: String,
    location_href: Option<PathBuf>,
    location_base: Option<String>,
    timestamp: Option<i64>,
    size: Option<u64>,
    checksum: Option<Checksum>,
    open_size: Option<i64>,
    open_checksum: Option<Checksum>,
    header_size: Option<u64>,
    header_checksum: Option<Checksum>,
    database_version: Option<u32>,
}

impl TryFrom<RepomdRecordBuilder> for RepomdRecord {
    type Error = MetadataError;

    fn try_from(builder: RepomdRecordBuilder) -> Result<Self, Self::Error> {
        let mut record = RepomdRecord::default();
        record.metadata_name = builder.metadata_name;
        record.location_href = builder
            .location_href
            .ok_or(MetadataError::MissingFieldError("location_href"))?;
        record.location_base = builder.location_base;
        record.timestamp = builder
            .timestamp
            .ok_or(MetadataError::MissingFieldError("timestamp"))?;
        record.size = builder.size;
        record.checksum = builder
            .checksum
            .ok_or(MetadataError::MissingFieldError("checksum"))?;
        record.open_size = builder.open_size;
        record.open_checksum = builder.open_checksum;
        record.header_size = builder.header_size;
        record.header_checksum = builder.header_checksum;
        record.database_version = builder.database_version;

        Ok(record)
    }
}

fn read_repomd_xml<R: BufRead>(
    repomd_data: &mut RepomdData,
    mut reader: Reader<R>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    let mut found_root_tag = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                TAG_REPOMD => {
                    found_root_tag = true;
                }
                TAG_REVISION => {
                    let revision = read_element_text(&mut reader, TAG_REVISION)?;
                    repomd_data.set_revision(&revision);
                }
                TAG_REPOID => {
                    let repoid_type = match e.try_get_attribute("type")? {
                        Some(a) => a.unescape_value()?.into_owned(),
                        None => "sha256".to_owned(),
                    };
                    let repoid = read_element_text(&mut reader, TAG_REPOID)?;
                    repomd_data.set_repoid(&repoid_type, &repoid);
                }
                TAG_CONTENTHASH => {
                    let hash_type = match e.try_get_attribute("type")? {
                        Some(a) => a.unescape_value()?.into_owned(),
                        None => "sha256".to_owned(),
                    };
                    let hash = read_element_text(&mut reader, TAG_CONTENTHASH)?;
                    repomd_data.set_contenthash(&hash_type, &hash);
                }
                TAG_DATA => {
                    let record = parse_repomdrecord(&mut reader, &e)?;
                    repomd_data.add_record(record);
                }
                TAG_TAGS => parse_tags(&mut reader, repomd_data)?,
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }
    if !found_root_tag {
        return Err(MetadataError::MissingHeaderError);
    }
    Ok(())
}

//   <tags>
//     <content>binary-x86_64</content>
//     <repo>Fedora</repo>
//     <distro cpeid="cpe:/o:fedoraproject:fedora:33">Fedora 33</distro>
//   </tags>
fn parse_tags<R: BufRead>(
    reader: &mut Reader<R>,
    repomd_data: &mut RepomdData,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                TAG_DISTRO => {
                    let cpeid = e
                        .try_get_attribute("cpeid")?
                        .map(|a| a.unescape_value().map(|v| v.into_owned()))
                        .transpose()?;
                    let name = read_element_text(reader, TAG_DISTRO)?;
                    repomd_data.add_distro_tag(name, cpeid);
                }
                TAG_REPO => {
                    let repo = read_element_text(reader, TAG_REPO)?;
                    repomd_data.add_repo_tag(repo);
                }
                TAG_CONTENT => {
                    let content = read_element_text(reader, TAG_CONTENT)?;
                    repomd_data.add_content_tag(content);
                }
                _ => (),
            },
            Event::End(e) if e.name().as_ref() == TAG_TAGS => break,
            Event::Eof => {
                return Err(MetadataError::InconsistentMetadataError(
                    "unclosed <tags> element".to_owned(),
                ));
            }
            _ => (),
        }
        buf.clear();
    }
    Ok(())
}

// <data type="primary">
//     <checksum type="sha256">fd2ff685b13d5b18b7c16d1316f7ccf299283cdf5db27ab780cb6b855b022000</checksum>
//     <open-checksum type="sha256">fd0619cc82de1a6475c98bd11cdd09e38b359c57a3ef1ab8411e5cc6076cbab8</open-checksum>
//     <location href="repodata/fd2ff685...-primary.xml.gz"/>
//     <timestamp>1602869947</timestamp>
//     <size>78112</size>
//     <open-size>651264</open-size>
// </data>
fn parse_repomdrecord<R: BufRead>(
    reader: &mut Reader<R>,
    open_tag: &BytesStart,
) -> Result<RepomdRecord, MetadataError> {
    let mut builder = RepomdRecordBuilder::default();
    builder.metadata_name = open_tag
        .try_get_attribute("type")?
        .ok_or(MetadataError::MissingAttributeError("type"))?
        .unescape_value()?
        .into_owned();

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                TAG_CHECKSUM => {
                    builder.checksum = Some(parse_checksum_element(reader, &e, TAG_CHECKSUM)?);
                }
                TAG_OPEN_CHECKSUM => {
                    builder.open_checksum =
                        Some(parse_checksum_element(reader, &e, TAG_OPEN_CHECKSUM)?);
                }
                TAG_HEADER_CHECKSUM => {
                    builder.header_checksum =
                        Some(parse_checksum_element(reader, &e, TAG_HEADER_CHECKSUM)?);
                }
                TAG_LOCATION => {
                    let href = e
                        .try_get_attribute("href")?
                        .ok_or(MetadataError::MissingAttributeError("href"))?
                        .unescape_value()?
                        .into_owned();
                    builder.location_href = Some(href.into());
                    builder.location_base = e
                        .try_get_attribute("xml:base")?
                        .map(|a| a.unescape_value().map(|v| v.into_owned()))
                        .transpose()?;
                }
                TAG_TIMESTAMP => {
                    builder.timestamp = Some(read_element_text(reader, TAG_TIMESTAMP)?.parse()?);
                }
                TAG_SIZE => {
                    builder.size = Some(read_element_text(reader, TAG_SIZE)?.parse()?);
                }
                TAG_OPEN_SIZE => {
                    builder.open_size = Some(read_element_text(reader, TAG_OPEN_SIZE)?.parse()?);
                }
                TAG_HEADER_SIZE => {
                    builder.header_size = Some(read_element_text(reader, TAG_HEADER_SIZE)?.parse()?);
                }
                TAG_DATABASE_VERSION => {
                    builder.database_version =
                        Some(read_element_text(reader, TAG_DATABASE_VERSION)?.parse()?);
                }
                _ => (),
            },
            Event::End(e) if e.name().as_ref() == TAG_DATA => break,
            Event::Eof => {
                return Err(MetadataError::InconsistentMetadataError(
                    "unclosed <data> element".to_owned(),
                ));
            }
            _ => (),
        }
        buf.clear();
    }
    builder.try_into()
}

fn parse_checksum_element<R: BufRead>(
    reader: &mut Reader<R>,
    open_tag: &BytesStart,
    end_tag: &[u8],
) -> Result<Checksum, MetadataError> {
    let checksum_type = open_tag
        .try_get_attribute("type")?
        .ok_or(MetadataError::MissingAttributeError("type"))?
        .unescape_value()?
        .into_owned();
    let checksum_value = read_element_text(reader, end_tag)?;
    Checksum::try_create(checksum_type, checksum_value)
}

fn write_repomd_xml<W: Write>(
    repomd_data: &RepomdData,
    writer: &mut Writer<W>,
) -> Result<(), MetadataError> {
    // <?xml version="1.0" encoding="UTF-8"?>
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    // <repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
    let mut repomd_tag = BytesStart::new("repomd");
    repomd_tag.push_attribute(("xmlns", XML_NS_REPO));
    repomd_tag.push_attribute(("xmlns:rpm", XML_NS_RPM));
    writer.write_event(Event::Start(repomd_tag))?;

    // <revision>1615686465</revision>
    let revision = match repomd_data.revision() {
        Some(revision) => revision.to_owned(),
        None => SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string(),
    };
    writer
        .create_element("revision")
        .write_text_content(BytesText::new(&revision))?;

    // <repoid type="sha256">...</repoid>
    if let Some((repoid_type, repoid)) = repomd_data.repoid() {
        writer
            .create_element("repoid")
            .with_attribute(("type", repoid_type))
            .write_text_content(BytesText::new(repoid))?;
    }

    // <contenthash type="sha256">...</contenthash>
    if let Some((hash_type, hash)) = repomd_data.contenthash() {
        writer
            .create_element("contenthash")
            .with_attribute(("type", hash_type))
            .write_text_content(BytesText::new(hash))?;
    }

    write_tags(repomd_data, writer)?;

    for record in repomd_data.records() {
        write_data(record, writer)?;
    }

    // </repomd>
    writer.write_event(Event::End(BytesEnd::new("repomd")))?;

    // trailing newline
    writer.write_event(Event::Text(BytesText::new("\n")))?;
    Ok(())
}

// <tags>
//   <content>binary-x86_64</content>
//   <repo>Fedora</repo>
//   <distro cpeid="cpe:/o:fedoraproject:fedora:33">Fedora 33</distro>
// </tags>
fn write_tags<W: Write>(
    repomd_data: &RepomdData,
    writer: &mut Writer<W>,
) -> Result<(), MetadataError> {
    let has_tags = !repomd_data.distro_tags().is_empty()
        || !repomd_data.repo_tags().is_empty()
        || !repomd_data.content_tags().is_empty();
    if !has_tags {
        return Ok(());
    }

    writer.write_event(Event::Start(BytesStart::new("tags")))?;

    for item in repomd_data.content_tags() {
        writer
            .create_element("content")
            .write_text_content(BytesText::new(item))?;
    }

    for item in repomd_data.repo_tags() {
        writer
            .create_element("repo")
            .write_text_content(BytesText::new(item))?;
    }

    for item in repomd_data.distro_tags() {
        let element = writer.create_element("distro");
        match &item.cpeid {
            Some(cpeid) => element
                .with_attribute(("cpeid", cpeid.as_str()))
                .write_text_content(BytesText::new(&item.name))?,
            None => element.write_text_content(BytesText::new(&item.name))?,
        };
    }

    writer.write_event(Event::End(BytesEnd::new("tags")))?;

    Ok(())
}

// <data type="primary">
//   ...
//   <timestamp>1614969700</timestamp>
//   <size>5830735</size>
//   <open-size>53965949</open-size>
// </data>
fn write_data<W: Write>(data: &RepomdRecord, writer: &mut Writer<W>) -> Result<(), MetadataError> {
    let mut data_tag = BytesStart::new("data");
    data_tag.push_attribute(("type", data.metadata_name.as_str()));
    writer.write_event(Event::Start(data_tag))?;

    // <checksum type="sha256">afdc6dc379e58d097ed0b350536812bc6a604bbce50c5c109d8d98e28301dc4b</checksum>
    let (checksum_type, checksum_value) = data.checksum.to_values()?;
    writer
        .create_element("checksum")
        .with_attribute(("type", checksum_type))
        .write_text_content(BytesText::new(checksum_value))?;

    if let Some(open_checksum) = &data.open_checksum {
        let (checksum_type, checksum_value) = open_checksum.to_values()?;
        writer
            .create_element("open-checksum")
            .with_attribute(("type", checksum_type))
            .write_text_content(BytesText::new(checksum_value))?;
    }

    if let Some(header_checksum) = &data.header_checksum {
        let (checksum_type, checksum_value) = header_checksum.to_values()?;
        writer
            .create_element("header-checksum")
            .with_attribute(("type", checksum_type))
            .write_text_content(BytesText::new(checksum_value))?;
    }

    // <location href="repodata/primary.xml.gz"/>
    let href = data.location_href.to_string_lossy();
    let element = writer.create_element("location");
    match &data.location_base {
        Some(base) => element
            .with_attribute(("href", href.as_ref()))
            .with_attribute(("xml:base", base.as_str()))
            .write_empty()?,
        None => element.with_attribute(("href", href.as_ref())).write_empty()?,
    };

    // <timestamp>1602869947</timestamp>
    writer
        .create_element("timestamp")
        .write_text_content(BytesText::new(&data.timestamp.to_string()))?;

    if let Some(size) = data.size {
        writer
            .create_element("size")
            .write_text_content(BytesText::new(&size.to_string()))?;
    }

    if let Some(open_size) = data.open_size {
        writer
            .create_element("open-size")
            .write_text_content(BytesText::new(&open_size.to_string()))?;
    }

    if let Some(header_size) = data.header_size {
        writer
            .create_element("header-size")
            .write_text_content(BytesText::new(&header_size.to_string()))?;
    }

    if let Some(database_version) = data.database_version {
        writer
            .create_element("database_version")
            .write_text_content(BytesText::new(&database_version.to_string()))?;
    }

    // </data>
    writer.write_event(Event::End(BytesEnd::new("data")))?;

    Ok(())
}
