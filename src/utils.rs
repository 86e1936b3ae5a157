use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::{Checksum, ChecksumType, CompressionType, MetadataError};

fn digest_context(checksum_type: ChecksumType) -> Result<Box<dyn DynDigest>, MetadataError> {
    let ctx: Box<dyn DynDigest> = match checksum_type {
        ChecksumType::Md5 => Box::new(Md5::new()),
        ChecksumType::Sha1 => Box::new(Sha1::new()),
        ChecksumType::Sha224 => Box::new(Sha224::new()),
        ChecksumType::Sha256 => Box::new(Sha256::new()),
        ChecksumType::Sha384 => Box::new(Sha384::new()),
        ChecksumType::Sha512 => Box::new(Sha512::new()),
        ChecksumType::Unknown => {
            return Err(MetadataError::UnsupportedChecksumTypeError(
                "unknown".to_owned(),
            ));
        }
    };
    Ok(ctx)
}

fn digest_reader<R: Read>(
    reader: &mut R,
    checksum_type: ChecksumType,
) -> Result<String, MetadataError> {
    let mut ctx = digest_context(checksum_type)?;
    let mut buffer = [0; 8192];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        ctx.update(&buffer[..count]);
    }
    Ok(hex::encode(ctx.finalize()))
}

/// Streaming digest of a file's bytes.
pub fn checksum_file(path: &Path, checksum_type: ChecksumType) -> Result<Checksum, MetadataError> {
    let mut reader = BufReader::new(File::open(path)?);
    let hex = digest_reader(&mut reader, checksum_type)?;
    Ok(Checksum::from_type_and_value(checksum_type, hex))
}

/// Digest of a byte slice (or several, concatenated).
pub fn checksum_data(
    checksum_type: ChecksumType,
    chunks: &[&[u8]],
) -> Result<String, MetadataError> {
    let mut ctx = digest_context(checksum_type)?;
    for chunk in chunks {
        ctx.update(chunk);
    }
    Ok(hex::encode(ctx.finalize()))
}

/// Digest of the decompressed content of a file, or None if the file isn't
/// compressed.
pub fn checksum_inner_file(
    path: &Path,
    checksum_type: ChecksumType,
) -> Result<Option<Checksum>, MetadataError> {
    let file = File::open(path)?;
    let (mut reader, format) = niffler::send::get_reader(Box::new(file))?;
    if format == niffler::send::compression::Format::No {
        return Ok(None);
    }

    let hex = digest_reader(&mut reader, checksum_type)?;
    Ok(Some(Checksum::from_type_and_value(checksum_type, hex)))
}

/// Decompressed size of a compressed file, or None if the file isn't
/// compressed.
pub fn size_inner_file(path: &Path) -> Result<Option<u64>, MetadataError> {
    let file = File::open(path)?;
    let (mut reader, format) = niffler::send::get_reader(Box::new(file))?;
    if format == niffler::send::compression::Format::No {
        return Ok(None);
    }

    let mut buffer = [0; 8192];
    let mut size = 0u64;
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        size += count as u64;
    }
    Ok(Some(size))
}

pub(crate) fn configure_xml_reader<R: BufRead>(reader: &mut quick_xml::Reader<R>) {
    reader.expand_empty_elements(true).trim_text(true);
}

/// Collect the text content of the element whose start tag was just read,
/// consuming events up to and including the matching end tag.
pub(crate) fn read_element_text<R: BufRead>(
    reader: &mut quick_xml::Reader<R>,
    end_tag: &[u8],
) -> Result<String, MetadataError> {
    use quick_xml::events::Event;

    let mut text = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(std::str::from_utf8(&e)?),
            Event::End(e) if e.name().as_ref() == end_tag => break,
            Event::Eof => {
                return Err(MetadataError::InconsistentMetadataError(format!(
                    "unclosed element <{}>",
                    String::from_utf8_lossy(end_tag)
                )));
            }
            _ => (),
        }
        buf.clear();
    }
    Ok(text)
}

/// Open a (possibly compressed) XML file for event-based reading, detecting
/// the compression format by magic bytes.
pub fn xml_reader_from_path(
    path: &Path,
) -> Result<quick_xml::Reader<BufReader<Box<dyn Read + Send>>>, MetadataError> {
    let file = File::open(path)?;
    let (reader, _format) = niffler::send::get_reader(Box::new(file))?;
    let mut xml_reader = quick_xml::Reader::from_reader(BufReader::new(reader));
    configure_xml_reader(&mut xml_reader);
    Ok(xml_reader)
}

/// Create a compressed byte stream at `path` + the extension implied by the
/// compression type. Returns the actual filename created.
pub fn create_compressed_writer(
    path: &Path,
    compression: CompressionType,
) -> Result<(PathBuf, Box<dyn Write + Send>), MetadataError> {
    let mut filename = path.as_os_str().to_owned();
    filename.push(compression.to_file_extension());
    let filename = PathBuf::from(&filename);

    let file: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(&filename)?));

    let writer = match compression {
        CompressionType::None => file,
        CompressionType::Gzip => niffler::send::get_writer(
            file,
            niffler::send::compression::Format::Gzip,
            niffler::Level::Nine,
        )?,
        CompressionType::Bz2 => niffler::send::get_writer(
            file,
            niffler::send::compression::Format::Bzip,
            niffler::Level::Nine,
        )?,
        CompressionType::Xz => niffler::send::get_writer(
            file,
            niffler::send::compression::Format::Lzma,
            niffler::Level::Nine,
        )?,
    };
    Ok((filename, writer))
}

/// Create a quick-xml writer over a compressed stream, for serially written
/// documents. Returns the actual filename created.
pub fn create_xml_writer(
    path: &Path,
    compression: CompressionType,
) -> Result<(PathBuf, quick_xml::Writer<Box<dyn Write + Send>>), MetadataError> {
    let (filename, inner) = create_compressed_writer(path, compression)?;
    Ok((filename, quick_xml::Writer::new_with_indent(inner, b' ', 2)))
}

/// Strip control characters that are illegal in XML 1.0 (everything below
/// 0x20 except tab, LF and CR).
pub fn sanitize_xml_str(value: &str) -> Cow<'_, str> {
    let illegal = |c: char| c < ' ' && c != '\t' && c != '\n' && c != '\r';
    if value.contains(illegal) {
        Cow::Owned(value.chars().filter(|&c| !illegal(c)).collect())
    } else {
        Cow::Borrowed(value)
    }
}

/// Reinterpret a non-UTF-8 byte string as Latin-1. Bytes in the 0x80..0xC0
/// range are control codes in Latin-1 (the input is probably misencoded
/// cp-1252) and are dropped.
pub fn latin1_to_utf8(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input {
        match b {
            0x00..=0x7f => out.push(b as char),
            0x80..=0xbf => (),
            _ => out.push(b as char),
        }
    }
    out
}

/// Decode bytes as UTF-8, falling back to a Latin-1 reinterpretation.
pub fn decode_header_str(input: &[u8]) -> String {
    match std::str::from_utf8(input) {
        Ok(s) => s.to_owned(),
        Err(_) => latin1_to_utf8(input),
    }
}

/// Normalize a location href for use as an old-metadata cache key: a leading
/// "./" and a trailing "#fragment" never change the file's identity.
pub fn cleaned_href(location_href: &str) -> &str {
    let href = location_href.strip_prefix("./").unwrap_or(location_href);
    match href.split_once('#') {
        Some((head, _)) => head,
        None => href,
    }
}

/// Drop `count` leading path components from a relative href.
pub fn cut_dirs(location_href: &str, count: usize) -> &str {
    let mut href = location_href.trim_start_matches('/');
    for _ in 0..count {
        match href.split_once('/') {
            Some((_, rest)) => href = rest.trim_start_matches('/'),
            None => break,
        }
    }
    href
}

/// Derive the per-media base URL used in split mode.
pub fn split_media_baseurl(media_id: u32, location_base: Option<&str>) -> String {
    match location_base {
        None | Some("") => format!("media:#{}", media_id),
        Some(base) => match base.strip_suffix("://") {
            // A bare scheme: the trailing "//" is replaced by the media suffix
            Some(scheme) => format!("{}:#{}", scheme, media_id),
            None => format!("{}#{}", base, media_id),
        },
    }
}

/// Whether a file path belongs in primary.xml.
///
/// Strange algorithm, but it's what the original uses.
pub fn is_primary_path(path: &str) -> bool {
    path.starts_with("/etc/") || path.contains("bin/") || path.starts_with("/usr/lib/sendmail")
}

/// The filename component of a location href.
pub fn href_filename(location_href: &str) -> &str {
    match location_href.rsplit_once('/') {
        Some((_, name)) => name,
        None => location_href,
    }
}

/// The old-metadata cache key for a location href: the filename of the
/// cleaned href, so a package moved to another subdirectory still hits.
pub fn cache_key(location_href: &str) -> &str {
    href_filename(cleaned_href(location_href))
}
