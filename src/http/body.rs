//! Request body decoding: length-delimited, chunked, and multipart/form-data,
//! plus the `application/x-www-form-urlencoded` helper used by the RPC layer.
//!
//! Unlike [`crate::query`], this module folds `+` into a space when decoding
//! percent-escapes — that fold is specific to form bodies, not URL queries.

use crate::{config::ServerConfig, errors::ErrorKind};
use memchr::memchr;
use std::{
    io::Write,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

/// A fully decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Bytes(Vec<u8>),
    Multipart(Vec<Part>),
}

impl Default for Body {
    fn default() -> Self {
        Body::None
    }
}

impl Body {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn parts(&self) -> Option<&[Part]> {
        match self {
            Body::Multipart(parts) => Some(parts),
            _ => None,
        }
    }

    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Body::None)
    }
}

/// One `multipart/form-data` part: the field name it was declared under, an
/// optional filename (present only for file fields), its content type, and
/// where its bytes ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: PartData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartData {
    InMemory(Vec<u8>),
    SpilledFile(PathBuf),
}

impl PartData {
    pub fn len(&self) -> Option<u64> {
        match self {
            PartData::InMemory(b) => Some(b.len() as u64),
            PartData::SpilledFile(path) => std::fs::metadata(path).ok().map(|m| m.len()),
        }
    }
}

/// Decodes a chunked-transfer-encoded body already fully buffered in `raw`
/// (the connection layer is responsible for reading until the terminating
/// `0\r\n\r\n` chunk arrives — see [`crate::server::connection`]).
pub(crate) fn decode_chunked(raw: &[u8], max_size: usize) -> Result<Vec<u8>, ErrorKind> {
    let mut out = Vec::new();
    let mut rest = raw;

    loop {
        let line_end = memchr(b'\n', rest).ok_or(ErrorKind::InvalidChunkedEncoding)?;
        let size_line = rest[..line_end]
            .strip_suffix(b"\r")
            .unwrap_or(&rest[..line_end]);
        // chunk extensions (`;name=value`) are accepted but ignored.
        let size_hex = size_line.split(|&b| b == b';').next().unwrap_or(size_line);
        let size = usize::from_str_radix(
            std::str::from_utf8(size_hex).map_err(|_| ErrorKind::InvalidChunkedEncoding)?,
            16,
        )
        .map_err(|_| ErrorKind::InvalidChunkedEncoding)?;

        rest = &rest[line_end + 1..];

        if size == 0 {
            // trailer section, discarded up to the final CRLF.
            return Ok(out);
        }

        if out.len() + size > max_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        if rest.len() < size + 2 {
            return Err(ErrorKind::InvalidChunkedEncoding);
        }

        out.extend_from_slice(&rest[..size]);
        rest = &rest[size + 2..]; // chunk data + trailing CRLF
    }
}

/// True if `raw` (the bytes read so far after the headers) contains the
/// chunked terminator (`0\r\n\r\n` or `0\n\n`, optionally followed by
/// trailers).
pub(crate) fn chunked_is_complete(raw: &[u8]) -> bool {
    raw.windows(5).any(|w| w == b"\r\n0\r\n")
        || raw.starts_with(b"0\r\n")
        || raw.windows(3).any(|w| w == b"\n0\n")
        || raw.starts_with(b"0\n")
}

/// Decodes an `application/x-www-form-urlencoded` body into ordered pairs.
/// `+` is folded to a literal space, unlike [`crate::query::decode`].
pub fn parse_urlencoded(raw: &[u8]) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }

    raw.split(|&b| b == b'&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = match memchr(b'=', segment) {
                Some(pos) => (&segment[..pos], &segment[pos + 1..]),
                None => (segment, &segment[segment.len()..]),
            };
            (decode_form_component(key), decode_form_component(value))
        })
        .collect()
}

fn decode_form_component(src: &[u8]) -> String {
    let folded: Vec<u8> = src
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    crate::query::decode(&folded)
}

/// Extracts the boundary token from a `Content-Type: multipart/form-data;
/// boundary=...` header value.
pub(crate) fn multipart_boundary(content_type: &[u8]) -> Option<Vec<u8>> {
    let content_type = std::str::from_utf8(content_type).ok()?;
    if !content_type
        .split(';')
        .next()?
        .trim()
        .eq_ignore_ascii_case("multipart/form-data")
    {
        return None;
    }

    content_type.split(';').skip(1).find_map(|param| {
        let param = param.trim();
        let value = param.strip_prefix("boundary=")?;
        Some(value.trim_matches('"').as_bytes().to_vec())
    })
}

/// Parses a fully-buffered multipart/form-data body. Parts whose
/// `Content-Disposition` is missing a `name` are silently dropped. Parts at
/// or above `config.store_file_upload_in_file_at_size` are spilled to a
/// freshly created temp file under `config.temp_dir` (created lazily, on
/// first spill only).
pub(crate) fn parse_multipart(
    body: &[u8],
    boundary: &[u8],
    config: &ServerConfig,
) -> Result<Vec<Part>, ErrorKind> {
    let delimiter = [b"--", boundary].concat();
    let mut parts = Vec::new();

    let Some(mut cursor) = find(body, &delimiter).map(|pos| pos + delimiter.len()) else {
        return Ok(parts);
    };

    loop {
        match body.get(cursor..cursor + 2) {
            Some(b"--") => break, // final boundary
            Some(b"\r\n") => cursor += 2,
            _ if body.get(cursor..cursor + 1) == Some(b"\n") => cursor += 1,
            _ => return Err(ErrorKind::InvalidHeader),
        }

        let next_delim =
            find(&body[cursor..], &delimiter).ok_or(ErrorKind::InvalidHeader)? + cursor;
        let mut part_raw = &body[cursor..next_delim];
        part_raw = part_raw
            .strip_suffix(b"\r\n")
            .or_else(|| part_raw.strip_suffix(b"\n"))
            .unwrap_or(part_raw);

        if let Some(part) = parse_part(part_raw, config)? {
            parts.push(part);
        }

        cursor = next_delim + delimiter.len();
    }

    Ok(parts)
}

fn parse_part(raw: &[u8], config: &ServerConfig) -> Result<Option<Part>, ErrorKind> {
    let header_end = find(raw, b"\r\n\r\n")
        .map(|p| (p, 4))
        .or_else(|| find(raw, b"\n\n").map(|p| (p, 2)))
        .ok_or(ErrorKind::InvalidHeader)?;

    let headers_raw = &raw[..header_end.0];
    let data = &raw[header_end.0 + header_end.1..];

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in headers_raw.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(colon) = memchr(b':', line) else {
            continue;
        };
        let header_name = trim(&line[..colon]);
        let header_value = trim(&line[colon + 1..]);

        if header_name.eq_ignore_ascii_case(b"content-disposition") {
            name = find_disposition_param(header_value, b"name");
            filename = find_disposition_param(header_value, b"filename");
        } else if header_name.eq_ignore_ascii_case(b"content-type") {
            content_type = Some(String::from_utf8_lossy(header_value).into_owned());
        }
    }

    let Some(name) = name else {
        return Ok(None);
    };

    let part_data = if data.len() >= config.store_file_upload_in_file_at_size {
        PartData::SpilledFile(spill_to_temp_file(data, config)?)
    } else {
        PartData::InMemory(data.to_vec())
    };

    Ok(Some(Part {
        name,
        filename,
        content_type,
        data: part_data,
    }))
}

fn find_disposition_param(header_value: &[u8], param: &[u8]) -> Option<String> {
    let header_value = std::str::from_utf8(header_value).ok()?;
    header_value.split(';').find_map(|segment| {
        let segment = segment.trim();
        let prefix = std::str::from_utf8(param).ok()?;
        let value = segment.strip_prefix(prefix)?.strip_prefix('=')?;
        Some(value.trim_matches('"').to_string())
    })
}

fn spill_to_temp_file(data: &[u8], config: &ServerConfig) -> Result<PathBuf, ErrorKind> {
    std::fs::create_dir_all(&config.temp_dir).map_err(ErrorKind::from)?;

    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let path = config.temp_dir.join(format!("upload-{unique}.part"));

    let mut file = std::fs::File::create(&path).map_err(ErrorKind::from)?;
    file.write_all(data).map_err(ErrorKind::from)?;

    Ok(path)
}

fn trim(mut b: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = b {
        if first.is_ascii_whitespace() {
            b = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = b {
        if last.is_ascii_whitespace() {
            b = rest;
        } else {
            break;
        }
    }
    b
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
