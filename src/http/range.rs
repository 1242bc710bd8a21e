//! `Range: bytes=...` parsing and `multipart/byteranges` body assembly
//! (RFC 7233 §2.1, §4.1). Only used against responses with a fully buffered,
//! known-length body — there is no seekable-stream range support.

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub(crate) start: u64,
    pub(crate) end: u64, // inclusive
}

impl ByteRange {
    pub(crate) fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParsedRange {
    /// No `Range` header, or a unit other than `bytes`: serve the full body.
    Absent,
    Satisfiable(Vec<ByteRange>),
    Unsatisfiable,
}

/// Parses a `Range` header value against a body of `total` bytes. An empty
/// body can never satisfy a range (per spec, yields a full `200` response).
pub(crate) fn parse_range_header(value: &str, total: u64) -> ParsedRange {
    let Some(spec) = value.strip_prefix("bytes=") else {
        return ParsedRange::Absent;
    };
    if total == 0 {
        return ParsedRange::Absent;
    }

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let Some((start_s, end_s)) = part.split_once('-') else {
            return ParsedRange::Unsatisfiable;
        };

        let range = match (start_s.is_empty(), end_s.is_empty()) {
            (true, true) => return ParsedRange::Unsatisfiable,
            // suffix range: the last `n` bytes of the body.
            (true, false) => {
                let Ok(n) = end_s.parse::<u64>() else {
                    return ParsedRange::Unsatisfiable;
                };
                if n == 0 {
                    continue;
                }
                let n = n.min(total);
                ByteRange {
                    start: total - n,
                    end: total - 1,
                }
            }
            (false, true) => {
                let Ok(start) = start_s.parse::<u64>() else {
                    return ParsedRange::Unsatisfiable;
                };
                if start >= total {
                    return ParsedRange::Unsatisfiable;
                }
                ByteRange {
                    start,
                    end: total - 1,
                }
            }
            (false, false) => {
                let (Ok(start), Ok(end)) = (start_s.parse::<u64>(), end_s.parse::<u64>()) else {
                    return ParsedRange::Unsatisfiable;
                };
                if start > end || start >= total {
                    return ParsedRange::Unsatisfiable;
                }
                ByteRange {
                    start,
                    end: end.min(total - 1),
                }
            }
        };

        ranges.push(range);
    }

    if ranges.is_empty() {
        ParsedRange::Unsatisfiable
    } else {
        ParsedRange::Satisfiable(ranges)
    }
}

/// A fresh hex boundary for `multipart/byteranges`, unique enough within a
/// process (nanosecond clock reading, not cryptographically random — there is
/// no adversarial use for predicting it).
pub(crate) fn new_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos:032x}")
}

/// Builds the `multipart/byteranges` body for `ranges` against `data`, along
/// with the exact byte length the caller must use for `Content-Length`.
///
/// Each part is exactly `--BOUNDARY CRLF Content-Range: bytes a-b/TOTAL CRLF
/// CRLF <bytes> CRLF` — no per-part `Content-Type`, matching the overall
/// `multipart/byteranges` media type already carried on the response's own
/// `Content-Type` header.
pub(crate) fn build_multipart_body(data: &[u8], ranges: &[ByteRange], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();

    for range in ranges {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(
            format!(
                "content-range: bytes {}-{}/{}\r\n\r\n",
                range.start,
                range.end,
                data.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&data[range.start as usize..=range.end as usize]);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--\r\n");

    out
}
