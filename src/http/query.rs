//! Query-string parsing: RFC 3986 percent-decoding over UTF-8, with
//! duplicate keys retained in declaration order (list-valued lookup via
//! [`crate::Url::query_values`]).
//!
//! Percent sequences are matched case-insensitively (`%5B` == `%5b`).
//! `+` is left as a literal plus — this parses the URL query component per
//! RFC 3986, not `application/x-www-form-urlencoded` bodies (those go
//! through [`crate::http::body::parse_urlencoded`], which does fold `+`
//! into a space).

use memchr::memchr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Error {
    OverLimit(usize),
}

/// Parses a raw query string (without the leading `?`) into an ordered,
/// duplicate-preserving list of percent-decoded `(key, value)` pairs.
pub(crate) fn parse(raw: &[u8], max_parts: usize) -> Result<Vec<(String, String)>, Error> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut pairs = Vec::new();
    for segment in raw.split(|&b| b == b'&') {
        if segment.is_empty() {
            continue;
        }
        if pairs.len() >= max_parts {
            return Err(Error::OverLimit(max_parts));
        }

        let (key, value) = match memchr(b'=', segment) {
            Some(pos) => (&segment[..pos], &segment[pos + 1..]),
            None => (segment, &segment[segment.len()..]),
        };

        pairs.push((decode(key), decode(value)));
    }

    Ok(pairs)
}

/// Percent-decodes `src` and lossily re-interprets the result as UTF-8.
pub(crate) fn decode(src: &[u8]) -> String {
    String::from_utf8(percent_decode(src))
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

pub(crate) fn percent_decode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        if src[i] == b'%' && i + 2 < src.len() {
            if let (Some(hi), Some(lo)) = (hex_val(src[i + 1]), hex_val(src[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }

        out.push(src[i]);
        i += 1;
    }

    out
}

#[inline(always)]
fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-encodes `src` for safe inclusion in a query key/value: leaves
/// unreserved characters (`A-Za-z0-9-_.~`) untouched, escapes everything
/// else as `%XX` uppercase hex.
pub(crate) fn encode(src: &str, out: &mut String) {
    for &b in src.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_escapes_case_insensitively() {
        assert_eq!(decode(b"%3D%3d"), "==");
        assert_eq!(decode(b"%20"), " ");
        assert_eq!(decode(b"hello"), "hello");
    }

    #[test]
    fn leaves_trailing_malformed_escape_intact() {
        assert_eq!(decode(b"abc%"), "abc%");
        assert_eq!(decode(b"abc%2"), "abc%2");
        assert_eq!(decode(b"abc%zz"), "abc%zz");
    }

    #[test]
    fn parses_duplicate_keys_in_order() {
        let pairs = parse(b"x=y&z=%20&zig=%3D%3d", 8).unwrap();
        let pairs: Vec<_> = pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(pairs, [("x", "y"), ("z", " "), ("zig", "==")]);
    }

    #[test]
    fn missing_equals_yields_empty_value() {
        let pairs = parse(b"debug", 8).unwrap();
        assert_eq!(pairs, [("debug".to_string(), "".to_string())]);
    }

    #[test]
    fn over_limit_is_rejected() {
        assert_eq!(parse(b"a=1&b=2&c=3", 2), Err(Error::OverLimit(2)));
    }
}
