use crate::{
    errors::*,
    http::{
        body::{self, Body},
        types::{self, Header, HeaderMap},
    },
    limits::ReqLimits,
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::memchr;
use std::{
    io, mem,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

/// A fully parsed HTTP request.
///
/// The request line and headers are zero-copy views into the connection's
/// reusable buffer (valid only until the handler returns and the buffer is
/// reset for the next request); [`Url`] and [`Body`] are owned, since
/// decoding them (percent-escapes, chunked framing, multipart parts) already
/// requires an allocation.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Body,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    cleanup: Cleanup,
}

const UNSPECIFIED: SocketAddr = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0);

/// A user-registered callback guaranteed to run exactly once after the
/// response has been transmitted (or after a terminal error on it),
/// regardless of whether an error handler intervened first.
///
/// [`Handler::handle`](crate::Handler::handle) only hands out `&Request`, so
/// registering a callback from inside a handler needs interior mutability —
/// hence the `Mutex` rather than a bare field. The slot is reference-counted
/// (not just cell-wrapped) so that [`Request::with_url`] — used by the
/// dispatch resolver to hand a rebased view of the request down to a nested
/// mapping — shares the same slot as the original: a callback registered
/// from inside a nested handler still reaches the connection loop's
/// `take_cleanup`. Wrapped rather than exposed directly so `Request` can
/// keep deriving `PartialEq`: a pending callback always compares as equal,
/// since identity of a closure isn't meaningful request state.
#[derive(Clone, Default)]
struct Cleanup(Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>);

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cleanup({})", self.0.lock().unwrap().is_some())
    }
}
impl PartialEq for Cleanup {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::empty(),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: Body::None,
            client_addr: UNSPECIFIED,
            server_addr: UNSPECIFIED,
            cleanup: Cleanup::default(),
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = Body::None;
        self.cleanup = Cleanup::default();
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the decoded request body.
    #[inline(always)]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// The socket address the TCP connection was accepted from.
    ///
    /// If an `X-Forwarded-For` header is present, this is still the direct
    /// peer (typically the reverse proxy); see [`Self::forwarded_for`] for
    /// the original client.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The local address the listener accepted the connection on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    #[inline(always)]
    pub(crate) fn set_peer(&mut self, client_addr: SocketAddr, server_addr: SocketAddr) {
        self.client_addr = client_addr;
        self.server_addr = server_addr;
    }

    /// The first hop recorded in `X-Forwarded-For`, i.e. the client the
    /// proxy chain claims originated the request. `None` if the header is
    /// absent or that entry is unparsable. Trusting this requires trusting
    /// the proxy.
    pub fn forwarded_for(&self) -> Option<IpAddr> {
        let value = self.header(b"x-forwarded-for")?;
        let first = value.split(|&b| b == b',').next()?;
        parse_forwarded_entry(std::str::from_utf8(first).ok()?)
    }

    /// The full `X-Forwarded-For` chain, left to right exactly as the
    /// header lists it. Entries that fail to parse are skipped rather than
    /// aborting the rest of the chain. Empty if the header is absent.
    pub fn forwarded_for_chain(&self) -> Vec<IpAddr> {
        let Some(value) = self.header(b"x-forwarded-for") else {
            return Vec::new();
        };
        let Ok(value) = std::str::from_utf8(value) else {
            return Vec::new();
        };

        value.split(',').filter_map(parse_forwarded_entry).collect()
    }

    /// Registers a callback to run exactly once after the response has been
    /// fully transmitted (success or failure), after the error handler if
    /// one ran. Replaces any previously registered callback.
    #[inline]
    pub fn on_cleanup<F: FnOnce() + Send + 'static>(&self, f: F) {
        *self.cleanup.0.lock().unwrap() = Some(Box::new(f));
    }

    #[inline(always)]
    pub(crate) fn take_cleanup(&self) -> Option<Box<dyn FnOnce() + Send>> {
        self.cleanup.0.lock().unwrap().take()
    }

    /// Returns a view of this request with `url` substituted, sharing the
    /// same cleanup slot as `self`. Used by the dispatch resolver to hand a
    /// rebased URL down to a matched mapping without losing the connection's
    /// cleanup callback if the nested handler registers one.
    #[inline]
    pub(crate) fn with_url(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }
}

/// Parses one `X-Forwarded-For` entry: a plain IPv4/IPv6 address, or either
/// followed by `:port` (the port is discarded). IPv6 must be bracketed for
/// the `:port` form to parse, matching the header's de facto convention —
/// otherwise there'd be no way to tell the address's own colons from a
/// trailing port.
fn parse_forwarded_entry(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();

    if let Some(rest) = entry.strip_prefix('[') {
        let (host, _) = rest.split_once(']')?;
        return host.parse().ok();
    }

    match entry.matches(':').count() {
        0 => entry.parse().ok(),
        1 => entry.split_once(':').and_then(|(host, _)| host.parse().ok()),
        _ => entry.parse().ok(),
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn parse(&mut self, stream: &mut TcpStream) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        let raw_target = self.parse_raw_target()?;
        self.check_version()?;
        self.parse_headers()?;

        let host = self.request.headers.get(b"host").unwrap_or(b"");
        self.request.url = Url::parse(host, &raw_target, &self.req_limits)?;

        self.read_body(stream).await?;

        Ok(self.request.version)
    }
}

// Parse first line
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::InvalidMethod)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    /// Copies the raw (still percent-encoded) request target out of the
    /// connection buffer. Kept as a separate owned `Vec<u8>` because the
    /// target can't be decoded into a [`Url`] until the `Host` header is
    /// known, which only becomes available after [`Self::parse_headers`].
    #[inline]
    fn parse_raw_target(&mut self) -> Result<Vec<u8>, ErrorKind> {
        let pos = self
            .parser
            .find_char(self.req_limits.url_size + 1, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;

        let slice = self
            .parser
            .get_slice(self.parser.position, pos)
            .ok_or(ErrorKind::InvalidUrl)?;

        if slice.is_empty() || slice[0] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        let owned = slice.to_vec();
        self.parser.update_position(pos);
        Ok(owned)
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n')
            .ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        (self.response.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.request.version = self.response.version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders)
    }

    #[inline]
    fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        let parser = &mut self.parser;
        // HeaderName: Someone=data\r\n
        //                            |
        let end = parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        match parser.get_slice(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = parser
            .get_slice_static(parser.position + value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> Result<bool, ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            b"host" => return Ok(false), // kept in the header list too, for header() lookups
            _ => return Ok(false),
        }
        .map(|_| true)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + start - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader);
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 10];
        let len = types::into_lower_case(value, &mut normalized);

        match &normalized[..len] {
            b"keep-alive" => self.response.keep_alive = true,
            b"close" => self.response.keep_alive = false,
            _ => return Err(ErrorKind::InvalidConnection),
        }

        Ok(())
    }
}

// Read & decode body
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    fn is_chunked(&self) -> bool {
        self.request
            .header(b"transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().ends_with(b"chunked"))
    }

    /// Reads and decodes whatever body framing the headers declared
    /// (Content-Length, chunked, or none), looping additional socket reads
    /// as needed so the parser is correct regardless of how the request was
    /// split across TCP segments.
    async fn read_body(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        if self.is_chunked() {
            return self.read_chunked_body(stream).await;
        }

        match self.request.headers.content_length {
            Some(len) => self.read_length_delimited_body(stream, len).await,
            None => {
                let available = self.parser.len - self.parser.position;
                if available != 0 {
                    return Err(ErrorKind::UnexpectedBody(available));
                }
                self.request.body = Body::None;
                Ok(())
            }
        }
    }

    async fn read_length_delimited_body(
        &mut self,
        stream: &mut TcpStream,
        len: usize,
    ) -> Result<(), ErrorKind> {
        while self.parser.len - self.parser.position < len {
            if self.parser.len >= self.parser.buffer.len() {
                return Err(ErrorKind::BodyTooLarge);
            }
            let n = self
                .parser
                .read_more(stream, self.conn_limits.socket_read_timeout)
                .await?;
            if n == 0 {
                return Err(ErrorKind::BodyMismatch {
                    expected: len,
                    available: self.parser.len - self.parser.position,
                });
            }
        }

        let body = self
            .parser
            .get_slice(self.parser.position, len)
            .ok_or(ErrorKind::BodyMismatch {
                expected: len,
                available: self.parser.len - self.parser.position,
            })?;

        self.request.body = self.decode_body(body)?;
        Ok(())
    }

    async fn read_chunked_body(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        while !body::chunked_is_complete(
            self.parser
                .get_slice(self.parser.position, self.parser.len - self.parser.position)
                .unwrap_or(&[]),
        ) {
            if self.parser.len >= self.parser.buffer.len() {
                return Err(ErrorKind::BodyTooLarge);
            }
            let n = self
                .parser
                .read_more(stream, self.conn_limits.socket_read_timeout)
                .await?;
            if n == 0 {
                return Err(ErrorKind::InvalidChunkedEncoding);
            }
        }

        let raw = self
            .parser
            .get_slice(self.parser.position, self.parser.len - self.parser.position)
            .unwrap_or(&[]);
        let decoded = body::decode_chunked(raw, self.req_limits.body_size)?;

        self.request.body = self.decode_body(&decoded)?;
        Ok(())
    }

    fn decode_body(&self, raw: &[u8]) -> Result<Body, ErrorKind> {
        if raw.is_empty() {
            return Ok(Body::None);
        }

        let content_type = self.request.header(b"content-type").unwrap_or(b"");
        if let Some(boundary) = body::multipart_boundary(content_type) {
            let parts = body::parse_multipart(raw, &boundary, &self.config)?;
            return Ok(Body::Multipart(parts));
        }

        Ok(Body::Bytes(raw.to_vec()))
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    pub(crate) position: usize,
    pub(crate) len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }
}

// Work with Buffer
impl Parser {
    /// Reads into the buffer starting at offset 0, replacing its contents.
    /// Used once per request to pick up the first bytes of the next
    /// request line.
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer) => {
                let n = read_result?;
                self.len = n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    /// Reads more bytes, appending after what's already buffered (`self.len`).
    /// Used when a request line, headers, or body span more than one TCP
    /// read — keeps parsing correct regardless of how the client's bytes
    /// were segmented on the wire.
    #[inline]
    pub(crate) async fn read_more(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    /// Loops [`Self::read_more`] until the buffered bytes contain the header
    /// terminator (`\r\n\r\n` or `\n\n`), the connection closes, or the
    /// buffer fills up without ever finding one.
    #[inline]
    pub(crate) async fn read_until_headers_end(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        loop {
            if has_header_terminator(&self.buffer[..self.len]) {
                return Ok(self.len);
            }
            if self.len >= self.buffer.len() {
                return Ok(self.len);
            }
            if self.read_more(stream, time).await? == 0 {
                return Ok(self.len);
            }
        }
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    // DO NOT SUGGEST FIXES without full server architecture context.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }
}

fn has_header_terminator(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

#[cfg(test)]
impl Request {
    /// Pushes a raw header onto an otherwise-empty `Request`, for tests in
    /// other modules that need request headers without going through the
    /// wire parser (range negotiation, gzip eligibility).
    pub(crate) fn with_header(mut self, name: &'static [u8], value: &'static [u8]) -> Self {
        self.headers.headers.push(Header::new(name, value));
        self
    }

    /// Sets the URL directly, for tests (dispatch resolver) that need a
    /// specific host/path without going through the wire parser.
    pub(crate) fn set_url_for_test(&mut self, host: &[u8], target: &[u8], limits: &ReqLimits) {
        self.url = Url::parse(host, target, limits).unwrap();
    }

    /// Sets the method directly, for tests (rpc handler) that build a
    /// `Request` without going through the wire parser.
    pub(crate) fn set_method_for_test(&mut self, method: Method) {
        self.method = method;
    }

    /// Sets the body directly, for tests (rpc handler) that build a
    /// `Request` without going through the wire parser.
    pub(crate) fn set_body_for_test(&mut self, body: Body) {
        self.body = body;
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t =
            HttpConnection::from_req("OPTIONS /qwe?q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse_sync(), Ok(Version::Http10));
        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("PYU ",       None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);

            if let Some(expected) = expected {
                assert_eq!(t.parse_method(), Ok(()));
                assert_eq!(t.request.method(), expected);
            } else {
                assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
            }
        }
    }

    #[test]
    fn parse_raw_target() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some("/")),
            ("/api/user ",     Some("/api/user")),
            ("/api/find?user=qwe&id=223 ", Some("/api/find?user=qwe&id=223")),

            ("qwe ",           None),
            (" ",              None),
            ("/qwe",           None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some(expected) = expected {
                let target = t.parse_raw_target().unwrap();
                assert_eq!(str_op(&target), expected);
            } else {
                assert_eq!(t.parse_raw_target().err(), Some(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r \n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.0\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.\n",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1 ",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.",        Err(ErrorKind::InvalidVersion)),
            ("\r\n",           Err(ErrorKind::InvalidVersion)),
            ("\r",             Err(ErrorKind::InvalidVersion)),
            ("\n",             Err(ErrorKind::InvalidVersion)),
            (" ",              Err(ErrorKind::InvalidVersion)),
            ("",               Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);

            if let Ok((version, has_crlf)) = expected {
                assert_eq!(t.check_version(), Ok(()));

                assert_eq!(t.request.version, version);
                assert_eq!(t.response.version, version);
                assert_eq!(t.parser.has_crlf, has_crlf);

                match t.request.version {
                    Version::Http11 => assert!(t.response.keep_alive),
                    Version::Http10 => assert!(!t.response.keep_alive),
                }
            } else if let Err(e) = expected {
                assert_eq!(t.check_version(), Err(e));
            }
        }
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let cases = [
            (true,  "HEADER: value\r\n", Some(("header", "value"))),
            (true,  "Header: value\r\n", Some(("header", "value"))),
            (true,  "header: value\r\n", Some(("header", "value"))),
            (true,  "header: \r\n",      Some(("header", ""))),

            (false, "HEADER: value\n",   Some(("header", "value"))),
            (false, "Header: value\n",   Some(("header", "value"))),
            (false, "header: value\n",   Some(("header", "value"))),
            (false, "header: \n",        Some(("header", ""))),
            (true,  "Header : v\r\n",    Some(("header ", "v"))),
            (false, "Header : v\n",      Some(("header ", "v"))),

            (true,  "Header: value\r",   None),
            (false, "Header: value\r",   None),
            (true,  "Header: value",     None),
            (false, "Header: value",     None),
            (true,  "header:value\n",    None),
            (false, "header:value\n",    None),
            (true,  "header:\n",         None),
            (false, "header:\n",         None),
            (true,  ": value\r\n",       None),
            (false, ": value\r\n",       None),
            (true,  ": \r\n",            None),
            (false, ": \r\n",            None),
            (true,  ": value\n",         None),
            (false, ": value\n",         None),
            (true,  ": \n",              None),
            (false, ": \n",              None),

            (false, "HEADER: value\r\n", Some(("header", "value\r"))),
            (false, "Header: value\r\n", Some(("header", "value\r"))),
            (false, "header: value\r\n", Some(("header", "value\r"))),
            (false, "header: \r\n",      Some(("header", "\r"))),
        ];

        for (has_crlf, header, expected) in cases {
            let mut t = HttpConnection::from_req(header);
            t.parser.has_crlf = has_crlf;

            if let Some((name, value)) = expected {
                let header = t.parse_header().unwrap().unwrap();

                assert_eq!(str_op(header.name), name);
                assert_eq!(str_op(header.value), value);
            } else {
                assert_eq!(t.parse_header(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_headers() {
        #[rustfmt::skip]
        let cases = [
            (
                true, "HEADER: value\r\n\r\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                false, "HEADER: value\n\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                true, "HEADER: value\r\nQwE: value\r\nasd: value\r\n\r\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                false, "HEADER: value\nQwE: value\nasd: value\n\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                true, "Empty-Value: \r\n\r\n",
                Some((vec!["empty-value"], "")),
            ),
            (
                true, "Space-Value:   \r\n\r\n",
                Some((vec!["space-value"], "  ")),
            ),
            (
                true, "Multi: value1\r\nMulti: value2\r\n\r\n",
                Some((vec!["multi"], "value1")),
            ),

            (true, ": empty-name\r\n\r\n", None),
            (true, "No-Colon value\r\n\r\n", None),
            (
                true, "Valid: ok\r\nInvalidname\r\nNext: value\r\n\r\n",
                None,
            ),
            (true, "Header: value\n\n", None),
        ];

        for (has_crlf, headers, expected) in cases {
            let mut t = HttpConnection::from_req(headers);
            t.parser.has_crlf = has_crlf;

            if let Some((names, value)) = expected {
                assert_eq!(t.parse_headers(), Ok(()));

                for name in names {
                    assert_eq!(str(t.request.header(name.as_bytes())), Some(value));
                }
            } else {
                assert_eq!(t.parse_headers(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_special_header() {
        #[rustfmt::skip]
        let cases = [
            ("content-length: 1256\n\n", Ok((Some(1256), None))),
            ("content-length: 4096\n\n", Ok((Some(4096), None))),
            (
                "content-length: 1256\nconnection: keep-alive\n\n",
                Ok((Some(1256), Some(true)))
            ),
            ("connection: keep-alive\n\n", Ok((None, Some(true)))),
            (
                "content-length: 1256\nconnection: close\n\n",
                Ok((Some(1256), Some(false)))
            ),
            ("connection: close\n\n", Ok((None, Some(false)))),


            ("connection: keep_alive\n\n", Err(ErrorKind::InvalidConnection)),
            ("connection: qwerrew\n\n", Err(ErrorKind::InvalidConnection)),
            ("content-length: 12asd\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 123u64\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 4097\n\n", Err(ErrorKind::BodyTooLarge)),
            ("content-length: 123.9435\n\n", Err(ErrorKind::InvalidContentLength)),
            (
                "content-length: 999999999999999999999\n\n",
                Err(ErrorKind::InvalidContentLength)
            ),
        ];

        for (headers, result) in cases {
            let mut t = HttpConnection::from_req(headers);

            if let Ok((content_length, keep_alive)) = result {
                assert_eq!(t.parse_headers(), Ok(()));
                assert!(t.request.headers.headers.is_empty());

                if let Some(len) = content_length {
                    assert_eq!(t.request.headers.content_length, Some(len));
                }
                if let Some(keep_alive) = keep_alive {
                    assert_eq!(t.response.keep_alive, keep_alive);
                }
            } else if let Err(e) = result {
                assert_eq!(t.parse_headers(), Err(e));
            }
        }
    }

    macro_rules! parse_request {
        ($cases:expr) => {
            for (req, result) in $cases {
                let mut t = HttpConnection::from_req(req);

                if let Ok(result) = result {
                    assert_eq!(t.parse_sync(), Ok(result.2));

                    assert_eq!(t.request.method(), result.0);
                    assert_eq!(t.request.url().target(), result.1);
                    assert_eq!(t.response.version, result.2);

                    for (name, value) in result.3 {
                        assert_eq!(
                            str(t.request.header(name.as_bytes())),
                            Some(value.to_string()).as_deref()
                        );
                    }
                    assert_eq!(t.request.body().as_bytes(), result.4);
                    assert_eq!(t.response.keep_alive, result.5);
                } else if let Err(e) = result {
                    assert_eq!(t.parse_sync(), Err(e));
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((
                    Method::Get, "/".to_string(), Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "GET /api/qwe/name/len/qwe HTTP/1.1\r\n\r\n",
                Ok((
                    Method::Get, "/api/qwe/name/len/qwe".to_string(), Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "GET / HTTP/1.1\n\n",
                Ok((
                    Method::Get, "/".to_string(), Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "POST /test HTTP/1.1\r\nHOST: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Post, "/test".to_string(), Version::Http11,
                    vec![("host", "127.0.0.1")],
                    None, true,
                )),
            ),
            (
                "GET /file HTTP/1.1\ncontent-length: 12\n\nHello world!",
                Ok((
                    Method::Get, "/file".to_string(), Version::Http11,
                    vec![],
                    Some(b"Hello world!" as &[u8]), true,
                )),
            ),
            (
                "HEAD / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
                Ok((
                    Method::Head, "/".to_string(), Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "OPTIONS / HTTP/1.1\r\nCoNNEctIon: close\r\n\r\n",
                Ok((
                    Method::Options, "/".to_string(), Version::Http11,
                    vec![],
                    None, false
                )),
            ),
            (
                "PATCH / HTTP/1.0\r\nconnection: keep-alive\r\n\r\n",
                Ok((
                    Method::Patch, "/".to_string(), Version::Http10,
                    vec![],
                    None, true
                )),
            ),
            (
                "DELETE / HTTP/1.0\r\nConnection: close\r\n\r\n",
                Ok((
                    Method::Delete, "/".to_string(), Version::Http10,
                    vec![],
                    None, false
                )),
            ),
            (
                "GET / HTTP/1.0\r\n\r\n",
                Ok((
                    Method::Get, "/".to_string(), Version::Http10,
                    vec![],
                    None, false
                )),
            ),
            (
"POST /upload HTTP/1.1\r\nContent-Type: application/json\r
Content-Length: 17\r\n\r\n{\"data\": \"value\"}",
                Ok((
                    Method::Post, "/upload".to_string(), Version::Http11,
                    vec![("content-type", "application/json")],
                    Some(b"{\"data\": \"value\"}" as &[u8]), true,
                )),
            ),
            (
                "GET /empty HTTP/1.1\r\nX-Empty: \r\nX-Space: \r\n\r\n",
                Ok((
                    Method::Get, "/empty".to_string(), Version::Http11,
                    vec![("x-empty", ""), ("x-space", "")],
                    None, true,
                )),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                " GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET",
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET ",
                Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET  HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET /HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET / HTTP/1.1 \r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\nq: w\r\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET /empty HTTP/1.1\r\nX-Empty:\r\nX-Space: \r\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nQ: w\n\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nQ: w\r\nW: w\n\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\nbody",
                Err(ErrorKind::BodyTooLarge),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: invalid\r\n\r\nbody",
                Err(ErrorKind::InvalidContentLength),
            ),
        ];

        for (req, expected) in cases {
            let mut t = HttpConnection::from_req(req);
            assert_eq!(t.parse_sync(), Err(expected));
        }
    }

    #[test]
    fn forwarded_for_strips_ports_and_brackets() {
        #[rustfmt::skip]
        let cases = [
            ("203.0.113.1",           Some("203.0.113.1")),
            ("203.0.113.1:443",       Some("203.0.113.1")),
            ("::1",                   Some("::1")),
            ("[::1]",                 Some("::1")),
            ("[::1]:8080",            Some("::1")),
            ("not-an-ip",             None),
        ];

        for (value, expected) in cases {
            let request =
                Request::new(&ReqLimits::default()).with_header(b"x-forwarded-for", value.as_bytes());
            let expected: Option<IpAddr> = expected.map(|ip| ip.parse().unwrap());
            assert_eq!(request.forwarded_for(), expected);
        }
    }

    #[test]
    fn forwarded_for_chain_exposes_every_parseable_hop() {
        let request = Request::new(&ReqLimits::default())
            .with_header(b"x-forwarded-for", b"203.0.113.1:443, garbage, [::1]:8080");

        let expected: Vec<IpAddr> = vec!["203.0.113.1".parse().unwrap(), "::1".parse().unwrap()];
        assert_eq!(request.forwarded_for_chain(), expected);
    }
}

#[cfg(test)]
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Test-only synchronous wrapper: every fixture in this module fits in
    /// one buffer fill, so no further socket reads are ever awaited.
    pub(crate) fn parse_sync(&mut self) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        let raw_target = self.parse_raw_target()?;
        self.check_version()?;
        self.parse_headers()?;

        let host = self.request.headers.get(b"host").unwrap_or(b"");
        self.request.url = Url::parse(host, &raw_target, &self.req_limits)?;

        if self.is_chunked() {
            let raw = self
                .parser
                .get_slice(self.parser.position, self.parser.len - self.parser.position)
                .unwrap_or(&[]);
            let decoded = body::decode_chunked(raw, self.req_limits.body_size)?;
            self.request.body = self.decode_body(&decoded)?;
            return Ok(self.request.version);
        }

        match self.request.headers.content_length {
            Some(len) => {
                let available = self.parser.len - self.parser.position;
                if available != len {
                    return Err(ErrorKind::BodyMismatch {
                        expected: len,
                        available,
                    });
                }
                let slice = self
                    .parser
                    .get_slice(self.parser.position, len)
                    .ok_or(ErrorKind::BodyMismatch {
                        expected: len,
                        available,
                    })?
                    .to_vec();
                self.request.body = self.decode_body(&slice)?;
            }
            None => {
                let available = self.parser.len - self.parser.position;
                if available != 0 {
                    return Err(ErrorKind::UnexpectedBody(available));
                }
            }
        }

        Ok(self.request.version)
    }
}
