//! A highly efficient, zero-allocation HTTP response builder for embedded web servers.

use crate::{
    config::ServerConfig,
    http::{
        range,
        request::Request,
        types::{Method, StatusCode, Version},
    },
    limits::RespLimits,
    BodyWriter, WriteBuffer,
};
use flate2::{write::GzEncoder, Compression};
use std::{borrow::Cow, io::Write as _, mem, pin::Pin, rc::Rc, sync::Arc};
use tokio::io::AsyncRead;

#[derive(Debug)]
/// HTTP response builder for constructing server responses.
///
/// Provides a fluent interface for building HTTP responses with status codes,
/// headers, and body content. Automatically handles content-length calculation
/// and connection management.
///
/// Build responses by chaining methods in strict order: [`status()`](Response::status)
/// -> headers -> any body method.
///
/// Instances are created automatically by the server and passed to
/// the [`Handler::handle`](crate::Handler::handle).
///
/// # Examples
/// ```
/// use corehttpd::{Handled, Request, Response, StatusCode};
///
/// // In your implementation `Handler`
/// async fn handle(_req: &Request, resp: &mut Response) -> Handled {
///     resp
///         .status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>")
/// }
/// ```
///
/// # Panics
/// All methods perform validity checks in `debug` mode that panic on violations.
/// In `release` mode, these checks are omitted for performance, which may
/// produce invalid HTTP responses. Before creating a release version, conduct tests.
pub struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
    out_body: OutBody,
    exception_handler: Option<Box<dyn FnOnce(&str) + Send>>,
    raised_error: Option<RaisedError>,
}

#[doc(hidden)]
pub struct Handled(());

/// What a handler passed to [`Response::http_error`], carried until the
/// connection loop resolves it against the error boundary.
pub(crate) struct RaisedError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

/// Everything that can follow the header block once it's been written to
/// `buffer`. [`OutBody::None`] means the body bytes are already appended to
/// `buffer` (the common, eagerly-materialized case); the other two variants
/// are produced by [`Response::body_stream`]/[`Response::body_chunked`] and
/// are drained by the connection loop after `buffer` goes out over the wire.
pub(crate) enum OutBody {
    None,
    Stream(Pin<Box<dyn AsyncRead + Send>>, u64),
    Chunks(Box<dyn Iterator<Item = Vec<u8>> + Send>),
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
            out_body: OutBody::None,
            exception_handler: None,
            raised_error: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
        self.out_body = OutBody::None;
        self.exception_handler = None;
        self.raised_error = None;
    }

    /// Clears everything written so far but keeps the negotiated `version`
    /// and `keep_alive`, unlike [`Self::reset`]. Used by the error boundary
    /// to discard whatever a declining `ErrorHandler` partially wrote before
    /// rendering the default error page, without losing the wire framing
    /// already negotiated for this request.
    #[inline(always)]
    pub(crate) fn reopen(&mut self) {
        self.buffer.clear();
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
        self.out_body = OutBody::None;
        self.exception_handler = None;
        self.raised_error = None;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &Vec<u8> {
        &self.buffer
    }

    #[inline(always)]
    pub(crate) fn take_out_body(&mut self) -> OutBody {
        mem::replace(&mut self.out_body, OutBody::None)
    }

    #[inline(always)]
    pub(crate) fn take_exception_handler(&mut self) -> Option<Box<dyn FnOnce(&str) + Send>> {
        self.exception_handler.take()
    }

    #[inline(always)]
    pub(crate) fn take_raised_error(&mut self) -> Option<RaisedError> {
        self.raised_error.take()
    }
}

/// Methods that work for every response.
impl Response {
    /// Forces the connection to close after a response.
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when:
    /// - Called after any finalizing method (method returning `Handler`)
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }

    /// Registers a callback invoked if the response body stream (see
    /// [`body_stream`](Self::body_stream)/[`body_chunked`](Self::body_chunked))
    /// raises *after* headers were already flushed to the socket. The wire
    /// framing can no longer be corrected at that point — this exists purely
    /// for telemetry and connection-cleanup purposes.
    #[inline]
    pub fn on_stream_exception<F: FnOnce(&str) + Send + 'static>(&mut self, f: F) -> &mut Self {
        self.exception_handler = Some(Box::new(f));
        self
    }

    /// Signals that this request should complete as an HTTP error outcome —
    /// a deliberate status the handler raised, not a bug — routed through
    /// the server's `ErrorHandler` hook the same way a rejected request is
    /// (see [`crate::ServerBuilder::error_handler`]). If the hook is unset
    /// or declines, the default handler renders a minimal page using
    /// `status` and `message` as given here, never anything the hook did in
    /// between: a failing hook can't hide the original status.
    ///
    /// Takes the place of calling [`Self::status`]/[`Self::body`] directly;
    /// the connection loop builds the actual wire response once the handler
    /// returns.
    #[inline]
    pub fn http_error(&mut self, status: StatusCode, message: impl Into<String>) -> Handled {
        self.raised_error = Some(RaisedError {
            status,
            message: message.into(),
        });
        Handled(())
    }
}

/// Methods for status line and headers.
impl Response {
    /// Sets the HTTP status code for the response.
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be first and called only once`
    ///
    /// Panics in `debug` mode when called multiple times or after any body method.
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.into_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header to the response.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")        // &str, &str
    ///     .header("x-custom-id", 128)                  // &str, i32
    ///     .header("x-cache-enabled", true)             // &str, bool
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Add a multi-value header to the response
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    #[inline]
    #[track_caller]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut self.buffer);

            for value in iter {
                split.write_to(&mut self.buffer);
                value.write_to(&mut self.buffer);
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a header with parameters to the response.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    #[inline]
    #[track_caller]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut self.buffer);
            if let Some(val) = first_val {
                self.buffer.extend_from_slice(b"=");
                val.write_to(&mut self.buffer);
            }

            for (key, value) in iter {
                split.write_to(&mut self.buffer);
                key.write_to(&mut self.buffer);
                if let Some(val) = value {
                    self.buffer.extend_from_slice(b"=");
                    val.write_to(&mut self.buffer);
                }
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Sets the response body and finalizes the response.
    ///
    /// # Side Effects
    /// - Adds a `connection` header if necessary
    /// - Calculates and sets the `content-length` header
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure and finalizes the response.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }

    /// Streams a body of known length from an [`AsyncRead`] rather than
    /// buffering it whole. `Content-Length` is emitted up front since the
    /// length is already known; the bytes themselves are pulled from
    /// `reader` by the connection loop after the headers are on the wire.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn body_stream<R>(&mut self, reader: R, length: u64) -> Handled
    where
        R: AsyncRead + Send + 'static,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_stream_headers(Some(length));
        self.out_body = OutBody::Stream(Box::pin(reader), length);
        self.state = ResponseState::Complete;
        Handled(())
    }

    /// Streams a body of unknown length as a lazy sequence of chunks. On
    /// `HTTP/1.1` this emits `Transfer-Encoding: chunked`; on `HTTP/1.0`,
    /// which has no chunked framing, it close-delimits the response instead
    /// (forces [`close()`](Self::close)).
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn body_chunked<I>(&mut self, chunks: I) -> Handled
    where
        I: Iterator<Item = Vec<u8>> + Send + 'static,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_stream_headers(None);
        self.out_body = OutBody::Chunks(Box::new(chunks));
        self.state = ResponseState::Complete;
        Handled(())
    }

    /// Gzip-encodes `data` and finalizes the response as `Content-Encoding:
    /// gzip` when the request negotiates it: `HTTP/1.1`, `gzip` present in
    /// `Accept-Encoding`, `content_type` on `config`'s compressible list,
    /// `data` at least `config.output_gzip_threshold` bytes, and no `Range`
    /// negotiated on this request. Otherwise falls back to a plain
    /// [`body`](Self::body) call.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    pub fn body_compressed(
        &mut self,
        req: &Request,
        config: &ServerConfig,
        content_type: &str,
        data: &[u8],
    ) -> Handled {
        let wants_gzip = req
            .header(b"accept-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().windows(4).any(|w| w == b"gzip"));

        let eligible = self.version == Version::Http11
            && wants_gzip
            && req.header(b"range").is_none()
            && data.len() >= config.output_gzip_threshold
            && config.is_compressible(content_type);

        if eligible {
            if let Ok(compressed) = gzip_encode(data) {
                self.header("content-encoding", "gzip");
                return self.body(compressed);
            }
        }

        self.body(data)
    }

    /// Serves `data` honoring a `Range` request header: a single satisfiable
    /// range yields `206` with `Content-Range`; multiple ranges yield `206
    /// multipart/byteranges`; an unsatisfiable range yields `416`; no (or an
    /// empty-body) range falls back to a plain `200`.
    ///
    /// Must be called before [`status()`](Self::status) — the status code is
    /// chosen internally based on the negotiated range. Only meaningful for
    /// `GET` requests.
    ///
    /// # Panics
    /// Error message: `Must be first and called only once`
    #[inline]
    #[track_caller]
    pub fn body_ranged(&mut self, req: &Request, content_type: &str, data: &[u8]) -> Handled {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );
        debug_assert!(req.method() == Method::Get, "Range serving is GET-only");

        let total = data.len() as u64;
        let parsed = req
            .header(b"range")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(|v| range::parse_range_header(v, total))
            .unwrap_or(range::ParsedRange::Absent);

        match parsed {
            range::ParsedRange::Absent => {
                self.status(StatusCode::Ok);
                self.header("accept-ranges", "bytes");
                self.header("content-type", content_type);
                self.body(data)
            }
            range::ParsedRange::Unsatisfiable => {
                self.status(StatusCode::RangeNotSatisfiable);
                self.header("accept-ranges", "bytes");
                self.header("content-range", format!("bytes */{total}"));
                self.body("")
            }
            range::ParsedRange::Satisfiable(ranges) if ranges.len() == 1 => {
                let r = ranges[0];
                self.status(StatusCode::PartialContent);
                self.header("accept-ranges", "bytes");
                self.header(
                    "content-range",
                    format!("bytes {}-{}/{total}", r.start, r.end),
                );
                self.header("content-type", content_type);
                self.body(&data[r.start as usize..=r.end as usize])
            }
            range::ParsedRange::Satisfiable(ranges) => {
                let boundary = range::new_boundary();
                let multi_body = range::build_multipart_body(data, &ranges, &boundary);

                self.status(StatusCode::PartialContent);
                self.header("accept-ranges", "bytes");
                self.header(
                    "content-type",
                    format!("multipart/byteranges; boundary={boundary}"),
                );
                self.body(multi_body)
            }
        }
    }
}

fn gzip_encode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        self.posit_length = self.buffer.len();
        self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        self.start_body = self.buffer.len();
        self
    }

    #[inline(always)]
    fn end_body(&mut self) -> Handled {
        let body_len = self.buffer.len() - self.start_body;
        let (arr, _) = Response::number_to_bytes(body_len as u128);

        let target_range = self.posit_length..self.posit_length + 10;
        self.buffer[target_range].copy_from_slice(&arr[29..39]);
        self.state = ResponseState::Complete;

        Handled(())
    }

    /// Writes the header block for a streamed body (known length via
    /// `Content-Length`, or unknown length via `Transfer-Encoding: chunked`
    /// on `HTTP/1.1`, falling back to close-delimiting on `HTTP/1.0`).
    #[inline]
    fn start_stream_headers(&mut self, length: Option<u64>) {
        match length {
            Some(len) => {
                if let Some(value) = self.connection_header() {
                    self.header("connection", value);
                }
                self.header("content-length", len);
            }
            None if self.version == Version::Http11 => {
                self.header("transfer-encoding", "chunked");
                if let Some(value) = self.connection_header() {
                    self.header("connection", value);
                }
            }
            None => {
                self.keep_alive = false;
                self.header("connection", "close");
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self.start_body = self.buffer.len();
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// # Examples
    ///
    /// With [WriteBuffer]:
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         w.write("This goes in the response body");
    ///         w.write("<html>...</html>");
    ///         w.write(true);
    ///     })
    /// # });
    /// ```
    /// With [std::io::Write]:
    /// ```
    /// # corehttpd::run_test(|_, resp| {
    /// use corehttpd::StatusCode;
    /// use std::io::Write;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         write!(w, "This goes in the response body");
    ///         write!(w, "{} - {} = {}", 6, 2, 4);
    ///     })
    /// # });
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to the [`Response`] buffer.
    ///
    /// Implemented for common types like strings, bytes, booleans
    /// and numeric types (excluding floating-point numbers)
    ///
    /// # Note on Floating-Point
    /// Floating-point numbers are not implemented to avoid locale-dependent
    /// formatting and precision issues in protocol headers.
    ///
    /// For explicit float serialization, consider using the
    /// [`ryu`](https://crates.io/crates/ryu)
    /// crate or formatting to string with controlled precision.
    ///
    /// # Example
    /// ```
    /// use corehttpd::WriteBuffer;
    ///
    /// struct MyString(String);
    ///
    /// impl WriteBuffer for MyString {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        ///
        /// This should avoid intermediate allocations and write the
        /// most efficient representation possible.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}


#[cfg(test)]
mod status_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (StatusCode::Ok, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::Found, "HTTP/1.1 302 Found\r\n"),
            (StatusCode::BadRequest, "HTTP/1.1 400 Bad Request\r\n"),
        ];

        for (status, result) in cases {
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);
            assert_eq!(resp.state, ResponseState::Clean);

            resp.status(status);
            assert_eq!(str_op(&resp.buffer), result);
            assert_eq!(resp.state, ResponseState::Headers);
        }
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    fn double_call() {
        Response::new(&RespLimits::default())
            .status(StatusCode::Ok)
            .status(StatusCode::Found);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($method:ident, $(($name:expr $(, $params:expr)*; $result:expr);)*) => {
           #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);

            resp.status(StatusCode::Ok);
            assert_eq!(resp.state, ResponseState::Headers);

            resp.$method($name $(, $params)*);
            assert_eq!(str_op(&resp.buffer[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*}};
    }

    test_header! {header,
        ("name", "value"; "name: value\r\n");
        ("", "value"; ": value\r\n");
        ("name", ""; "name: \r\n");

        ("name", 123; "name: 123\r\n");
        ("name", vec![35, 33, 43]; "name: #!+\r\n");
        ("name", false; "name: false\r\n");
        ("name", -123; "name: -123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::new(&RespLimits::default()).header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }

    test_header! {header_multi,
        ("name", ", ", ["q", "w", "e"]; "name: q, w, e\r\n");
        ("name", ",", [true, false]; "name: true,false\r\n");
        ("name", "; ", [-123, 123]; "name: -123; 123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_before_status() {
        Response::new(&RespLimits::default()).header_multi("Name", ",", ["value1", "value2"]);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_multi("Name", ",", ["value1", "value2"]);
    }

    test_header! {header_params,
        ("name", ", ", [("name", Some("value"))]; "name: name=value\r\n");
        (
            "name", ", ", [("q", Some("1")), ("w", Some("2")), ("e", Some("3"))];
            "name: q=1, w=2, e=3\r\n"
        );
        (
            "name", ";", [("q", Some("v1")), ("w", Some("v2")), ("e", Some("v3"))];
            "name: q=v1;w=v2;e=v3\r\n"
        );
        (
            "name", ", ", [("min", Some(-128)), ("max", Some(128)), ("mean", Some(0))];
            "name: min=-128, max=128, mean=0\r\n"
        );
        (
            "u128", ", ", [("min", Some(u128::MIN)), ("max", Some(u128::MAX))];
            "u128: min=0, max=340282366920938463463374607431768211455\r\n"
        );
        (
            "i128", ", ", [("min", Some(i128::MIN)), ("max", Some(i128::MAX))];
    "i128: min=-170141183460469231731687303715884105728, max=170141183460469231731687303715884105727\r\n"
        );
        (
            "name", ", ", [("debug", Some(true)), ("doc", Some(false))];
            "name: debug=true, doc=false\r\n"
        );
        (
            "name", "; ", [("debug", None), ("text", Some("asd"))];
            "name: debug; text=asd\r\n"
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_before_status() {
        Response::new(&RespLimits::default()).header_params(
            "Name",
            ",",
            [("name1", Some("value1")), ("name2", None)],
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_params("Name", ",", [("name1", Some("value1")), ("name2", None)]);
    }
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn full_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\n",
            "connection: close\r\ncontent-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.header("location", "/api/update");
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        assert_eq!(resp.keep_alive, true);
        resp.close();
        assert_eq!(resp.keep_alive, false);
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[1].to_owned() + result[2]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn full_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.header("location", "/api/update");
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[1].to_owned() + result[2]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "connection: close\r\ncontent-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        assert_eq!(resp.keep_alive, true);
        resp.close();
        assert_eq!(resp.keep_alive, false);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }
}



#[cfg(test)]
mod gzip_tests {
    use super::*;
    use crate::limits::ReqLimits;

    fn make_config() -> ServerConfig {
        ServerConfig {
            output_gzip_threshold: 4,
            compressible_content_types: vec!["text/plain".into()],
            ..ServerConfig::default()
        }
    }

    #[test]
    fn compresses_when_eligible() {
        let req =
            Request::new(&ReqLimits::default()).with_header(b"accept-encoding", b"gzip, deflate");
        let config = make_config();
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.body_compressed(&req, &config, "text/plain", b"a long enough body to compress");

        let text = String::from_utf8_lossy(resp.buffer()).into_owned();
        assert!(text.contains("content-encoding: gzip\r\n"));
    }

    #[test]
    fn skips_compression_without_accept_encoding() {
        let req = Request::new(&ReqLimits::default());
        let config = make_config();
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.body_compressed(&req, &config, "text/plain", b"a long enough body to compress");

        let text = String::from_utf8_lossy(resp.buffer()).into_owned();
        assert!(!text.contains("content-encoding"));
        assert!(text.ends_with("a long enough body to compress"));
    }

    #[test]
    fn skips_compression_for_non_compressible_type() {
        let req = Request::new(&ReqLimits::default()).with_header(b"accept-encoding", b"gzip");
        let config = make_config();
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.body_compressed(&req, &config, "image/png", b"a long enough body to compress");

        let text = String::from_utf8_lossy(resp.buffer()).into_owned();
        assert!(!text.contains("content-encoding"));
    }

    #[test]
    fn skips_compression_below_threshold() {
        let req = Request::new(&ReqLimits::default()).with_header(b"accept-encoding", b"gzip");
        let config = make_config();
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.body_compressed(&req, &config, "text/plain", b"hi");

        let text = String::from_utf8_lossy(resp.buffer()).into_owned();
        assert!(!text.contains("content-encoding"));
    }
}
