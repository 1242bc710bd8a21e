use crate::{
    config::ServerConfig,
    errors::{ErrorKind, ParseFailure, RequestError},
    http::{
        request::{Parser, Request},
        response::{OutBody, RaisedError, Response},
        types::StatusCode,
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::{AllLimits, Handler},
    stats::ServerStats,
    Handled,
};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{atomic::Ordering, Arc},
    time::Instant,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

/// A user hook invoked when a request is rejected before reaching the
/// handler — malformed request lines, oversized headers, disallowed
/// methods, and so on. Returning `None` (or leaving the hook unset on
/// [`crate::ServerBuilder`]) falls back to the built-in plain/JSON error
/// body for the original [`ErrorKind`], so installing a hook that only
/// handles a subset of `RequestError` cases is safe.
pub(crate) type ErrorHook =
    Arc<dyn Fn(&Request, &RequestError, &mut Response) -> Option<Handled> + Sync + Send>;

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    error_handler: Option<ErrorHook>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) stats: Arc<ServerStats>,
    in_active: bool,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(
        handler: Arc<H>,
        error_handler: Option<ErrorHook>,
        limits: AllLimits,
        config: Arc<ServerConfig>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            handler,
            error_handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
            config,
            stats,
            in_active: false,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.stats.enter_keep_alive();
        let result = self.impl_run(stream, client_addr, server_addr).await;

        match self.in_active {
            true => self.stats.leave_active(),
            false => self.stats.leave_keep_alive(),
        }
        self.in_active = false;

        match result {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                let request_error = RequestError::Parse(ParseFailure::from(error));

                let handled = self
                    .error_handler
                    .as_ref()
                    .and_then(|hook| hook(&self.request, &request_error, &mut self.response));

                match handled {
                    Some(_) => {
                        self.conn_limits
                            .write_bytes(stream, self.response.buffer())
                            .await
                    }
                    None => {
                        let RequestError::Parse(ParseFailure(ref error)) = request_error else {
                            unreachable!("constructed as RequestError::Parse above")
                        };

                        self.conn_limits
                            .send_error(
                                stream,
                                error,
                                self.request.version(),
                                self.server_limits.json_errors,
                            )
                            .await
                    }
                }
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired() {
            self.reset_request_response();

            if self
                .parser
                .read_until_headers_end(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                break;
            }

            self.stats.leave_keep_alive_to_active();
            self.in_active = true;

            self.request.set_peer(client_addr, server_addr);
            self.response.version = self.parse(stream).await?;

            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;

            if let Some(raised) = self.response.take_raised_error() {
                self.resolve_raised_error(raised);
            }

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            let stream_result = self.drain_out_body(stream).await;

            if let Err(ref e) = stream_result {
                if let Some(handler) = self.response.take_exception_handler() {
                    handler(&e.to_string());
                }
            }

            if let Some(cleanup) = self.request.take_cleanup() {
                cleanup();
            }

            stream_result?;

            self.stats.active_to_keep_alive();
            self.in_active = false;

            if !self.response.keep_alive || crate::server::connection::is_shutting_down() {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Resolves an error a handler raised via [`Response::http_error`]: tries
    /// the installed [`ErrorHook`] first, exactly as [`Self::run`] does for a
    /// rejected request. If the hook declines (or none is installed), wipes
    /// out anything the hook partially wrote — via [`Response::reopen`] — and
    /// renders the default page from `raised`'s *original* status/message, so
    /// a misbehaving or declining hook can never hide or alter the status the
    /// handler actually raised.
    #[inline]
    fn resolve_raised_error(&mut self, raised: RaisedError) {
        let request_error = RequestError::Http {
            status: raised.status.code(),
            message: raised.message.clone(),
        };

        let handled = self
            .error_handler
            .as_ref()
            .and_then(|hook| hook(&self.request, &request_error, &mut self.response));

        if handled.is_none() {
            self.response.reopen();
            render_default_error_page(
                &mut self.response,
                raised.status,
                &raised.message,
                self.config.output_exception_information,
            );
        }
    }

    /// Drains whatever body [`Response::body_stream`]/[`Response::body_chunked`]
    /// left queued after the header block already went out. A `None` body
    /// (the common, fully-buffered case) is a no-op.
    #[inline]
    async fn drain_out_body(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        match self.response.take_out_body() {
            OutBody::None => Ok(()),
            OutBody::Stream(mut reader, length) => {
                let mut remaining = length;
                let mut buf = vec![0u8; 64 * 1024];

                while remaining > 0 {
                    let want = buf.len().min(remaining as usize);
                    let read = tokio::select! {
                        biased;

                        result = reader.read(&mut buf[..want]) => result?,
                        _ = sleep(self.conn_limits.socket_write_timeout) => {
                            return Err(io::Error::new(io::ErrorKind::TimedOut, "stream read timeout").into());
                        },
                    };

                    if read == 0 {
                        break;
                    }

                    self.conn_limits.write_bytes(stream, &buf[..read]).await?;
                    remaining -= read as u64;
                }

                Ok(())
            }
            OutBody::Chunks(chunks) => {
                for chunk in chunks {
                    let header = format!("{:x}\r\n", chunk.len());
                    self.conn_limits.write_bytes(stream, header.as_bytes()).await?;
                    self.conn_limits.write_bytes(stream, &chunk).await?;
                    self.conn_limits.write_bytes(stream, b"\r\n").await?;
                }

                self.conn_limits.write_bytes(stream, b"0\r\n\r\n").await?;
                Ok(())
            }
        }
    }
}

/// The default page for a handler-raised error the hook declined (or none
/// was installed): a minimal `text/html` body carrying the original status,
/// and the message too when `output_exception_information` is enabled.
fn render_default_error_page(
    response: &mut Response,
    status: StatusCode,
    message: &str,
    output_exception_information: bool,
) {
    let body = if output_exception_information {
        format!(
            "<html><body><h1>{} {}</h1><p>{}</p></body></html>",
            status.code(),
            status.reason(),
            message
        )
    } else {
        format!("<html><body><h1>{} {}</h1></body></html>", status.code(), status.reason())
    };

    response.status(status).header("content-type", "text/html").body(body);
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: &ErrorKind,
        version: crate::Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> bool {
        !self.response.keep_alive
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

/// Global brutal-shutdown flag: when set, workers stop accepting new requests
/// on keep-alive connections as soon as the connection goes idle, instead of
/// waiting out the full connection lifetime.
pub(crate) static SHUTTING_DOWN: std::sync::atomic::AtomicBool =
    std::sync::atomic::AtomicBool::new(false);

pub(crate) fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::Acquire)
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use corehttpd::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use corehttpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// Two-stage filtering with a database lookup deferred to the async stage:
/// ```
/// use std::net::SocketAddr;
/// use corehttpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(())
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection, run after [`filter`](Self::filter) succeeds.
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                error_handler: None,
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
                config: Arc::new(ServerConfig::default()),
                stats: Arc::new(ServerStats::new()),
                in_active: false,
            }
        }
    }
}

#[cfg(test)]
mod error_hook {
    use super::def_handler::DefHandler;
    use super::*;
    use crate::StatusCode;

    // Mirrors the decision `run()` makes once parsing fails: try the hook,
    // fall back to the original error's canned bytes if it declines.
    fn resolve(t: &mut HttpConnection<DefHandler, ()>, error: ErrorKind) -> Option<Handled> {
        let request_error = RequestError::Parse(ParseFailure::from(error));
        t.error_handler
            .as_ref()
            .and_then(|hook| hook(&t.request, &request_error, &mut t.response))
    }

    #[test]
    fn hook_response_overrides_default_body() {
        let mut t = HttpConnection::from_req("BAD REQUEST LINE HERE\r\n\r\n");
        let error = t.parse_sync().unwrap_err();

        t.error_handler = Some(Arc::new(|_req, _err, resp| {
            Some(resp.status(StatusCode::ImaTeapot).body("custom error page"))
        }));

        let handled = resolve(&mut t, error);
        assert!(handled.is_some());
        assert!(String::from_utf8_lossy(t.response.buffer()).contains("custom error page"));
    }

    #[test]
    fn hook_declining_keeps_original_error_for_fallback() {
        let mut t = HttpConnection::from_req("BAD REQUEST LINE HERE\r\n\r\n");
        let error = t.parse_sync().unwrap_err();
        assert_eq!(error, ErrorKind::InvalidMethod);

        t.error_handler = Some(Arc::new(|_req, _err, _resp| None));

        let request_error = RequestError::Parse(ParseFailure::from(error));
        let handled = t
            .error_handler
            .as_ref()
            .and_then(|hook| hook(&t.request, &request_error, &mut t.response));
        assert!(handled.is_none());

        // The fallback in `run()` destructures `request_error` back out to the
        // original `ErrorKind` rather than trusting anything the hook did.
        let RequestError::Parse(ParseFailure(ref original)) = request_error else {
            unreachable!()
        };
        assert_eq!(original, &ErrorKind::InvalidMethod);
    }

    #[test]
    fn unset_hook_never_intercepts() {
        let mut t = HttpConnection::from_req("BAD REQUEST LINE HERE\r\n\r\n");
        let error = t.parse_sync().unwrap_err();
        assert!(t.error_handler.is_none());

        let handled = resolve(&mut t, error);
        assert!(handled.is_none());
    }

    // Scenario: a handler calls `Response::http_error`, the installed hook
    // itself raises a *different* status, and the wire response must still
    // carry the handler's original status, never the hook's.
    #[test]
    fn handler_raised_error_hook_override_replaces_body_but_not_status_guarantee() {
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        t.parse_sync().unwrap();

        t.error_handler = Some(Arc::new(|_req, err, resp| {
            let RequestError::Http { status, .. } = err else {
                return None;
            };
            assert_eq!(*status, 201);
            Some(resp.status(StatusCode::Forbidden).body("hook took over"))
        }));

        let raised = crate::http::response::RaisedError {
            status: StatusCode::Created,
            message: "created but flagged".into(),
        };
        t.resolve_raised_error(raised);

        let body = String::from_utf8_lossy(t.response.buffer());
        assert!(body.starts_with("HTTP/1.1 403"));
        assert!(body.contains("hook took over"));
    }

    #[test]
    fn handler_raised_error_preserved_when_hook_declines() {
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        t.parse_sync().unwrap();

        t.error_handler = Some(Arc::new(|_req, _err, _resp| None));

        let raised = crate::http::response::RaisedError {
            status: StatusCode::Created,
            message: "created but flagged".into(),
        };
        t.resolve_raised_error(raised);

        let body = String::from_utf8_lossy(t.response.buffer());
        assert!(body.starts_with("HTTP/1.1 201"));
        assert!(!body.contains("hook took over"));
    }

    #[test]
    fn handler_raised_error_default_page_omits_message_unless_configured() {
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        t.parse_sync().unwrap();

        let raised = crate::http::response::RaisedError {
            status: StatusCode::InternalServerError,
            message: "db connection refused".into(),
        };
        t.resolve_raised_error(raised);

        let body = String::from_utf8_lossy(t.response.buffer());
        assert!(body.starts_with("HTTP/1.1 500"));
        assert!(!body.contains("db connection refused"));
    }

    #[test]
    fn handler_raised_error_default_page_includes_message_when_configured() {
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        t.parse_sync().unwrap();
        t.config = Arc::new(ServerConfig {
            output_exception_information: true,
            ..ServerConfig::default()
        });

        let raised = crate::http::response::RaisedError {
            status: StatusCode::InternalServerError,
            message: "db connection refused".into(),
        };
        t.resolve_raised_error(raised);

        let body = String::from_utf8_lossy(t.response.buffer());
        assert!(body.contains("db connection refused"));
    }
}
