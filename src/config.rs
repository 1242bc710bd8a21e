//! Non-limit server configuration: bind address, upload spill policy,
//! error-page verbosity, and compression thresholds.
//!
//! Kept separate from [`crate::limits`] because these knobs aren't
//! per-connection buffer sizing math, they're policy. Follows the same
//! `Default` + `..Default::default()` builder convention as the rest of
//! the limits module.

use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Server-wide configuration that isn't a buffer-sizing limit.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen port. Only informational here — the `TcpListener` is
    /// still supplied by the embedder via `ServerBuilder::listener`, this
    /// field exists so the value used to build that listener can be
    /// reported alongside the rest of the configuration.
    pub port: u16,
    /// IP the listener was bound to (default: unspecified / any).
    pub bind_address: IpAddr,

    /// Minimum size in bytes before a multipart part is spilled to a
    /// temporary file instead of being kept in memory (default: `256 KiB`).
    pub store_file_upload_in_file_at_size: usize,
    /// Directory used for spilled uploads. Created lazily on first spill;
    /// never created if no upload ever crosses the threshold (default:
    /// the platform temp dir).
    pub temp_dir: PathBuf,

    /// Include the error's message in the default error page body
    /// (default: `false`, matching a production-safe default).
    pub output_exception_information: bool,

    /// Minimum response body size worth gzip-encoding (default: `1400`,
    /// roughly one TCP segment — smaller bodies aren't worth the CPU).
    pub output_gzip_threshold: usize,
    /// Content types eligible for gzip compression when the client
    /// advertises `Accept-Encoding: gzip`. Matched by exact value or
    /// `prefix/*` wildcard. Empty by default: compression is opt-in.
    pub compressible_content_types: Vec<String>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::from([0, 0, 0, 0]),

            store_file_upload_in_file_at_size: 256 * 1024,
            temp_dir: std::env::temp_dir(),

            output_exception_information: false,

            output_gzip_threshold: 1400,
            compressible_content_types: Vec::new(),

            _priv: (),
        }
    }
}

impl ServerConfig {
    /// True if `content_type` (the response's `Content-Type`, without
    /// parameters) is on the compressible list.
    pub(crate) fn is_compressible(&self, content_type: &str) -> bool {
        let content_type = content_type.split(';').next().unwrap_or("").trim();

        self.compressible_content_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(prefix) => content_type
                    .split('/')
                    .next()
                    .is_some_and(|ct_prefix| ct_prefix.eq_ignore_ascii_case(prefix)),
                None => content_type.eq_ignore_ascii_case(allowed),
            }
        })
    }
}

/// Idle/read/write timeouts, kept distinct from [`crate::limits::ConnLimits`]
/// so the same names from spec's external-interface table (`IdleTimeout`,
/// `ReadTimeout`, `WriteTimeout`) have an obvious home; the values actually
/// enforced live on `ConnLimits` (`socket_read_timeout`/`socket_write_timeout`)
/// plus this crate's keep-alive idle wait.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub idle_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(3),
        }
    }
}
