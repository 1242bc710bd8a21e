//! corehttpd - High-performance, embeddable HTTP/1.1 server core
//!
//! A performance-oriented HTTP connection/request/response engine with
//! comprehensive configuration for memory management, connection handling,
//! and wire-protocol support. Designed for services requiring fine-grained
//! control over resources rather than a batteries-included web framework —
//! routing, templating, and middleware stacks are left to the embedder.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: Full protocol with persistent connections, chunked
//!   transfer-encoding, and byte-range serving (`Range`/`Content-Range`,
//!   including `multipart/byteranges`).
//! - **HTTP/1.0**: Basic protocol support for legacy clients and simple
//!   requests (close-delimited bodies, no chunked framing).
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in DoS/DDoS protection** - enabled by default, with no performance penalty.
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement the [`ConnectionFilter`] trait to
//!   reject unwanted connections at the TCP level.
//!
//! ## 🚀 Performance & Memory
//! - **Zero-allocation steady state** - request/response buffers are reused
//!   across keep-alive requests.
//! - **Pre-allocated memory for each connection** - linear and transparent scaling.
//!
//! ## 🌐 Protocol & Management
//! - **Full HTTP stack** - `HTTP/1.1`, `HTTP/1.0`, with keep-alive.
//! - **Automatic protocol detection for each request** - keep-alive eliminates
//!   the need for manual protocol selection.
//! - **Storing data between requests** - ability to store data between requests in a
//!   single connection using the [`ConnectionData`] trait.
//! - **Streaming responses** - [`Response::body_stream`]/[`Response::body_chunked`]
//!   for bodies that shouldn't be fully buffered up front.
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - automatic 503 responses when overloaded.
//! - **Custom error format** - structured JSON (with codes/descriptions) or a
//!   plain HTTP response, see [`limits::ServerLimits::json_errors`].
//! - **Resource protection** - automatic closure of connections exceeding set limits.
//! - **Orderly shutdown** - [`Server::stop_listening`] drains in-flight
//!   connections instead of cutting them off.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `corehttpd` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```bash
//! cargo add corehttpd tokio --features tokio/full
//! ```
//! Or manually:
//! ```toml
//! [dependencies]
//! corehttpd = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use corehttpd::{Server, Handler, Request, Response, Handled, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! # Use Cases
//!
//! - **High-throughput microservices** - configurable for specific workloads
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults
//! - **Performance-critical applications** - zero-allocation steady state
//! - **Legacy system integration** - HTTP/1.0 compatibility
pub(crate) mod http {
    pub(crate) mod body;
    pub mod query;
    pub(crate) mod range;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub mod dispatch;
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub mod config;
pub(crate) mod errors;
pub mod limits;
pub mod rpc;
pub mod stats;

pub use crate::{
    errors::{ParseFailure, RequestError},
    http::{
        body::{Body, Part, PartData},
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::{
        connection::{ConnectionData, ConnectionFilter},
        dispatch,
        server_impl::{Handler, Server, ServerBuilder},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use corehttpd::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
