//! URL dispatch resolver: an ordered list of (domain, path) mappings that
//! rebases the request [`Url`] and hands it to the matched handler, the way
//! a reverse proxy peels off a routing prefix before forwarding. Nothing in
//! the teacher corresponds to this directly — it generalizes the single
//! top-level [`Handler`] into a tree, grounded entirely in [`Url::rebase`]
//! and the [`ConnectionFilter`]/[`Handler`] trait-object conventions already
//! used by this module's sibling `connection.rs`.

use crate::{
    server::connection::ConnectionData,
    Handled, Handler, Request, Response, Url,
};
use std::{future::Future, pin::Pin};

/// A handler that may decline to produce a response, letting a [`Resolver`]
/// fall through to the next mapping. Every [`Handler`] is automatically
/// usable as a non-skippable dispatch target via [`Resolver::mount`]; this
/// trait itself only needs implementing directly for something that wants
/// to veto a match (e.g. a nested [`Resolver`], which declines when none of
/// its own mappings match).
trait DispatchHandler<S>: Sync + Send
where
    S: ConnectionData,
{
    fn try_handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> impl Future<Output = Option<Handled>> + Send;
}

/// Object-safe adapter over [`DispatchHandler`], so a [`Resolver`] can hold
/// a `Vec` of heterogeneous mapping targets (plain handlers and nested
/// resolvers alike).
trait DynDispatch<S>: Sync + Send {
    fn try_handle_dyn<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> Pin<Box<dyn Future<Output = Option<Handled>> + Send + 'a>>;
}

impl<S, T> DynDispatch<S> for T
where
    T: DispatchHandler<S>,
    S: ConnectionData,
{
    fn try_handle_dyn<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> Pin<Box<dyn Future<Output = Option<Handled>> + Send + 'a>> {
        Box::pin(self.try_handle(connection_data, request, response))
    }
}

/// Wraps a plain [`Handler`] so it always produces a response — the
/// non-skippable common case.
struct Always<H>(H);

impl<S, H> DispatchHandler<S> for Always<H>
where
    H: Handler<S>,
    S: ConnectionData,
{
    async fn try_handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> Option<Handled> {
        Some(self.0.handle(connection_data, request, response).await)
    }
}

struct Mapping<S> {
    domain: Option<String>,
    path_segments: Vec<String>,
    skippable: bool,
    handler: Box<dyn DynDispatch<S>>,
}

impl<S> Mapping<S> {
    fn path_prefix(&self) -> String {
        if self.path_segments.is_empty() {
            String::new()
        } else {
            format!("/{}", self.path_segments.join("/"))
        }
    }

    /// Whether `url` falls under this mapping's domain/path, without
    /// consuming anything yet.
    fn matches(&self, url: &Url) -> bool {
        let domain_ok = self
            .domain
            .as_deref()
            .map_or(true, |domain| domain_matches(url.host(), domain));

        let segments: Vec<&str> = self.path_segments.iter().map(String::as_str).collect();
        let path_ok = segments.is_empty() || url.starts_with(&segments);

        domain_ok && path_ok
    }
}

/// `host` ends with `domain` on a `.`-aligned boundary (or is exactly equal
/// to it) — so `"api.example.com"` matches domain `"example.com"` but
/// `"evilapi.example.com"` spoofing via bare suffix concatenation does not.
fn domain_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return true;
    }
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// An ordered list of `(domain, path)` mappings that rebases the request
/// [`Url`] on match and hands the remainder down to the mapped handler.
///
/// ```no_run
/// use corehttpd::{dispatch::Resolver, Handler, Request, Response, Handled, StatusCode};
///
/// struct Api;
/// impl Handler for Api {
///     async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body(format!("api: {}", req.url().path()))
///     }
/// }
///
/// struct Root;
/// impl Handler for Root {
///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("home")
///     }
/// }
///
/// let resolver: Resolver = Resolver::new()
///     .mount(None, Some("/api"), false, Api)
///     .mount(None, None, false, Root);
/// ```
pub struct Resolver<S = ()>
where
    S: ConnectionData,
{
    mappings: Vec<Mapping<S>>,
}

impl<S> Resolver<S>
where
    S: ConnectionData,
{
    #[inline]
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
        }
    }

    /// Adds a mapping whose handler always produces a response.
    ///
    /// `domain` is a suffix match (`None` matches any host); `path` is a
    /// `/`-aligned prefix match (`None` or `Some("/")` matches any path).
    /// `skippable` controls nothing for a plain [`Handler`] (it never
    /// declines) — it only matters when nesting another [`Resolver`] via
    /// [`Self::nest`].
    #[inline]
    pub fn mount<H>(self, domain: Option<&str>, path: Option<&str>, skippable: bool, handler: H) -> Self
    where
        H: Handler<S>,
    {
        self.push(domain, path, skippable, Box::new(Always(handler)))
    }

    /// Nests another resolver under a domain/path prefix. If nothing in the
    /// nested resolver matches, it declines (`None`); mark `skippable` to
    /// let outer mappings after it still be tried.
    #[inline]
    pub fn nest(self, domain: Option<&str>, path: Option<&str>, skippable: bool, resolver: Resolver<S>) -> Self {
        self.push(domain, path, skippable, Box::new(resolver))
    }

    fn push(mut self, domain: Option<&str>, path: Option<&str>, skippable: bool, handler: Box<dyn DynDispatch<S>>) -> Self {
        let path_segments = path
            .unwrap_or("/")
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        self.mappings.push(Mapping {
            domain: domain.map(|d| d.to_ascii_lowercase()),
            path_segments,
            skippable,
            handler,
        });
        self
    }

    /// Resolves `request` against the mapping list, returning the first
    /// non-declined response. A top-level resolver with no matching mapping
    /// should be wrapped so the caller falls back to `404` — see
    /// [`Resolver`]'s [`Handler`] impl.
    async fn resolve(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> Option<Handled> {
        let url = request.url();

        for mapping in &self.mappings {
            if !mapping.matches(url) {
                continue;
            }

            let domain_suffix = mapping.domain.as_deref().unwrap_or("");
            let path_prefix = mapping.path_prefix();
            let rebased = url.rebase(domain_suffix, &path_prefix);
            let rebased_request = request.with_url(rebased);

            match mapping
                .handler
                .try_handle_dyn(connection_data, &rebased_request, response)
                .await
            {
                Some(handled) => return Some(handled),
                None if mapping.skippable => continue,
                None => return None,
            }
        }

        None
    }
}

impl<S> Default for Resolver<S>
where
    S: ConnectionData,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> DispatchHandler<S> for Resolver<S>
where
    S: ConnectionData,
{
    async fn try_handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> Option<Handled> {
        self.resolve(connection_data, request, response).await
    }
}

/// A top-level [`Resolver`] is itself a [`Handler`]: unmatched requests get
/// a plain `404`, matching the default-handler fallback the rest of the
/// error boundary uses.
impl<S> Handler<S> for Resolver<S>
where
    S: ConnectionData,
{
    async fn handle(&self, connection_data: &mut S, request: &Request, response: &mut Response) -> Handled {
        match self.resolve(connection_data, request, response).await {
            Some(handled) => handled,
            None => response
                .status(crate::StatusCode::NotFound)
                .body("Not found"),
        }
    }
}
