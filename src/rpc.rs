//! JSON-in/JSON-out RPC dispatch over plain `POST` requests.
//!
//! Nothing in the teacher corresponds to this directly; the wire framing
//! (`application/x-www-form-urlencoded` body, single `data` field holding a
//! JSON object) follows the form-parsing idiom already used by
//! [`crate::http::body::parse_urlencoded`], and registration/dispatch is
//! grounded in the [`crate::dispatch`] resolver's mapping-list shape: an
//! ordered, name-keyed list of targets tried in turn.
//!
//! Marshaling is behind the [`JsonCodec`] trait rather than a concrete JSON
//! type, so embedders that never touch this module don't pull in a JSON
//! crate; the test-only [`SerdeJsonCodec`] is the one shipped here.

use crate::{
    http::body::{self, Body},
    ConnectionData, Handled, Handler, Method, Request, Response, StatusCode,
};
use std::collections::HashMap;

/// Marshals the JSON object carried in an RPC request/response, without
/// forcing a concrete JSON crate on every embedder.
pub trait JsonCodec: Sync + Send + 'static {
    /// The in-memory representation of a single JSON value.
    type Value: Clone + Send + Sync;

    /// Parses `bytes` as a JSON object, returning its fields.
    ///
    /// Anything other than a JSON object at the top level (an array, a
    /// bare string, malformed JSON) is a decode error.
    fn decode_object(bytes: &[u8]) -> Result<HashMap<String, Self::Value>, String>;

    /// Renders a value back to its JSON text form.
    fn encode_value(value: &Self::Value) -> String;
}

/// The outcome of a single [`RpcMethod`] call.
pub enum RpcError {
    /// Arguments were missing, malformed, or failed validation — `400`.
    BadRequest(String),
    /// The method body itself failed — `500`.
    Internal(String),
}

/// A single RPC-exposed operation.
///
/// Rust has no runtime reflection, so "exposing" a method is just
/// implementing this trait and registering it with a [`Registry`] under a
/// name, rather than tagging a method on some larger service object.
/// Implementations always receive the live [`Request`] alongside the
/// decoded arguments — the original system's request-injection marker has
/// no analogue here, since there's nothing to opt out of.
pub trait RpcMethod<C: JsonCodec>: Sync + Send + 'static {
    fn call(&self, request: &Request, args: &HashMap<String, C::Value>) -> Result<C::Value, RpcError>;
}

impl<C, F> RpcMethod<C> for F
where
    C: JsonCodec,
    F: Fn(&Request, &HashMap<String, C::Value>) -> Result<C::Value, RpcError> + Sync + Send + 'static,
{
    fn call(&self, request: &Request, args: &HashMap<String, C::Value>) -> Result<C::Value, RpcError> {
        self(request, args)
    }
}

type Converter<C> = Box<dyn Fn(<C as JsonCodec>::Value) -> Result<<C as JsonCodec>::Value, String> + Sync + Send>;

/// A name-keyed table of RPC methods plus optional per-parameter
/// converters, mounted as an HTTP endpoint via [`RpcHandler`].
///
/// Converters are a deliberate simplification of the original system's
/// type-based argument conversion: without runtime type reflection, there's
/// no way to dispatch a converter off the destination type alone, so a
/// converter is instead keyed by parameter name and runs for every method
/// that declares that parameter.
pub struct Registry<C: JsonCodec> {
    methods: HashMap<String, Box<dyn RpcMethod<C>>>,
    converters: HashMap<String, Converter<C>>,
}

impl<C: JsonCodec> Registry<C> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            converters: HashMap::new(),
        }
    }

    /// Registers `method` under `name`. Replaces any existing method of the
    /// same name.
    #[inline]
    pub fn method(mut self, name: impl Into<String>, method: impl RpcMethod<C>) -> Self {
        self.methods.insert(name.into(), Box::new(method));
        self
    }

    /// Registers a converter that runs on the argument named `param` before
    /// dispatch, for every method that receives it.
    #[inline]
    pub fn converter<F>(mut self, param: impl Into<String>, convert: F) -> Self
    where
        F: Fn(C::Value) -> Result<C::Value, String> + Sync + Send + 'static,
    {
        self.converters.insert(param.into(), Box::new(convert));
        self
    }

    fn dispatch(&self, method_name: &str, request: &Request, mut args: HashMap<String, C::Value>) -> RpcOutcome<C> {
        let Some(method) = self.methods.get(method_name) else {
            return RpcOutcome::NotFound;
        };

        for (param, convert) in &self.converters {
            if let Some(value) = args.remove(param) {
                match convert(value) {
                    Ok(converted) => {
                        args.insert(param.clone(), converted);
                    }
                    Err(message) => return RpcOutcome::BadRequest(message),
                }
            }
        }

        match method.call(request, &args) {
            Ok(value) => RpcOutcome::Ok(value),
            Err(RpcError::BadRequest(message)) => RpcOutcome::BadRequest(message),
            Err(RpcError::Internal(message)) => RpcOutcome::InternalError(message),
        }
    }
}

impl<C: JsonCodec> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

enum RpcOutcome<C: JsonCodec> {
    Ok(C::Value),
    NotFound,
    BadRequest(String),
    InternalError(String),
}

/// Mounts a [`Registry`] as an HTTP endpoint.
///
/// Expects `POST /.../<method>` with an `application/x-www-form-urlencoded`
/// body whose sole `data` field holds the JSON argument object — this
/// handler only looks at the final path segment, so nest it under
/// [`crate::dispatch::Resolver`] to control the mount prefix.
pub struct RpcHandler<C: JsonCodec> {
    registry: Registry<C>,
}

impl<C: JsonCodec> RpcHandler<C> {
    pub fn new(registry: Registry<C>) -> Self {
        Self { registry }
    }
}

impl<C, S> Handler<S> for RpcHandler<C>
where
    C: JsonCodec,
    S: ConnectionData,
{
    async fn handle(&self, _: &mut S, request: &Request, response: &mut Response) -> Handled {
        if request.method() != Method::Post {
            return error_response(response, StatusCode::NotFound, "method not found");
        }

        let Some(method_name) = request.url().path_segments().last() else {
            return error_response(response, StatusCode::NotFound, "method not found");
        };
        let method_name = method_name.clone();

        let raw = match request.body() {
            Body::Bytes(bytes) => bytes.as_slice(),
            _ => return error_response(response, StatusCode::BadRequest, "expected urlencoded form body"),
        };

        let form = body::parse_urlencoded(raw);
        let Some((_, data)) = form.iter().find(|(key, _)| key == "data") else {
            return error_response(response, StatusCode::BadRequest, "missing `data` field");
        };

        let args = match C::decode_object(data.as_bytes()) {
            Ok(args) => args,
            Err(message) => return error_response(response, StatusCode::BadRequest, &message),
        };

        match self.registry.dispatch(&method_name, request, args) {
            RpcOutcome::Ok(value) => response
                .status(StatusCode::Ok)
                .header(&b"content-type"[..], &b"application/json"[..])
                .body(format!(r#"{{"status":"ok","result":{}}}"#, C::encode_value(&value))),
            RpcOutcome::NotFound => error_response(response, StatusCode::NotFound, "unknown method"),
            RpcOutcome::BadRequest(message) => error_response(response, StatusCode::BadRequest, &message),
            RpcOutcome::InternalError(message) => error_response(response, StatusCode::InternalServerError, &message),
        }
    }
}

fn error_response(response: &mut Response, status: StatusCode, message: &str) -> Handled {
    response
        .status(status)
        .header(&b"content-type"[..], &b"application/json"[..])
        .body(format!(r#"{{"status":"error","message":{}}}"#, json_escape(message)))
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A [`JsonCodec`] backed by `serde_json`. Not used outside tests: it's a
/// dev-dependency only, so embedders who never touch this module don't pay
/// for it.
#[cfg(test)]
pub(crate) struct SerdeJsonCodec;

#[cfg(test)]
impl JsonCodec for SerdeJsonCodec {
    type Value = serde_json::Value;

    fn decode_object(bytes: &[u8]) -> Result<HashMap<String, Self::Value>, String> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        match value {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err("expected a JSON object".to_string()),
        }
    }

    fn encode_value(value: &Self::Value) -> String {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ReqLimits, RespLimits};

    fn req(path: &str, body: Vec<u8>) -> Request {
        let limits = ReqLimits::default().precalculate();
        let mut r = Request::new(&limits);
        r.set_url_for_test(b"example.com", path.as_bytes(), &limits);
        r.set_method_for_test(Method::Post);
        r.set_body_for_test(Body::Bytes(body));
        r
    }

    fn form_body(data_json: &str) -> Vec<u8> {
        format!("data={}", urlencode(data_json)).into_bytes()
    }

    fn urlencode(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for b in s.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
                _ => out.push_str(&format!("%{:02X}", b)),
            }
        }
        out
    }

    fn echo() -> Registry<SerdeJsonCodec> {
        Registry::new().method("echo", |_: &Request, args: &HashMap<String, serde_json::Value>| {
            args.get("value")
                .cloned()
                .ok_or_else(|| RpcError::BadRequest("missing `value`".to_string()))
        })
    }

    #[tokio::test]
    async fn dispatches_registered_method() {
        let handler = RpcHandler::new(echo());
        let request = req("/rpc/echo", form_body(r#"{"value":42}"#));
        let mut response = Response::new(&RespLimits::default());

        handler.handle(&mut (), &request, &mut response).await;

        let body = String::from_utf8_lossy(response.buffer()).into_owned();
        assert!(body.contains(r#""status":"ok""#));
        assert!(body.contains("42"));
    }

    #[tokio::test]
    async fn unknown_method_is_404() {
        let handler = RpcHandler::new(echo());
        let request = req("/rpc/nope", form_body("{}"));
        let mut response = Response::new(&RespLimits::default());

        handler.handle(&mut (), &request, &mut response).await;

        assert!(String::from_utf8_lossy(response.buffer()).contains("404"));
    }

    #[tokio::test]
    async fn missing_data_field_is_bad_request() {
        let handler = RpcHandler::new(echo());
        let request = req("/rpc/echo", b"unrelated=1".to_vec());
        let mut response = Response::new(&RespLimits::default());

        handler.handle(&mut (), &request, &mut response).await;

        assert!(String::from_utf8_lossy(response.buffer()).contains("400"));
    }

    #[tokio::test]
    async fn converter_runs_before_dispatch() {
        let registry = echo().converter("value", |v| match v {
            serde_json::Value::Number(n) => Ok(serde_json::Value::Number(
                (n.as_i64().unwrap_or(0) * 2).into(),
            )),
            other => Ok(other),
        });
        let handler = RpcHandler::new(registry);
        let request = req("/rpc/echo", form_body(r#"{"value":21}"#));
        let mut response = Response::new(&RespLimits::default());

        handler.handle(&mut (), &request, &mut response).await;

        let body = String::from_utf8_lossy(response.buffer()).into_owned();
        assert!(body.contains("42"));
    }

    #[tokio::test]
    async fn non_post_is_rejected() {
        let handler = RpcHandler::new(echo());
        let mut request = req("/rpc/echo", form_body("{}"));
        request.set_method_for_test(Method::Get);
        let mut response = Response::new(&RespLimits::default());

        handler.handle(&mut (), &request, &mut response).await;

        assert!(String::from_utf8_lossy(response.buffer()).contains("404"));
    }
}
