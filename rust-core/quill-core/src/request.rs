//! # HTTP Request
//!
//! Owned request value threaded through the middleware chain.
//!
//! The body is collected once; cloning a request is cheap (`Bytes` is
//! reference counted) and clones share the same [`Context`].

use crate::context::Context;
use crate::error::{Error, Result};
use crate::json::parse_json;
use crate::router::Method;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// Route parameters in declared order
///
/// Domain parameters come first, then path parameters. An optional
/// parameter that was not supplied is present with a `None` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, Option<String>)>,
}

impl Params {
    /// Create an empty parameter list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter
    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.entries.push((name.into(), value));
    }

    /// Append every parameter of `other`
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Value of `name`, if bound and present
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether `name` is part of this route's parameters
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Values in declared order, for positional binding
    #[must_use]
    pub fn positional(&self) -> Vec<Option<&str>> {
        self.entries.iter().map(|(_, v)| v.as_deref()).collect()
    }

    /// Iterate `(name, value)` pairs in declared order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the route has no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parameters as a JSON object (`null` for absent optionals)
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(n, v)| (n.clone(), v.clone().map_or(Value::Null, Value::String)))
                .collect(),
        )
    }
}

/// HTTP request as seen by middleware and handlers
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Raw query string (e.g., "page=1&limit=10")
    query_string: Option<String>,
    /// Parsed query parameters
    query_params: HashMap<String, String>,
    /// Request headers
    headers: HeaderMap,
    /// Request body (collected)
    body: Option<Bytes>,
    /// Route parameters bound by the router
    params: Params,
    /// Models resolved by route-model binding, keyed by parameter name
    models: HashMap<String, Value>,
    /// Validated JWT claims
    pub claims: Option<Value>,
    /// Per-request storage shared by middleware phases
    context: Context,
}

impl Request {
    /// Create a request manually (for testing/internal use)
    ///
    /// `path` may carry a query string.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };

        let mut headers = HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                headers.insert(n, v);
            }
        }

        Self::from_parts(method, path, query_string, headers, body)
    }

    /// Shorthand for a bodiless request without headers
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, HashMap::new(), None)
    }

    fn from_parts(
        method: Method,
        path: String,
        query_string: Option<String>,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Self {
        Self {
            method,
            path,
            query_params: parse_query_string(query_string.as_deref()),
            query_string,
            headers,
            body,
            params: Params::new(),
            models: HashMap::new(),
            claims: None,
            context: Context::new(),
        }
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` when the declared or streamed body
    /// exceeds `max_body_size`, and `Error::BodyRead` when the transport fails
    /// mid-body.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method =
            Method::from_hyper(req.method()).ok_or_else(|| Error::MethodNotSupported {
                method: req.method().to_string(),
            })?;
        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let headers = req.headers().clone();

        let declared = headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(content_len) = declared.filter(|len| *len > max_body_size) {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                declared: Some(content_len),
            });
        }

        let bytes = collect_limited(req.into_body(), max_body_size).await?;
        let body = Some(bytes);

        Ok(Self::from_parts(method, path, query_string, headers, body))
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Host the request was addressed to, without port
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header("host")
            .map(|h| h.rsplit_once(':').map_or(h, |(host, port)| {
                if port.chars().all(|c| c.is_ascii_digit()) {
                    host
                } else {
                    h
                }
            }))
    }

    /// Whether the client negotiated a JSON response
    ///
    /// True when `Accept` names a JSON media type or the request was sent
    /// with `X-Requested-With: XMLHttpRequest`.
    #[must_use]
    pub fn wants_json(&self) -> bool {
        let accepts_json = self
            .header("accept")
            .is_some_and(|accept| accept.contains("/json") || accept.contains("+json"));
        let is_ajax = self
            .header("x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
        accepts_json || is_ajax
    }

    /// Route parameters bound by the router
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Shortcut for `params().get(name)`
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Replace the bound parameters
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Model bound to parameter `name` by route-model binding
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&Value> {
        self.models.get(name)
    }

    /// Record a bound model
    pub fn set_model(&mut self, name: impl Into<String>, model: Value) {
        self.models.insert(name.into(), model);
    }

    /// Per-request storage
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Query parameter by name
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Get query parameters as a HashMap
    #[must_use]
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_ref().map(AsRef::as_ref)
    }

    /// Get the request body as string (UTF-8)
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Decode the body as JSON; an empty body decodes as `{}`
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedJson` when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match self.body_bytes() {
            Some(bytes) if !bytes.is_empty() => parse_json(bytes),
            _ => parse_json(b"{}"),
        }
    }

    /// Query parameters merged with a JSON object body
    ///
    /// Body fields win over query fields.
    #[must_use]
    pub fn input(&self) -> Value {
        let mut merged: serde_json::Map<String, Value> = self
            .query_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if let Ok(Value::Object(body)) = self.json::<Value>() {
            merged.extend(body);
        }
        Value::Object(merged)
    }
}

/// Read `body` to the end, failing as soon as it grows past `limit`
async fn collect_limited<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<LengthLimitError>() => Err(Error::PayloadTooLarge {
            limit,
            declared: None,
        }),
        Err(err) => Err(Error::BodyRead {
            reason: err.to_string(),
        }),
    }
}

/// Parse query string into HashMap
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..=i + 2])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
