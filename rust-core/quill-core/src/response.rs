//! # HTTP Response
//!
//! The response value that flows back out through the fallback phases, and
//! the [`Responder`] conversion applied to whatever a handler returns.

use crate::exception::HttpException;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome of a handler or of a dispatch step
pub type HandlerResult = std::result::Result<Response, HttpException>;

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers (lower-cased names)
    pub headers: BTreeMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "text/plain; charset=utf-8".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl Response {
    /// Create a JSON response from an already-encoded body
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: "application/json".to_string(),
            ..Self::default()
        }
    }

    /// Serialize `value` into a JSON response
    #[must_use]
    pub fn json_value<T: Serialize>(value: &T) -> Self {
        let body = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        Self::json(body)
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Create an HTML response
    #[must_use]
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: "text/html; charset=utf-8".to_string(),
            ..Self::default()
        }
    }

    /// Redirect to `location` with the given 3xx status
    #[must_use]
    pub fn redirect(location: &str, status: u16) -> Self {
        Self::default()
            .with_status(status)
            .with_header("location", location)
    }

    /// Empty `204 No Content`
    #[must_use]
    pub fn no_content() -> Self {
        Self::default().with_status(204)
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set a header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers
                .insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    /// Header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert to hyper Response
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("content-type", &self.content_type);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut fallback = hyper::Response::new(Full::new(Bytes::from_static(
                    b"Internal Server Error",
                )));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

/// Conversion from handler return values into a [`HandlerResult`]
pub trait Responder {
    /// Convert into a response or an exception
    ///
    /// # Errors
    ///
    /// Implementations return the exception the value stands for.
    fn respond(self) -> HandlerResult;
}

impl Responder for Response {
    fn respond(self) -> HandlerResult {
        Ok(self)
    }
}

impl Responder for String {
    fn respond(self) -> HandlerResult {
        Ok(Response::html(self))
    }
}

impl Responder for &'static str {
    fn respond(self) -> HandlerResult {
        Ok(Response::html(self))
    }
}

impl Responder for serde_json::Value {
    fn respond(self) -> HandlerResult {
        Ok(Response::json_value(&self))
    }
}

/// A handler that produced nothing broke the dispatch contract
impl Responder for () {
    fn respond(self) -> HandlerResult {
        Err(HttpException::EmptyResponse)
    }
}

impl<T, E> Responder for std::result::Result<T, E>
where
    T: Responder,
    E: Into<HttpException>,
{
    fn respond(self) -> HandlerResult {
        self.map_err(Into::into).and_then(Responder::respond)
    }
}
