//! # Exceptions
//!
//! Request-time failures and their conversion into responses.
//!
//! Every exception raised by a middleware phase or a handler is caught at
//! the dispatch boundary of its route and rendered by [`ExceptionHandler`];
//! none propagate past it. JSON clients get `{ message, error_type, .. }`,
//! browsers get an HTML page (`errors.<status>` view when registered).

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::validation::ValidationErrors;
use crate::views::{escape_html, Views};
use hyper::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, error};

/// Request-time failure
#[derive(ThisError, Debug)]
pub enum HttpException {
    /// Explicit early exit with a status code
    #[error("{message}")]
    Abort {
        /// HTTP status
        status: u16,
        /// User-facing message
        message: String,
    },

    /// Input validation failed
    #[error("The given data was invalid.")]
    Validation {
        /// Field → messages
        errors: ValidationErrors,
        /// Where browsers are sent back to (defaults to the referer)
        redirect: Option<String>,
    },

    /// Query misuse or database failure
    #[error("SQL error: {message}")]
    Sql {
        /// Driver or builder message
        message: String,
    },

    /// `dd()` debug signal carrying arbitrary data
    #[error("Dump and die")]
    Dump {
        /// The dumped value
        data: Value,
    },

    /// A handler produced no response
    #[error("The route handler returned no response")]
    EmptyResponse,

    /// A handler or middleware panicked
    #[error("Panicked: {message}")]
    Panic {
        /// Panic payload, when it was a string
        message: String,
    },

    /// Anything else
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HttpException {
    /// Abort with `status` and `message`
    pub fn abort(status: u16, message: impl Into<String>) -> Self {
        Self::Abort {
            status,
            message: message.into(),
        }
    }

    /// `404 Not Found`
    #[must_use]
    pub fn not_found() -> Self {
        Self::abort(404, "Not Found")
    }

    /// `401 Unauthenticated.`
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::abort(401, "Unauthenticated.")
    }

    /// `403 Forbidden`
    #[must_use]
    pub fn forbidden() -> Self {
        Self::abort(403, "This action is unauthorized.")
    }

    /// Exception standing for a caught panic
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        Self::Panic { message }
    }

    /// Wrap any error as an internal failure
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(Box::new(err))
    }

    /// HTTP status this exception renders with
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Abort { status, .. } => *status,
            Self::Validation { .. } => 422,
            Self::Sql { .. }
            | Self::Dump { .. }
            | Self::EmptyResponse
            | Self::Panic { .. }
            | Self::Internal(_) => 500,
        }
    }

    /// Type tag exposed in JSON bodies
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Abort { .. } => "AbortError",
            Self::Validation { .. } => "ValidationException",
            Self::Sql { .. } => "SQLError",
            Self::Dump { .. } => "DumpAndDie",
            Self::EmptyResponse => "EmptyResponse",
            Self::Panic { .. } => "Panic",
            Self::Internal(_) => "Error",
        }
    }

    fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        chain
    }
}

/// Stop the request and render `value` (debug helper)
pub fn dd<T: Serialize>(value: &T) -> HttpException {
    HttpException::Dump {
        data: serde_json::to_value(value).unwrap_or(Value::Null),
    }
}

impl From<Error> for HttpException {
    fn from(err: Error) -> Self {
        match err {
            Error::MalformedJson { reason } => Self::abort(400, format!("Malformed JSON body: {reason}")),
            Error::PayloadTooLarge { .. } => Self::abort(413, "Payload Too Large"),
            Error::BodyRead { .. } => Self::abort(400, "Bad Request"),
            Error::MethodNotSupported { .. } => Self::abort(405, "Method Not Allowed"),
            Error::Database { message } => Self::Sql { message },
            other => Self::internal(other),
        }
    }
}

impl From<serde_json::Error> for HttpException {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

/// Converts exceptions into negotiated responses
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    debug: bool,
    views: Arc<Views>,
}

impl ExceptionHandler {
    /// `debug` mirrors `APP_DEBUG`
    #[must_use]
    pub fn new(debug: bool, views: Arc<Views>) -> Self {
        Self { debug, views }
    }

    /// Whether details are exposed
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Render `exception` for `req`
    #[must_use]
    pub fn render(&self, req: &Request, exception: HttpException) -> Response {
        let status = exception.status();
        if status >= 500 {
            error!(
                method = %req.method,
                path = %req.path,
                status,
                error_type = exception.error_type(),
                error = %exception,
                "Request failed"
            );
        } else {
            debug!(method = %req.method, path = %req.path, status, "Request aborted");
        }

        match exception {
            HttpException::Validation { errors, redirect } => {
                self.render_validation(req, &errors, redirect.as_deref())
            }
            HttpException::Dump { data } => Self::render_dump(req, &data),
            other => self.render_error(req, &other),
        }
    }

    fn render_validation(
        &self,
        req: &Request,
        errors: &ValidationErrors,
        redirect: Option<&str>,
    ) -> Response {
        if req.wants_json() {
            return Response::json_value(&json!({
                "message": errors.summary(),
                "error_type": "ValidationException",
                "errors": errors,
            }))
            .with_status(422);
        }
        let target = redirect.or_else(|| req.header("referer")).unwrap_or("/");
        Response::redirect(target, 302)
    }

    fn render_dump(req: &Request, data: &Value) -> Response {
        if req.wants_json() {
            return Response::json_value(&json!({
                "message": "Dump and die",
                "error_type": "DumpAndDie",
                "data": data,
            }))
            .with_status(500);
        }
        let pretty = serde_json::to_string_pretty(data).unwrap_or_default();
        Response::html(format!(
            "<!DOCTYPE html><html><body><pre class=\"dd\">{}</pre></body></html>",
            escape_html(&pretty)
        ))
        .with_status(500)
    }

    fn render_error(&self, req: &Request, exception: &HttpException) -> Response {
        let status = exception.status();
        let message = self.public_message(exception);

        if req.wants_json() {
            let mut body = json!({
                "message": message,
                "error_type": exception.error_type(),
            });
            if self.debug && status >= 500 {
                body["trace"] = json!(exception.chain());
            }
            return Response::json_value(&body).with_status(status);
        }

        let view = format!("errors.{status}");
        let data = json!({ "status": status, "message": message });
        if let Ok(html) = self.views.render(&view, &data) {
            return Response::html(html).with_status(status);
        }

        let details = if self.debug && status >= 500 {
            let items: String = exception
                .chain()
                .iter()
                .map(|line| format!("<li>{}</li>", escape_html(line)))
                .collect();
            format!("<ol class=\"trace\">{items}</ol>{}", debug_hint(exception))
        } else {
            String::new()
        };
        Response::html(generic_page(status, &message, &details)).with_status(status)
    }

    fn public_message(&self, exception: &HttpException) -> String {
        match exception {
            HttpException::Abort { message, .. } => message.clone(),
            _ if self.debug => exception.to_string(),
            _ => "Server Error".to_string(),
        }
    }
}

fn debug_hint(exception: &HttpException) -> &'static str {
    match exception {
        HttpException::EmptyResponse => {
            "<p class=\"hint\">Every handler and middleware must return a response, \
             continue the chain, or fail with an exception.</p>"
        }
        _ => "",
    }
}

fn generic_page(status: u16, message: &str, details: &str) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error");
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{status} {reason}</title>\n<style>\n\
         body{{font-family:system-ui,sans-serif;background:#f7fafc;color:#2d3748;\
         display:flex;align-items:center;justify-content:center;min-height:100vh;margin:0}}\n\
         .box{{text-align:center;max-width:48rem}}\n\
         h1{{font-size:1.25rem;letter-spacing:.05em;color:#a0aec0}}\n\
         .trace{{text-align:left;font-family:monospace;font-size:.85rem}}\n\
         </style>\n</head>\n<body>\n<div class=\"box\">\n<h1>{status} | {}</h1>\n{details}\n</div>\n\
         </body>\n</html>\n",
        escape_html(message)
    )
}
