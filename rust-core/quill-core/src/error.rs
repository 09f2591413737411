//! # Error Handling
//!
//! Boot-time and registration errors for Quill core.
//! Request-time failures live in [`crate::exception`].

use thiserror::Error;

/// Result type alias for Quill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types raised while registering routes or booting the kernel
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A regex constraint did not compile
    #[error("Invalid constraint for parameter '{param}': {source}")]
    InvalidConstraint {
        /// Parameter the constraint belongs to
        param: String,
        /// The regex compilation error
        #[source]
        source: regex::Error,
    },

    /// A group tried to set a domain below an ancestor that already has one
    #[error("Domain '{domain}' cannot be set: an enclosing group already uses '{existing}'")]
    DomainAlreadySet {
        /// The domain being set
        domain: String,
        /// The domain inherited from an ancestor
        existing: String,
    },

    /// `only` and `except` were both applied to one resource
    #[error("Resource '{resource}' cannot use both only() and except()")]
    ResourceFilterConflict {
        /// Resource base name
        resource: String,
    },

    /// Unknown resource action in an `only`/`except` filter
    #[error("Unknown resource action '{action}'")]
    UnknownResourceAction {
        /// The rejected action name
        action: String,
    },

    /// A middleware reference did not resolve
    #[error("Middleware '{name}' is not registered")]
    UnknownMiddleware {
        /// The unresolved middleware name
        name: String,
    },

    /// Middleware group aliases reference each other
    #[error("Middleware group '{name}' is recursive")]
    MiddlewareCycle {
        /// The alias that closed the cycle
        name: String,
    },

    /// A named middleware rejected its bound arguments
    #[error("Invalid arguments for middleware '{name}': {reason}")]
    InvalidMiddlewareArgs {
        /// Middleware name
        name: String,
        /// Why the arguments were rejected
        reason: String,
    },

    /// Two routes compile to the same matcher path
    #[error("Route conflict for {method} {path}: {reason}")]
    RouteConflict {
        /// HTTP method
        method: String,
        /// Conflicting path
        path: String,
        /// Reason reported by the matcher
        reason: String,
    },

    /// Reverse routing for a name nobody registered
    #[error("Route [{name}] not defined")]
    RouteNotDefined {
        /// The requested route name
        name: String,
    },

    /// Reverse routing without a required parameter
    #[error("Missing required parameter '{param}' for route [{name}]")]
    MissingRouteParameter {
        /// Route name
        name: String,
        /// Missing parameter
        param: String,
    },

    /// A view name was not registered
    #[error("View [{name}] not found")]
    ViewNotFound {
        /// The missing view
        name: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {reason}")]
    Config {
        /// What went wrong
        reason: String,
    },

    /// Request body could not be decoded as JSON
    #[error("Malformed JSON: {reason}")]
    MalformedJson {
        /// Parser message
        reason: String,
    },

    /// The request used a method the router does not serve
    #[error("Method {method} is not supported")]
    MethodNotSupported {
        /// The raw method token
        method: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Declared `Content-Length`, when the client sent one
        declared: Option<usize>,
    },

    /// The request body could not be read
    #[error("Failed to read request body: {reason}")]
    BodyRead {
        /// Transport message
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_defined_error() {
        let err = Error::RouteNotDefined {
            name: "users.show".to_string(),
        };
        assert_eq!(err.to_string(), "Route [users.show] not defined");
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
    }

    #[test]
    fn test_domain_already_set_mentions_both() {
        let err = Error::DomainAlreadySet {
            domain: "api.example.com".to_string(),
            existing: "{account}.example.com".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("api.example.com"));
        assert!(msg.contains("{account}.example.com"));
    }
}
