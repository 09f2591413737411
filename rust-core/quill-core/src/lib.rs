//! # Quill Core
//!
//! Route compilation and request dispatch for the Quill web framework.
//!
//! Route files describe routes, groups and resources through a
//! [`RouteBuilder`]. The [`Kernel`] compiles them into per-route middleware
//! chains and binds them into an immutable [`Application`], which the
//! [`server`] feeds with HTTP requests.
//!
//! ## Modules
//!
//! - `pattern` - URI template compilation (optional segments, wildcards)
//! - `constraint` - Regex constraints on route parameters
//! - `router` - Per-method radix matching using matchit, host patterns
//! - `route` - Route definitions and handler references
//! - `resource` - Conventional resource routes
//! - `registry` - The route builder passed to route files
//! - `middleware` - Two-phase middleware, resolver and built-ins
//! - `kernel` - Boot: route files to application
//! - `application` - Request dispatch
//! - `url` - Reverse routing
//! - `request` / `response` / `context` - Request and response values
//! - `exception` - Request-time errors and their rendering
//! - `validation` - Input validation
//! - `views` - Named templates
//! - `binding` / `database` - Route-model binding through SQLx
//! - `config` - Application settings
//! - `json` - JSON parsing with simd-json
//! - `server` - HTTP server built on Hyper
//! - `error` - Boot-time error types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod application;
pub mod binding;
pub mod config;
pub mod constraint;
pub mod context;
pub mod database;
pub mod error;
pub mod exception;
pub mod json;
pub mod kernel;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod request;
pub mod resource;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod url;
pub mod validation;
pub mod views;

pub use application::{Application, Endpoint};
pub use binding::{ModelBinder, ModelBindings, TableBinder};
pub use config::AppConfig;
pub use constraint::{ConstrainParams, Constraints};
pub use database::DatabasePool;
pub use error::{Error, Result};
pub use exception::{dd, ExceptionHandler, HttpException};
pub use json::{parse_json, to_json};
pub use kernel::Kernel;
pub use middleware::{
    AuthMiddleware, CorsMiddleware, Flow, LoggingMiddleware, Middleware, MiddlewareRef,
    MiddlewareRegistry, RateLimitMiddleware, TimingMiddleware,
};
pub use pattern::{compile, compile_uri, CompiledPath};
pub use registry::{GroupConfig, RouteBuilder};
pub use request::{Params, Request};
pub use resource::{ResourceAction, ResourceRoute};
pub use response::{HandlerResult, Responder, Response};
pub use route::{action, handler, Controller, Handler, RouteHandle};
pub use router::{DomainPattern, Method, Router};
pub use server::{serve, ServerConfig};
pub use url::UrlGenerator;
pub use validation::{validate, ValidationErrors};
pub use views::Views;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
