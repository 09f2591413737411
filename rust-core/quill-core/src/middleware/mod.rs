//! # Middleware System
//!
//! Two-phase request interception.
//!
//! Each middleware has a `handle` phase, run outer → inner before the route
//! handler, and a `fallback` phase, run inner → outer after it. The chain is
//! an onion built by recursion: a layer whose `handle` continues gets exactly
//! one `fallback` call once everything inside it has produced a response.
//! A layer that short-circuits skips the inner layers and its own fallback;
//! the fallbacks of the layers around it still run.
//!
//! Both phases default to no-ops, so a middleware that only cares about the
//! response implements `fallback` alone and keeps its place in the onion.

mod auth;
mod builtin;
mod registry;

pub use auth::AuthMiddleware;
pub use builtin::{CorsMiddleware, LoggingMiddleware, RateLimitMiddleware, TimingMiddleware};
pub use registry::MiddlewareRegistry;

use crate::exception::{ExceptionHandler, HttpException};
use crate::request::Request;
use crate::response::Response;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tracing::error;

/// Boxed `Send` future used across the dispatch pipeline
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a handle phase
#[derive(Debug)]
pub enum Flow {
    /// Continue to next middleware/handler
    Continue,
    /// Short-circuit with this response (skip handler)
    Respond(Response),
}

/// Middleware trait for request/response interception
pub trait Middleware: Send + Sync {
    /// Pre-processing, called before the inner chain
    ///
    /// `args` are the bound arguments of a named reference
    /// (`throttle:10,1` → `["10", "1"]`).
    fn handle<'a>(
        &'a self,
        _req: &'a mut Request,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Flow, HttpException>> {
        Box::pin(async { Ok(Flow::Continue) })
    }

    /// Post-processing, called after the inner chain produced `res`
    fn fallback<'a>(
        &'a self,
        _req: &'a mut Request,
        res: Response,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Response, HttpException>> {
        Box::pin(async move { Ok(res) })
    }

    /// Reject malformed bound arguments once, while routes are built
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason.
    fn validate_args(&self, _args: &[String]) -> Result<(), String> {
        Ok(())
    }

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// A middleware reference as written in route definitions
#[derive(Clone)]
pub enum MiddlewareRef {
    /// A registered name or group alias with bound arguments
    Named {
        /// Registered name or group alias
        name: String,
        /// Arguments after the colon, split on commas
        args: Vec<String>,
    },
    /// A middleware instance supplied directly
    Inline(Arc<dyn Middleware>),
}

impl MiddlewareRef {
    /// Parse `"name:arg1,arg2"`
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let (name, args) = match raw.split_once(':') {
            Some((name, rest)) => (
                name,
                rest.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect(),
            ),
            None => (raw, Vec::new()),
        };
        Self::Named {
            name: name.trim().to_string(),
            args,
        }
    }

    /// Wrap a middleware instance
    pub fn inline(middleware: impl Middleware + 'static) -> Self {
        Self::Inline(Arc::new(middleware))
    }
}

impl From<&str> for MiddlewareRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for MiddlewareRef {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Arc<dyn Middleware>> for MiddlewareRef {
    fn from(middleware: Arc<dyn Middleware>) -> Self {
        Self::Inline(middleware)
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { name, args } if args.is_empty() => write!(f, "{name}"),
            Self::Named { name, args } => write!(f, "{name}:{}", args.join(",")),
            Self::Inline(m) => write!(f, "<{}>", m.name()),
        }
    }
}

/// A middleware materialised for one route, with its bound arguments
#[derive(Clone)]
pub struct ResolvedMiddleware {
    /// Name used in logs (registered name or the implementation's own)
    pub label: String,
    /// The implementation
    pub middleware: Arc<dyn Middleware>,
    /// Bound arguments
    pub args: Arc<[String]>,
}

impl fmt::Debug for ResolvedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedMiddleware")
            .field("label", &self.label)
            .field("args", &self.args)
            .finish()
    }
}

/// The innermost step of a chain
pub trait Dispatch: Send + Sync {
    /// Produce the route's response; exceptions are already rendered
    fn dispatch<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response>;
}

/// Run `layers` around `inner`
///
/// Exceptions and panics from a phase are rendered on the spot, so the
/// layers around the failing one still see a response in their fallback.
pub fn run_chain<'a>(
    layers: &'a [ResolvedMiddleware],
    req: &'a mut Request,
    inner: &'a dyn Dispatch,
    exceptions: &'a ExceptionHandler,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        let Some((layer, rest)) = layers.split_first() else {
            return inner.dispatch(req).await;
        };

        let handled = AssertUnwindSafe(layer.middleware.handle(req, &layer.args))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(caught(layer, "handle", payload.as_ref())));
        match handled {
            Ok(Flow::Respond(response)) => response,
            Err(exception) => exceptions.render(req, exception),
            Ok(Flow::Continue) => {
                let response = run_chain(rest, req, inner, exceptions).await;
                let finished = AssertUnwindSafe(layer.middleware.fallback(req, response, &layer.args))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(caught(layer, "fallback", payload.as_ref())));
                match finished {
                    Ok(response) => response,
                    Err(exception) => exceptions.render(req, exception),
                }
            }
        }
    })
}

fn caught(layer: &ResolvedMiddleware, phase: &str, payload: &(dyn Any + Send)) -> HttpException {
    let exception = HttpException::from_panic(payload);
    error!(middleware = %layer.label, phase, error = %exception, "Middleware panicked");
    exception
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::Views;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        id: &'static str,
        handle: bool,
        fallback: bool,
        stop: bool,
        log: Log,
    }

    impl Recorder {
        fn new(id: &'static str, log: &Log) -> Self {
            Self {
                id,
                handle: true,
                fallback: true,
                stop: false,
                log: Arc::clone(log),
            }
        }

        fn push(&self, phase: &str) {
            self.log.lock().unwrap().push(format!("{}.{phase}", self.id));
        }
    }

    impl Middleware for Recorder {
        fn handle<'a>(
            &'a self,
            _req: &'a mut Request,
            _args: &'a [String],
        ) -> BoxFuture<'a, Result<Flow, HttpException>> {
            Box::pin(async move {
                if self.handle {
                    self.push("handle");
                }
                if self.stop {
                    return Ok(Flow::Respond(Response::text("stopped").with_status(401)));
                }
                Ok(Flow::Continue)
            })
        }

        fn fallback<'a>(
            &'a self,
            _req: &'a mut Request,
            res: Response,
            _args: &'a [String],
        ) -> BoxFuture<'a, Result<Response, HttpException>> {
            Box::pin(async move {
                if self.fallback {
                    self.push("fallback");
                }
                Ok(res)
            })
        }
    }

    struct Endpoint(Log);

    impl Dispatch for Endpoint {
        fn dispatch<'a>(&'a self, _req: &'a mut Request) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.0.lock().unwrap().push("dispatch".to_string());
                Response::text("ok")
            })
        }
    }

    fn layer(m: Recorder) -> ResolvedMiddleware {
        ResolvedMiddleware {
            label: m.id.to_string(),
            middleware: Arc::new(m),
            args: Arc::from(Vec::new()),
        }
    }

    async fn run(layers: Vec<ResolvedMiddleware>, log: &Log) -> (Response, Vec<String>) {
        let exceptions = ExceptionHandler::new(false, Arc::new(Views::new()));
        let endpoint = Endpoint(Arc::clone(log));
        let mut req = Request::get("/");
        let res = run_chain(&layers, &mut req, &endpoint, &exceptions).await;
        let entries = log.lock().unwrap().clone();
        (res, entries)
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Log::default();
        let layers = vec![
            layer(Recorder::new("m1", &log)),
            layer(Recorder::new("m2", &log)),
            layer(Recorder::new("m3", &log)),
        ];
        let (res, entries) = run(layers, &log).await;
        assert_eq!(res.body, "ok");
        assert_eq!(
            entries,
            vec![
                "m1.handle",
                "m2.handle",
                "m3.handle",
                "dispatch",
                "m3.fallback",
                "m2.fallback",
                "m1.fallback"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_phases_keep_order() {
        let log = Log::default();
        let mut fallback_only = Recorder::new("m2", &log);
        fallback_only.handle = false;
        let mut handle_only = Recorder::new("m3", &log);
        handle_only.fallback = false;

        let layers = vec![
            layer(Recorder::new("m1", &log)),
            layer(fallback_only),
            layer(handle_only),
        ];
        let (_, entries) = run(layers, &log).await;
        assert_eq!(
            entries,
            vec!["m1.handle", "m3.handle", "dispatch", "m2.fallback", "m1.fallback"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_unwinds_outer_only() {
        let log = Log::default();
        let mut guard = Recorder::new("m2", &log);
        guard.stop = true;
        let layers = vec![
            layer(Recorder::new("m1", &log)),
            layer(guard),
            layer(Recorder::new("m3", &log)),
        ];
        let (res, entries) = run(layers, &log).await;
        assert_eq!(res.status, 401);
        assert_eq!(entries, vec!["m1.handle", "m2.handle", "m1.fallback"]);
    }

    struct Exploding {
        in_fallback: bool,
    }

    impl Middleware for Exploding {
        fn handle<'a>(
            &'a self,
            _req: &'a mut Request,
            _args: &'a [String],
        ) -> BoxFuture<'a, Result<Flow, HttpException>> {
            Box::pin(async move {
                assert!(self.in_fallback, "handle exploded");
                Ok(Flow::Continue)
            })
        }

        fn fallback<'a>(
            &'a self,
            _req: &'a mut Request,
            _res: Response,
            _args: &'a [String],
        ) -> BoxFuture<'a, Result<Response, HttpException>> {
            Box::pin(async { panic!("fallback exploded") })
        }
    }

    fn exploding(in_fallback: bool) -> ResolvedMiddleware {
        ResolvedMiddleware {
            label: "exploding".to_string(),
            middleware: Arc::new(Exploding { in_fallback }),
            args: Arc::from(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_panicking_phases_become_500() {
        for in_fallback in [false, true] {
            let log = Log::default();
            let layers = vec![layer(Recorder::new("m1", &log)), exploding(in_fallback)];
            let (res, entries) = run(layers, &log).await;
            assert_eq!(res.status, 500);
            assert!(res.body.contains("Server Error"));

            let expected: Vec<&str> = if in_fallback {
                vec!["m1.handle", "dispatch", "m1.fallback"]
            } else {
                vec!["m1.handle", "m1.fallback"]
            };
            assert_eq!(entries, expected);
        }
    }

    #[test]
    fn test_parse_reference() {
        match MiddlewareRef::parse("throttle:10, 1") {
            MiddlewareRef::Named { name, args } => {
                assert_eq!(name, "throttle");
                assert_eq!(args, vec!["10", "1"]);
            }
            MiddlewareRef::Inline(_) => panic!("expected a named reference"),
        }
        assert_eq!(format!("{:?}", MiddlewareRef::from("auth")), "auth");
    }
}
