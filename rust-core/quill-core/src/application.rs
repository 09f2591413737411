//! # Application
//!
//! The immutable result of [`Kernel::build`](crate::kernel::Kernel::build).
//!
//! Requests are matched against the domain sub-applications whose host
//! pattern accepts the request host, then against the per-file default
//! sub-applications in boot order. The first matching route runs its chain.
//! When nothing matches, a route answering another method yields 405 (200
//! for `OPTIONS`), then the first registered fallback route runs, and
//! otherwise the request ends in a rendered 404.

use crate::binding::ModelBindings;
use crate::config::AppConfig;
use crate::error::Result;
use crate::exception::{ExceptionHandler, HttpException};
use crate::middleware::{run_chain, BoxFuture, Dispatch, ResolvedMiddleware};
use crate::request::{Params, Request};
use crate::response::Response;
use crate::route::Handler;
use crate::router::{DomainPattern, Method, Router};
use crate::url::UrlGenerator;
use crate::views::Views;
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// State every endpoint reads while dispatching
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) bindings: ModelBindings,
    pub(crate) views: Arc<Views>,
    pub(crate) exceptions: ExceptionHandler,
}

/// A route ready to run: its handler wrapped in its resolved middleware
pub struct Endpoint {
    label: String,
    handler: Handler,
    layers: Vec<ResolvedMiddleware>,
    shared: Arc<Shared>,
}

impl Endpoint {
    pub(crate) fn new(
        label: String,
        handler: Handler,
        layers: Vec<ResolvedMiddleware>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            label,
            handler,
            layers,
            shared,
        }
    }

    /// Route name, or `METHODS uri` for unnamed routes
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Labels of the resolved middleware, outermost first
    #[must_use]
    pub fn middleware(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.label.as_str()).collect()
    }

    /// Run the chain for `req`
    pub async fn run(&self, req: &mut Request) -> Response {
        run_chain(&self.layers, req, self, &self.shared.exceptions).await
    }

    async fn call_handler(&self, req: &mut Request) -> std::result::Result<Response, HttpException> {
        self.shared.bindings.resolve(req).await?;

        let owned = req.clone();
        let views = &*self.shared.views;
        let outcome = AssertUnwindSafe(async move { self.handler.invoke(owned, views).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let exception = HttpException::from_panic(payload.as_ref());
                error!(route = %self.label, error = %exception, "Handler panicked");
                Err(exception)
            }
        }
    }
}

impl Dispatch for Endpoint {
    fn dispatch<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.call_handler(req).await {
                Ok(response) => response,
                Err(exception) => self.shared.exceptions.render(req, exception),
            }
        })
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("label", &self.label)
            .field("handler", &self.handler)
            .field("layers", &self.layers)
            .finish()
    }
}

/// Routes of one route file, or of one domain
#[derive(Debug)]
pub(crate) struct SubApp {
    pub(crate) label: String,
    pub(crate) domain: Option<DomainPattern>,
    pub(crate) router: Router<Endpoint>,
    pub(crate) fallback: Option<Arc<Endpoint>>,
}

impl SubApp {
    pub(crate) fn new(label: impl Into<String>, domain: Option<DomainPattern>) -> Self {
        Self {
            label: label.into(),
            domain,
            router: Router::new(),
            fallback: None,
        }
    }

    /// Host parameters when this sub-app serves `host`
    fn accepts(&self, host: &str) -> Option<Params> {
        match &self.domain {
            Some(domain) => domain.matches(host),
            None => Some(Params::new()),
        }
    }
}

/// Outcome of looking a request up across the sub-applications
enum Lookup<'a> {
    Route(&'a Arc<Endpoint>, Params),
    MethodNotAllowed(Vec<Method>),
    Fallback(&'a Arc<Endpoint>, Params),
    NotFound,
}

/// The booted application
pub struct Application {
    config: AppConfig,
    domains: Vec<SubApp>,
    defaults: Vec<SubApp>,
    urls: UrlGenerator,
    shared: Arc<Shared>,
}

impl Application {
    pub(crate) fn new(
        config: AppConfig,
        domains: Vec<SubApp>,
        defaults: Vec<SubApp>,
        urls: UrlGenerator,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            config,
            domains,
            defaults,
            urls,
            shared,
        }
    }

    /// Configuration the application was booted with
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Named routes
    #[must_use]
    pub fn urls(&self) -> &UrlGenerator {
        &self.urls
    }

    /// The exception renderer
    #[must_use]
    pub fn exceptions(&self) -> &ExceptionHandler {
        &self.shared.exceptions
    }

    /// Registered views
    #[must_use]
    pub fn views(&self) -> &Views {
        &self.shared.views
    }

    /// URL of the route called `name`
    ///
    /// # Errors
    ///
    /// `Error::RouteNotDefined` or `Error::MissingRouteParameter`.
    pub fn route<I, K, V>(&self, name: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.urls.route(name, params)
    }

    /// Number of matchable routes (fallback routes excluded)
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.sub_apps().map(|app| app.router.len()).sum()
    }

    /// Number of sub-applications bound to a domain
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    fn sub_apps(&self) -> impl Iterator<Item = &SubApp> {
        self.domains.iter().chain(self.defaults.iter())
    }

    /// Dispatch one request
    pub async fn handle(&self, mut req: Request) -> Response {
        let request_id = match req.header("x-request-id") {
            Some(id) => id.to_string(),
            None => {
                let id = generate_request_id();
                req.set_header("x-request-id", &id);
                id
            }
        };

        let mut response = match self.lookup(&req) {
            Lookup::Route(endpoint, params) | Lookup::Fallback(endpoint, params) => {
                debug!(route = %endpoint.label(), path = %req.path, "Route matched");
                req.set_params(params);
                endpoint.run(&mut req).await
            }
            Lookup::MethodNotAllowed(allowed) => self.method_not_allowed(&req, &allowed),
            Lookup::NotFound => self
                .shared
                .exceptions
                .render(&req, HttpException::not_found()),
        };

        response.set_header("x-request-id", &request_id);
        if req.method == Method::Head {
            response.body.clear();
        }
        response
    }

    fn lookup(&self, req: &Request) -> Lookup<'_> {
        let host = req.host().unwrap_or_default().to_ascii_lowercase();
        let candidates: Vec<(&SubApp, Params)> = self
            .sub_apps()
            .filter_map(|app| app.accepts(&host).map(|params| (app, params)))
            .collect();

        for (app, host_params) in &candidates {
            if let Some(matched) = app.router.match_route(req.method, &req.path) {
                let mut params = host_params.clone();
                params.extend(matched.params);
                return Lookup::Route(matched.value, params);
            }
        }

        let mut allowed: Vec<Method> = candidates
            .iter()
            .flat_map(|(app, _)| app.router.allowed_methods(&req.path, req.method))
            .collect();
        allowed.sort();
        allowed.dedup();
        if !allowed.is_empty() {
            return Lookup::MethodNotAllowed(allowed);
        }

        candidates
            .into_iter()
            .find_map(|(app, params)| app.fallback.as_ref().map(|f| (f, params)))
            .map_or(Lookup::NotFound, |(endpoint, params)| {
                debug!(app = %endpoint.label(), path = %req.path, "Fallback route");
                Lookup::Fallback(endpoint, params)
            })
    }

    fn method_not_allowed(&self, req: &Request, allowed: &[Method]) -> Response {
        let allow = allowed
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if req.method == Method::Options {
            return Response::text("").with_header("allow", &allow);
        }
        self.shared
            .exceptions
            .render(req, HttpException::abort(405, "Method Not Allowed"))
            .with_header("allow", &allow)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.config.name)
            .field("domains", &self.domains.iter().map(|a| &a.label).collect::<Vec<_>>())
            .field("defaults", &self.defaults.iter().map(|a| &a.label).collect::<Vec<_>>())
            .field("named_routes", &self.urls.len())
            .finish()
    }
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Unique-enough request id: nanosecond clock plus a process counter
pub fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::CompiledConstraints;
    use crate::pattern::compile_uri;
    use crate::route::handler;

    fn shared() -> Arc<Shared> {
        let views = Arc::new(Views::new());
        Arc::new(Shared {
            bindings: ModelBindings::new(),
            views: Arc::clone(&views),
            exceptions: ExceptionHandler::new(false, views),
        })
    }

    fn endpoint(shared: &Arc<Shared>, label: &str, h: Handler) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(label.to_string(), h, Vec::new(), Arc::clone(shared)))
    }

    fn app_with(routes: &[(&[Method], &str, &str)], fallback: bool) -> Application {
        let shared = shared();
        let mut sub = SubApp::new("web", None);
        for (methods, uri, body) in routes {
            let body = (*body).to_string();
            let h = handler(move |_req| {
                let body = body.clone();
                async move { body }
            });
            sub.router
                .insert(
                    methods,
                    &compile_uri(uri).unwrap(),
                    Arc::new(CompiledConstraints::default()),
                    endpoint(&shared, uri, h),
                )
                .unwrap();
        }
        if fallback {
            sub.fallback = Some(endpoint(&shared, "fallback", handler(|_| async { "fallback" })));
        }
        Application::new(
            AppConfig::default(),
            Vec::new(),
            vec![sub],
            UrlGenerator::new(None),
            shared,
        )
    }

    #[tokio::test]
    async fn test_request_id_is_assigned_and_echoed() {
        let app = app_with(&[(&[Method::Get], "/", "home")], false);
        let res = app.handle(Request::get("/")).await;
        assert_eq!(res.body, "home");
        assert!(res.header("x-request-id").is_some());

        let mut req = Request::get("/");
        req.set_header("x-request-id", "abc");
        assert_eq!(app.handle(req).await.header("x-request-id"), Some("abc"));
    }

    #[tokio::test]
    async fn test_head_has_empty_body() {
        let app = app_with(&[(&[Method::Get, Method::Head], "/", "home")], false);
        let mut req = Request::get("/");
        req.method = Method::Head;
        let res = app.handle(req).await;
        assert_eq!(res.status, 200);
        assert!(res.body.is_empty());
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_methods() {
        let app = app_with(
            &[(&[Method::Get], "/users", "index"), (&[Method::Delete], "/users", "purge")],
            true,
        );
        let mut req = Request::get("/users");
        req.method = Method::Post;
        let res = app.handle(req).await;
        assert_eq!(res.status, 405);
        assert_eq!(res.header("allow"), Some("GET, DELETE"));

        let mut req = Request::get("/users");
        req.method = Method::Options;
        let res = app.handle(req).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.header("allow"), Some("GET, DELETE"));
    }

    #[tokio::test]
    async fn test_fallback_then_not_found() {
        let app = app_with(&[(&[Method::Get], "/", "home")], true);
        assert_eq!(app.handle(Request::get("/missing")).await.body, "fallback");

        let app = app_with(&[(&[Method::Get], "/", "home")], false);
        assert_eq!(app.handle(Request::get("/missing")).await.status, 404);
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let shared = shared();
        let boom = endpoint(
            &shared,
            "boom",
            handler(|_req| async {
                if true {
                    panic!("kaboom");
                }
                "unreachable"
            }),
        );
        let mut req = Request::get("/boom");
        req.set_header("accept", "application/json");
        let res = boom.run(&mut req).await;
        assert_eq!(res.status, 500);
        assert!(res.body.contains("Server Error"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}
