//! # Kernel
//!
//! Collects configuration, middleware, model bindings, views and route
//! files, then compiles everything into an [`Application`].
//!
//! Route files run in alphabetical order with `web` last. Each file gets the
//! shared [`RouteBuilder`], which is drained after the file returns. Every
//! route ends up with middleware in this order:
//!
//! 1. the global list
//! 2. the group alias named after the route file, if registered
//! 3. the constraint guard of its enclosing groups
//! 4. enclosing group middleware, outermost first
//! 5. its own middleware

use crate::application::{Application, Endpoint, Shared, SubApp};
use crate::binding::{ModelBinder, ModelBindings};
use crate::config::AppConfig;
use crate::constraint::{ConstraintGuard, Constraints};
use crate::error::Result;
use crate::exception::ExceptionHandler;
use crate::middleware::{
    AuthMiddleware, CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareRef,
    MiddlewareRegistry, RateLimitMiddleware, TimingMiddleware,
};
use crate::pattern::{compile_uri, join_paths};
use crate::registry::{GroupDefinition, RouteBuilder, RouteSnapshot};
use crate::route::RouteDefinition;
use crate::router::DomainPattern;
use crate::url::UrlGenerator;
use crate::views::Views;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type RouteFile = Box<dyn FnOnce(&mut RouteBuilder) -> Result<()>>;

/// Application builder
pub struct Kernel {
    config: AppConfig,
    middleware: MiddlewareRegistry,
    bindings: ModelBindings,
    views: Views,
    route_files: Vec<(String, RouteFile)>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl Kernel {
    /// Kernel with the built-in named middleware registered
    ///
    /// `log`, `timing`, `cors` and `throttle` are always available; `auth`
    /// only when a JWT secret is configured.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let mut middleware = MiddlewareRegistry::new();
        middleware.register("log", LoggingMiddleware::new());
        middleware.register("timing", TimingMiddleware::new());
        middleware.register("cors", CorsMiddleware::new());
        middleware.register("throttle", RateLimitMiddleware::new(60, Duration::from_secs(60)));
        if let Some(secret) = &config.jwt_secret {
            middleware.register("auth", AuthMiddleware::new(secret));
        }

        Self {
            config,
            middleware,
            bindings: ModelBindings::new(),
            views: Views::new(),
            route_files: Vec::new(),
        }
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Register a named middleware
    #[must_use]
    pub fn middleware(mut self, name: &str, middleware: impl Middleware + 'static) -> Self {
        self.middleware.register(name, middleware);
        self
    }

    /// Register a middleware group alias
    #[must_use]
    pub fn middleware_group<I, R>(mut self, name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MiddlewareRef>,
    {
        self.middleware.group(name, entries);
        self
    }

    /// Append to the middleware every route runs first
    #[must_use]
    pub fn global(mut self, entry: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push_global(entry);
        self
    }

    /// Bind route parameter `param` to models found by `binder`
    #[must_use]
    pub fn bind_model(mut self, param: &str, binder: impl ModelBinder + 'static) -> Self {
        self.bindings.bind(param, binder);
        self
    }

    /// Bind route parameter `param` through a lookup function
    #[must_use]
    pub fn bind_model_fn<F>(mut self, param: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.bindings.bind_fn(param, lookup);
        self
    }

    /// Register a view template
    #[must_use]
    pub fn view(mut self, name: &str, template: &str) -> Self {
        self.views.add(name, template);
        self
    }

    /// Register a route file
    #[must_use]
    pub fn routes<F>(mut self, name: &str, register: F) -> Self
    where
        F: FnOnce(&mut RouteBuilder) -> Result<()> + 'static,
    {
        self.route_files.push((name.to_string(), Box::new(register)));
        self
    }

    /// Run every route file and compile the application
    ///
    /// # Errors
    ///
    /// Any registration error of a route file, plus invalid patterns,
    /// constraints, domains, unresolvable middleware and route conflicts.
    pub fn build(self) -> Result<Application> {
        let views = Arc::new(self.views);
        let shared = Arc::new(Shared {
            bindings: self.bindings,
            views: Arc::clone(&views),
            exceptions: ExceptionHandler::new(self.config.debug, views),
        });

        let mut files = self.route_files;
        files.sort_by(|(a, _), (b, _)| (a == "web", a).cmp(&(b == "web", b)));

        let mut compiler = Compiler {
            registry: &self.middleware,
            shared: &shared,
            urls: UrlGenerator::new(self.config.url.as_deref()),
            domains: Vec::new(),
            defaults: Vec::new(),
        };

        let mut builder = RouteBuilder::new();
        for (file, register) in files {
            register(&mut builder)?;
            let snapshot = builder.get_all_groups_and_methods();
            compiler.compile_file(&file, &snapshot)?;
        }

        let Compiler {
            urls,
            domains,
            defaults,
            ..
        } = compiler;
        let app = Application::new(self.config, domains, defaults, urls, shared);
        info!(
            app = %app.config().name,
            env = %app.config().env,
            routes = app.route_count(),
            named = app.urls().len(),
            domains = app.domain_count(),
            "Application booted"
        );
        Ok(app)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("middleware", &self.middleware)
            .field("bindings", &self.bindings)
            .field(
                "route_files",
                &self.route_files.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Where a route sits: its enclosing groups, outermost first
struct Scope<'s> {
    groups: Vec<&'s GroupDefinition>,
}

impl Scope<'_> {
    fn prefix(&self) -> String {
        self.groups
            .iter()
            .fold(String::new(), |prefix, group| join_paths(&prefix, &group.prefix))
    }

    fn domain(&self) -> Option<&str> {
        self.groups.iter().find_map(|g| g.domain.as_deref())
    }

    fn constraints(&self) -> Constraints {
        let mut merged = Constraints::new();
        for group in &self.groups {
            merged.extend(&group.constraints);
        }
        merged
    }

    fn middleware(&self) -> impl Iterator<Item = &MiddlewareRef> {
        self.groups.iter().flat_map(|g| g.middleware.iter())
    }
}

struct Compiler<'k> {
    registry: &'k MiddlewareRegistry,
    shared: &'k Arc<Shared>,
    urls: UrlGenerator,
    domains: Vec<SubApp>,
    defaults: Vec<SubApp>,
}

impl Compiler<'_> {
    fn compile_file(&mut self, file: &str, snapshot: &RouteSnapshot) -> Result<()> {
        let mut default = SubApp::new(file, None);
        let root = Scope { groups: Vec::new() };
        self.compile_scope(
            file,
            snapshot,
            &root,
            &snapshot.default_routes,
            &snapshot.default_resources,
            &mut default,
        )?;
        for id in &snapshot.default_groups {
            self.compile_group(file, snapshot, &root, *id, &mut default)?;
        }

        debug!(file = %file, routes = default.router.len(), "Route file compiled");
        self.defaults.push(default);
        Ok(())
    }

    fn compile_group<'s>(
        &mut self,
        file: &str,
        snapshot: &'s RouteSnapshot,
        parent: &Scope<'s>,
        id: usize,
        default: &mut SubApp,
    ) -> Result<()> {
        let Some(group) = snapshot.groups.get(&id) else {
            return Ok(());
        };
        let mut groups = parent.groups.clone();
        groups.push(group);
        let scope = Scope { groups };

        self.compile_scope(file, snapshot, &scope, &group.routes, &group.resources, default)?;
        for child in &group.groups {
            self.compile_group(file, snapshot, &scope, *child, default)?;
        }
        Ok(())
    }

    fn compile_scope(
        &mut self,
        file: &str,
        snapshot: &RouteSnapshot,
        scope: &Scope<'_>,
        routes: &[usize],
        resources: &[usize],
        default: &mut SubApp,
    ) -> Result<()> {
        let resource_routes = resources
            .iter()
            .filter_map(|id| snapshot.resources.get(id))
            .flat_map(|resource| resource.actions.values());
        for id in routes.iter().chain(resource_routes) {
            if let Some(route) = snapshot.routes.get(id) {
                self.compile_route(file, scope, route, default)?;
            }
        }
        Ok(())
    }

    fn compile_route(
        &mut self,
        file: &str,
        scope: &Scope<'_>,
        route: &RouteDefinition,
        default: &mut SubApp,
    ) -> Result<()> {
        let uri = join_paths(&scope.prefix(), &route.uri);
        let path = compile_uri(&uri)?;
        let constraints = Arc::new(route.constraints.compile()?);

        let mut entries: Vec<MiddlewareRef> = self.registry.global().to_vec();
        if self.registry.has_group(file) {
            entries.push(MiddlewareRef::parse(file));
        }
        let group_constraints = scope.constraints();
        if !group_constraints.is_empty() {
            let guard: Arc<dyn Middleware> =
                Arc::new(ConstraintGuard::new(group_constraints.compile()?));
            entries.push(MiddlewareRef::Inline(guard));
        }
        entries.extend(scope.middleware().cloned());
        entries.extend(route.middleware.iter().cloned());
        let layers = self.registry.resolve(&entries)?;

        let label = route.name.clone().unwrap_or_else(|| {
            let methods: Vec<&str> = route.methods.iter().map(|m| m.as_str()).collect();
            format!("{} {uri}", methods.join("|"))
        });
        let endpoint = Arc::new(Endpoint::new(
            label,
            route.handler.clone(),
            layers,
            Arc::clone(self.shared),
        ));
        debug!(
            route = %endpoint.label(),
            uri = %uri,
            middleware = ?endpoint.middleware(),
            "Route compiled"
        );

        let domain = scope.domain();
        if let Some(name) = &route.name {
            if !self.urls.register(name, path.clone(), domain) {
                warn!(name = %name, uri = %uri, file = %file, "Duplicate route name ignored");
            }
        }

        let target = match domain {
            Some(pattern) => self.domain_app(pattern)?,
            None => default,
        };
        if route.fallback {
            if target.fallback.is_some() {
                warn!(app = %target.label, "Fallback route already registered, keeping the first");
            } else {
                target.fallback = Some(endpoint);
            }
            return Ok(());
        }
        target.router.insert(&route.methods, &path, constraints, endpoint)
    }

    fn domain_app(&mut self, pattern: &str) -> Result<&mut SubApp> {
        let index = match self.domains.iter().position(|app| app.label == pattern) {
            Some(index) => index,
            None => {
                let domain = DomainPattern::compile(pattern)?;
                self.domains.push(SubApp::new(pattern, Some(domain)));
                self.domains.len() - 1
            }
        };
        Ok(&mut self.domains[index])
    }
}
