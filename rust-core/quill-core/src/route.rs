//! # Route Metadata
//!
//! Route definitions as recorded by the [`RouteBuilder`](crate::registry::RouteBuilder),
//! and the handler references they dispatch to.

use crate::constraint::{ConstrainParams, Constraints};
use crate::exception::HttpException;
use crate::middleware::{BoxFuture, MiddlewareRef};
use crate::pattern::join_names;
use crate::request::Request;
use crate::response::{HandlerResult, Responder, Response};
use crate::router::Method;
use crate::views::Views;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Boxed async handler
pub type HandlerFn = Arc<dyn Fn(Request) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A class-style handler exposing named actions
///
/// Resources dispatch `index`, `create`, `store`, `show`, `edit`, `update`
/// and `destroy` to the same controller.
pub trait Controller: Send + Sync {
    /// Run `action` for `req`
    fn call<'a>(&'a self, action: &'a str, req: Request) -> BoxFuture<'a, HandlerResult>;
}

/// What a route dispatches to
#[derive(Clone)]
pub enum Handler {
    /// An async function of the request
    Function(HandlerFn),
    /// A controller action
    Controller {
        /// The controller
        controller: Arc<dyn Controller>,
        /// Action name
        action: String,
    },
    /// A registered view
    View {
        /// View name
        name: String,
        /// Data handed to the template
        data: Value,
    },
    /// A fixed redirect
    Redirect {
        /// Target location
        to: String,
        /// 3xx status
        status: u16,
    },
}

/// Wrap an async function as a [`Handler`]
///
/// The function may return anything implementing [`Responder`].
pub fn handler<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    Handler::Function(Arc::new(move |req| {
        let fut = f(req);
        Box::pin(async move { fut.await.respond() })
    }))
}

/// Reference a controller action as a [`Handler`]
pub fn action<C: Controller + 'static>(controller: &Arc<C>, action: &str) -> Handler {
    let controller: Arc<dyn Controller> = Arc::clone(controller) as Arc<dyn Controller>;
    Handler::Controller {
        controller,
        action: action.to_string(),
    }
}

impl Handler {
    /// Run the handler
    pub fn invoke<'a>(&'a self, req: Request, views: &'a Views) -> BoxFuture<'a, HandlerResult> {
        match self {
            Self::Function(f) => f(req),
            Self::Controller { controller, action } => controller.call(action, req),
            Self::View { name, data } => Box::pin(async move {
                let html = views.render(name, data).map_err(HttpException::from)?;
                Ok(Response::html(html))
            }),
            Self::Redirect { to, status } => {
                Box::pin(async move { Ok(Response::redirect(to, *status)) })
            }
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Controller { action, .. } => write!(f, "Controller@{action}"),
            Self::View { name, .. } => write!(f, "View({name})"),
            Self::Redirect { to, status } => write!(f, "Redirect({status} {to})"),
        }
    }
}

/// A registered route
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    /// Unique id within one route file
    pub id: usize,
    /// URI template as written (group prefixes are applied at build time)
    pub uri: String,
    /// Methods the route answers
    pub methods: Vec<Method>,
    /// Dispatch target
    pub handler: Handler,
    /// Full route name including group aliases
    pub name: Option<String>,
    /// Route-level middleware
    pub middleware: Vec<MiddlewareRef>,
    /// Route-level constraints, checked while matching
    pub constraints: Constraints,
    /// Answers otherwise unmatched requests of its sub-application
    pub fallback: bool,
}

impl RouteDefinition {
    /// Create a definition without name, middleware or constraints
    #[must_use]
    pub fn new(id: usize, uri: impl Into<String>, methods: Vec<Method>, handler: Handler) -> Self {
        Self {
            id,
            uri: uri.into(),
            methods,
            handler,
            name: None,
            middleware: Vec::new(),
            constraints: Constraints::new(),
            fallback: false,
        }
    }
}

/// Chaining handle returned by route registration
#[derive(Debug)]
pub struct RouteHandle<'a> {
    route: &'a mut RouteDefinition,
    name_prefix: String,
}

impl<'a> RouteHandle<'a> {
    pub(crate) fn new(route: &'a mut RouteDefinition, name_prefix: String) -> Self {
        Self { route, name_prefix }
    }

    /// The route id
    #[must_use]
    pub fn id(&self) -> usize {
        self.route.id
    }

    /// Name the route; enclosing group aliases are prepended
    pub fn name(self, name: &str) -> Self {
        self.route.name = Some(join_names(&[self.name_prefix.as_str(), name]));
        self
    }

    /// Append route middleware
    pub fn middleware<I, R>(self, entries: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MiddlewareRef>,
    {
        self.route
            .middleware
            .extend(entries.into_iter().map(Into::into));
        self
    }

    pub(crate) fn mark_fallback(self) -> Self {
        self.route.fallback = true;
        self
    }
}

impl ConstrainParams for RouteHandle<'_> {
    fn where_(self, param: &str, pattern: &str) -> Self {
        self.route.constraints.add(param, pattern);
        self
    }
}
