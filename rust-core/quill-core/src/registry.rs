//! # Route Registry
//!
//! [`RouteBuilder`] is the context passed to every route file. It records
//! routes, groups and resources under auto-incrementing ids and is drained
//! once per file by [`RouteBuilder::get_all_groups_and_methods`].
//!
//! Groups are lexically scoped: `group()` pushes the group onto the current
//! group and alias stacks for the duration of its callback.

use crate::constraint::{ConstrainParams, Constraints};
use crate::error::{Error, Result};
use crate::middleware::MiddlewareRef;
use crate::pattern::{compile_uri, join_names};
use crate::resource::{resource_path, ResourceAction, ResourceDefinition, ResourceRoute};
use crate::route::{Controller, Handler, RouteDefinition, RouteHandle};
use crate::router::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Settings for [`RouteBuilder::group`]
#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    prefix: String,
    middleware: Vec<MiddlewareRef>,
    name: String,
    domain: Option<String>,
    constraints: Constraints,
}

impl GroupConfig {
    /// Empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// URI prefix for every child
    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Middleware for every child
    #[must_use]
    pub fn middleware<I, R>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MiddlewareRef>,
    {
        self.middleware.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Name prefix (alias) for every child
    #[must_use]
    pub fn name(mut self, alias: &str) -> Self {
        self.name = alias.to_string();
        self
    }

    /// Host pattern, e.g. `{account}.example.com`
    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }
}

impl ConstrainParams for GroupConfig {
    fn where_(mut self, param: &str, pattern: &str) -> Self {
        self.constraints.add(param, pattern);
        self
    }
}

/// A registered group
#[derive(Debug, Clone)]
pub struct GroupDefinition {
    /// Unique id within one route file
    pub id: usize,
    /// Enclosing group
    pub parent: Option<usize>,
    /// URI prefix
    pub prefix: String,
    /// Group middleware
    pub middleware: Vec<MiddlewareRef>,
    /// Name prefix
    pub alias: String,
    /// Host pattern
    pub domain: Option<String>,
    /// Constraints inherited by descendants
    pub constraints: Constraints,
    /// Direct child routes
    pub routes: Vec<usize>,
    /// Direct child resources
    pub resources: Vec<usize>,
    /// Direct child groups
    pub groups: Vec<usize>,
}

/// Everything one route file registered
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    /// Routes by id (resource routes included)
    pub routes: BTreeMap<usize, RouteDefinition>,
    /// Groups by id
    pub groups: BTreeMap<usize, GroupDefinition>,
    /// Resources by id
    pub resources: BTreeMap<usize, ResourceDefinition>,
    /// Routes outside any group
    pub default_routes: Vec<usize>,
    /// Resources outside any group
    pub default_resources: Vec<usize>,
    /// Top-level groups
    pub default_groups: Vec<usize>,
}

impl RouteSnapshot {
    /// Whether nothing was registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.groups.is_empty()
    }
}

/// Registration context for route files
#[derive(Debug, Default)]
pub struct RouteBuilder {
    next_route_id: usize,
    next_group_id: usize,
    next_resource_id: usize,
    snapshot: RouteSnapshot,
    current_group: Vec<usize>,
    current_as: Vec<String>,
}

impl RouteBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `GET` route; also answers `HEAD`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn get(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Get, Method::Head], uri, handler)
    }

    /// `POST` route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn post(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Post], uri, handler)
    }

    /// `PUT` route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn put(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Put], uri, handler)
    }

    /// `PATCH` route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn patch(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Patch], uri, handler)
    }

    /// `DELETE` route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn delete(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Delete], uri, handler)
    }

    /// `OPTIONS` route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn options(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Options], uri, handler)
    }

    /// `HEAD` route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn head(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(vec![Method::Head], uri, handler)
    }

    /// Route answering every method
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn any(&mut self, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        self.add_route(Method::ALL.to_vec(), uri, handler)
    }

    /// Route answering the listed methods
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn matching(
        &mut self,
        methods: &[Method],
        uri: &str,
        handler: Handler,
    ) -> Result<RouteHandle<'_>> {
        let mut methods = methods.to_vec();
        if methods.contains(&Method::Get) && !methods.contains(&Method::Head) {
            methods.push(Method::Head);
        }
        self.add_route(methods, uri, handler)
    }

    /// `GET` route rendering a registered view
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn view(&mut self, uri: &str, view: &str, data: Value) -> Result<RouteHandle<'_>> {
        let handler = Handler::View {
            name: view.to_string(),
            data,
        };
        self.get(uri, handler)
    }

    /// Redirect `uri` to `to` with `302 Found`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn redirect(&mut self, uri: &str, to: &str) -> Result<RouteHandle<'_>> {
        self.redirect_with(uri, to, 302)
    }

    /// Redirect `uri` to `to` with `301 Moved Permanently`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a malformed URI.
    pub fn permanent_redirect(&mut self, uri: &str, to: &str) -> Result<RouteHandle<'_>> {
        self.redirect_with(uri, to, 301)
    }

    fn redirect_with(&mut self, uri: &str, to: &str, status: u16) -> Result<RouteHandle<'_>> {
        let handler = Handler::Redirect {
            to: to.to_string(),
            status,
        };
        self.add_route(Method::ALL.to_vec(), uri, handler)
    }

    /// Handler for requests no other route of this file matched
    ///
    /// Group middleware of the enclosing groups still apply.
    pub fn fallback(&mut self, handler: Handler) -> RouteHandle<'_> {
        self.push_route(vec![Method::Get, Method::Head], "/", handler)
            .mark_fallback()
    }

    /// The seven conventional routes for `name`, dispatched to `controller`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` when `name` yields an invalid URI.
    pub fn resource<C: Controller + 'static>(
        &mut self,
        name: &str,
        controller: Arc<C>,
    ) -> Result<ResourceRoute<'_>> {
        let (base, param) = resource_path(name);
        let controller: Arc<dyn Controller> = controller;
        let name_prefix = self.name_prefix();

        let mut actions = BTreeMap::new();
        for action in ResourceAction::ALL {
            let uri = action.uri(&base, &param);
            compile_uri(&uri)?;
            let handler = Handler::Controller {
                controller: Arc::clone(&controller),
                action: action.as_str().to_string(),
            };
            let id = self.next_route_id;
            self.next_route_id += 1;
            let mut route = RouteDefinition::new(id, uri, action.methods(), handler);
            route.name = Some(join_names(&[name_prefix.as_str(), name, action.as_str()]));
            self.snapshot.routes.insert(id, route);
            actions.insert(action, id);
        }

        let id = self.next_resource_id;
        self.next_resource_id += 1;
        self.snapshot.resources.insert(
            id,
            ResourceDefinition {
                id,
                name: name.to_string(),
                controller,
                actions,
                filter: None,
            },
        );
        match self.current_group.last().copied() {
            Some(group) => {
                if let Some(group) = self.snapshot.groups.get_mut(&group) {
                    group.resources.push(id);
                }
            }
            None => self.snapshot.default_resources.push(id),
        }
        debug!(resource = %name, base = %base, "Resource registered");
        Ok(ResourceRoute::new(self, id, name_prefix))
    }

    /// Register routes inside a group
    ///
    /// The group is popped again when `routes` returns, also on error.
    ///
    /// # Errors
    ///
    /// - `Error::DomainAlreadySet` when an enclosing group already has a domain
    /// - `Error::InvalidRoutePattern` for a malformed prefix
    /// - anything `routes` returns
    pub fn group<F>(&mut self, config: GroupConfig, routes: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if let Some(domain) = &config.domain {
            if let Some(existing) = self.inherited_domain() {
                return Err(Error::DomainAlreadySet {
                    domain: domain.clone(),
                    existing,
                });
            }
        }
        compile_uri(&config.prefix)?;

        let id = self.next_group_id;
        self.next_group_id += 1;
        let parent = self.current_group.last().copied();
        self.snapshot.groups.insert(
            id,
            GroupDefinition {
                id,
                parent,
                prefix: config.prefix,
                middleware: config.middleware,
                alias: config.name.clone(),
                domain: config.domain,
                constraints: config.constraints,
                routes: Vec::new(),
                resources: Vec::new(),
                groups: Vec::new(),
            },
        );
        match parent.and_then(|p| self.snapshot.groups.get_mut(&p)) {
            Some(parent) => parent.groups.push(id),
            None => self.snapshot.default_groups.push(id),
        }

        self.current_group.push(id);
        self.current_as.push(config.name);
        let result = routes(self);
        self.current_group.pop();
        self.current_as.pop();
        result
    }

    /// Drain everything registered so far and reset the builder
    #[must_use]
    pub fn get_all_groups_and_methods(&mut self) -> RouteSnapshot {
        let drained = std::mem::take(self);
        drained.snapshot
    }

    fn add_route(&mut self, methods: Vec<Method>, uri: &str, handler: Handler) -> Result<RouteHandle<'_>> {
        compile_uri(uri)?;
        Ok(self.push_route(methods, uri, handler))
    }

    fn push_route(&mut self, methods: Vec<Method>, uri: &str, handler: Handler) -> RouteHandle<'_> {
        let id = self.next_route_id;
        self.next_route_id += 1;
        debug!(id, uri = %uri, methods = ?methods, "Route registered");

        match self.current_group.last().copied() {
            Some(group) => {
                if let Some(group) = self.snapshot.groups.get_mut(&group) {
                    group.routes.push(id);
                }
            }
            None => self.snapshot.default_routes.push(id),
        }

        let name_prefix = self.name_prefix();
        let route = self
            .snapshot
            .routes
            .entry(id)
            .or_insert_with(|| RouteDefinition::new(id, uri, methods, handler));
        RouteHandle::new(route, name_prefix)
    }

    fn name_prefix(&self) -> String {
        join_names(&self.current_as)
    }

    fn inherited_domain(&self) -> Option<String> {
        self.current_group
            .iter()
            .filter_map(|id| self.snapshot.groups.get(id))
            .find_map(|group| group.domain.clone())
    }

    pub(crate) fn resource_def(&self, id: usize) -> Option<&ResourceDefinition> {
        self.snapshot.resources.get(&id)
    }

    pub(crate) fn resource_mut(&mut self, id: usize) -> Option<&mut ResourceDefinition> {
        self.snapshot.resources.get_mut(&id)
    }

    pub(crate) fn route_mut(&mut self, id: usize) -> Option<&mut RouteDefinition> {
        self.snapshot.routes.get_mut(&id)
    }

    pub(crate) fn remove_route(&mut self, id: usize) {
        self.snapshot.routes.remove(&id);
        self.snapshot.default_routes.retain(|r| *r != id);
        for group in self.snapshot.groups.values_mut() {
            group.routes.retain(|r| *r != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::BoxFuture;
    use crate::request::Request;
    use crate::response::{HandlerResult, Response};
    use crate::route::handler;

    fn ok() -> Handler {
        handler(|_req| async { "ok" })
    }

    struct Photos;

    impl Controller for Photos {
        fn call<'a>(&'a self, action: &'a str, _req: Request) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move { Ok(Response::text(action)) })
        }
    }

    fn names(snapshot: &RouteSnapshot) -> Vec<String> {
        snapshot
            .routes
            .values()
            .filter_map(|r| r.name.clone())
            .collect()
    }

    #[test]
    fn test_ids_and_default_routes() {
        let mut r = RouteBuilder::new();
        assert_eq!(r.get("/", ok()).unwrap().id(), 0);
        assert_eq!(r.post("/users", ok()).unwrap().id(), 1);

        let snapshot = r.get_all_groups_and_methods();
        assert_eq!(snapshot.default_routes, vec![0, 1]);
        assert_eq!(snapshot.routes[&0].methods, vec![Method::Get, Method::Head]);
    }

    #[test]
    fn test_invalid_uri_rejected() {
        let mut r = RouteBuilder::new();
        assert!(r.get("/users/{id?}/edit", ok()).is_err());
        assert!(r.get("/bad path", ok()).is_err());
    }

    #[test]
    fn test_nested_groups_compose_names() {
        let mut r = RouteBuilder::new();
        r.group(GroupConfig::new().prefix("/admin").name("admin."), |r| {
            r.group(GroupConfig::new().prefix("users").name("users"), |r| {
                r.get("/", ok())?.name("index");
                Ok(())
            })?;
            r.get("/dashboard", ok())?.name("dashboard");
            Ok(())
        })
        .unwrap();
        r.get("/about", ok()).unwrap().name("about");

        let snapshot = r.get_all_groups_and_methods();
        assert_eq!(
            names(&snapshot),
            vec!["admin.users.index", "admin.dashboard", "about"]
        );
        assert_eq!(snapshot.default_groups, vec![0]);
        assert_eq!(snapshot.groups[&0].groups, vec![1]);
        assert_eq!(snapshot.groups[&1].parent, Some(0));
        assert_eq!(snapshot.groups[&0].routes, vec![1]);
        assert_eq!(snapshot.default_routes, vec![2]);
    }

    #[test]
    fn test_group_stack_popped_on_error() {
        let mut r = RouteBuilder::new();
        let result = r.group(GroupConfig::new().name("api"), |r| {
            r.get("/broken/{a?}/x", ok())?;
            Ok(())
        });
        assert!(result.is_err());
        r.get("/after", ok()).unwrap().name("after");

        let snapshot = r.get_all_groups_and_methods();
        assert_eq!(names(&snapshot), vec!["after"]);
        assert_eq!(snapshot.default_routes.len(), 1);
    }

    #[test]
    fn test_domain_set_once_per_chain() {
        let mut r = RouteBuilder::new();
        let err = r
            .group(GroupConfig::new().domain("{account}.example.com"), |r| {
                r.group(GroupConfig::new().domain("api.example.com"), |_| Ok(()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::DomainAlreadySet { .. }));

        let mut r = RouteBuilder::new();
        r.group(GroupConfig::new().domain("a.example.com"), |_| Ok(()))
            .unwrap();
        r.group(GroupConfig::new().domain("b.example.com"), |_| Ok(()))
            .unwrap();
    }

    #[test]
    fn test_resource_routes() {
        let mut r = RouteBuilder::new();
        r.resource("photos", Arc::new(Photos)).unwrap();
        let snapshot = r.get_all_groups_and_methods();

        let uris: Vec<&str> = snapshot.routes.values().map(|r| r.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "photos",
                "photos/create",
                "photos",
                "photos/{photo}",
                "photos/{photo}/edit",
                "photos/{photo}",
                "photos/{photo}"
            ]
        );
        assert!(names(&snapshot).contains(&"photos.store".to_string()));
        assert_eq!(snapshot.default_resources, vec![0]);
    }

    #[test]
    fn test_resource_filters() {
        let mut r = RouteBuilder::new();
        r.resource("photos", Arc::new(Photos))
            .unwrap()
            .only(&["index", "show"])
            .unwrap();
        r.resource("videos", Arc::new(Photos))
            .unwrap()
            .except(&["create", "edit"])
            .unwrap();
        let snapshot = r.get_all_groups_and_methods();

        assert_eq!(snapshot.resources[&0].actions.len(), 2);
        assert_eq!(snapshot.resources[&1].actions.len(), 5);
        assert_eq!(snapshot.routes.len(), 7);
    }

    #[test]
    fn test_only_and_except_conflict() {
        let mut r = RouteBuilder::new();
        let err = r
            .resource("photos", Arc::new(Photos))
            .unwrap()
            .only(&["index"])
            .unwrap()
            .except(&["show"])
            .err()
            .unwrap();
        assert!(matches!(err, Error::ResourceFilterConflict { .. }));
    }

    #[test]
    fn test_resource_where_and_names() {
        let mut r = RouteBuilder::new();
        r.group(GroupConfig::new().name("admin"), |r| {
            r.resource("photos", Arc::new(Photos))?
                .names(&[("index", "gallery")])?
                .where_number("photo")
                .middleware(["auth"]);
            Ok(())
        })
        .unwrap();
        let snapshot = r.get_all_groups_and_methods();

        assert!(names(&snapshot).contains(&"admin.gallery".to_string()));
        let show = snapshot
            .routes
            .values()
            .find(|r| r.name.as_deref() == Some("admin.photos.show"))
            .unwrap();
        assert!(show.constraints.get("photo").is_some());
        assert_eq!(show.middleware.len(), 1);
        assert_eq!(snapshot.groups[&0].resources, vec![0]);
    }

    #[test]
    fn test_drain_resets_everything() {
        let mut r = RouteBuilder::new();
        r.group(GroupConfig::new().prefix("/a"), |r| {
            r.get("/x", ok())?;
            Ok(())
        })
        .unwrap();
        r.resource("photos", Arc::new(Photos)).unwrap();
        let first = r.get_all_groups_and_methods();
        assert!(!first.is_empty());

        let second = r.get_all_groups_and_methods();
        assert!(second.is_empty());
        assert!(second.resources.is_empty());

        assert_eq!(r.get("/y", ok()).unwrap().id(), 0);
        let third = r.get_all_groups_and_methods();
        assert_eq!(third.default_routes, vec![0]);
        assert!(third.default_groups.is_empty());
    }

    #[test]
    fn test_fallback_and_helpers() {
        let mut r = RouteBuilder::new();
        r.view("/welcome", "welcome", Value::Null).unwrap();
        r.redirect("/here", "/there").unwrap();
        r.matching(&[Method::Get, Method::Post], "/form", ok()).unwrap();
        let id = r.fallback(ok()).id();
        let snapshot = r.get_all_groups_and_methods();

        assert!(snapshot.routes[&id].fallback);
        assert_eq!(snapshot.routes[&1].methods.len(), Method::ALL.len());
        assert_eq!(
            snapshot.routes[&2].methods,
            vec![Method::Get, Method::Post, Method::Head]
        );
    }
}
