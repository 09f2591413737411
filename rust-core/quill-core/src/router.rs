//! # Router
//!
//! Radix-trie based matching using `matchit`, one tree per HTTP method.
//!
//! Each compiled route registers every concrete variant produced by the
//! pattern compiler. Variants use position-based slot names, so the router
//! maps slots back to parameter names and returns [`Params`] in declared
//! order. Route-level constraints are checked here: a candidate whose
//! parameters fail them does not match.
//!
//! [`DomainPattern`] matches hosts such as `{account}.example.com`.

use crate::constraint::CompiledConstraints;
use crate::error::{Error, Result};
use crate::pattern::{compile, CompiledPath, RouteKind, Segment};
use crate::request::Params;
use matchit::Router as MatchitRouter;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP HEAD
    Head,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP PATCH
    Patch,
    /// HTTP DELETE
    Delete,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Every method, as registered by `any()`
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Head,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Options,
    ];

    /// Map a hyper method; extension methods are not routable
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        method.as_str().parse().ok()
    }

    /// Upper-case token
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::MethodNotSupported {
                method: s.to_string(),
            })
    }
}

/// A route stored in the router
#[derive(Debug)]
struct RouteEntry<T> {
    value: Arc<T>,
    sequence: Vec<String>,
    constraints: Arc<CompiledConstraints>,
}

/// One concrete variant pointing back at its route
#[derive(Debug, Clone)]
struct VariantEntry {
    route: usize,
    slots: Vec<(String, String)>,
}

/// Per-method storage for routes
struct MethodRoutes {
    /// Matchit router for path matching
    router: MatchitRouter<usize>,
    /// Variant metadata indexed by the value stored in `router`
    variants: Vec<VariantEntry>,
}

impl MethodRoutes {
    fn new() -> Self {
        Self {
            router: MatchitRouter::new(),
            variants: Vec::new(),
        }
    }
}

/// Matched route with its bound parameters
#[derive(Debug)]
pub struct Match<'r, T> {
    /// The stored value
    pub value: &'r Arc<T>,
    /// Parameters in declared order (absent optionals are `None`)
    pub params: Params,
}

/// Method-aware radix router over values of type `T`
pub struct Router<T> {
    method_routes: HashMap<Method, MethodRoutes>,
    routes: Vec<RouteEntry<T>>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self {
            method_routes: HashMap::new(),
            routes: Vec::new(),
        }
    }

    /// Number of stored routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Register `value` for `methods` under every variant of `path`
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteConflict` when a variant collides with an already
    /// registered path for the same method.
    pub fn insert(
        &mut self,
        methods: &[Method],
        path: &CompiledPath,
        constraints: Arc<CompiledConstraints>,
        value: Arc<T>,
    ) -> Result<()> {
        let route = self.routes.len();
        self.routes.push(RouteEntry {
            value,
            sequence: path.sequence.clone(),
            constraints,
        });

        let variants = path.variants(RouteKind::Dispatch);
        for method in methods {
            let method_routes = self
                .method_routes
                .entry(*method)
                .or_insert_with(MethodRoutes::new);

            for variant in &variants {
                let id = method_routes.variants.len();
                method_routes
                    .router
                    .insert(variant.matcher_path(), id)
                    .map_err(|e| Error::RouteConflict {
                        method: method.to_string(),
                        path: variant.path(),
                        reason: e.to_string(),
                    })?;
                method_routes.variants.push(VariantEntry {
                    route,
                    slots: variant.slots(),
                });
            }
        }
        Ok(())
    }

    /// Match a request path
    ///
    /// Returns `None` when nothing matches or when the matched route's
    /// constraints reject a parameter.
    #[must_use]
    pub fn match_route(&self, method: Method, path: &str) -> Option<Match<'_, T>> {
        let method_routes = self.method_routes.get(&method)?;
        let matched = method_routes.router.at(path).ok()?;
        let variant = method_routes.variants.get(*matched.value)?;
        let entry = self.routes.get(variant.route)?;

        let mut params = Params::new();
        for name in &entry.sequence {
            let value = variant
                .slots
                .iter()
                .find(|(_, param)| param == name)
                .and_then(|(slot, _)| matched.params.get(slot))
                .map(decode_segment);
            params.push(name.clone(), value);
        }

        let rejected = params
            .iter()
            .any(|(name, value)| value.is_some_and(|v| !entry.constraints.allows(name, v)));
        if rejected {
            return None;
        }

        Some(Match {
            value: &entry.value,
            params,
        })
    }

    /// Methods other than `except` that have a route matching `path`
    #[must_use]
    pub fn allowed_methods(&self, path: &str, except: Method) -> Vec<Method> {
        let mut allowed: Vec<Method> = Method::ALL
            .into_iter()
            .filter(|m| *m != except)
            .filter(|m| self.match_route(*m, path).is_some())
            .collect();
        allowed.sort();
        allowed
    }
}

impl<T> fmt::Debug for Router<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("methods", &self.method_routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Decode `%XX` escapes in a path segment
fn decode_segment(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..=i + 2]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A compiled host pattern such as `{account}.example.com`
#[derive(Debug, Clone)]
pub struct DomainPattern {
    pattern: String,
    regex: Regex,
    params: Vec<String>,
}

impl DomainPattern {
    /// Compile a host pattern; `{param}` labels match one DNS label each
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` when the pattern repeats a
    /// parameter or does not yield a valid matcher.
    pub fn compile(pattern: &str) -> Result<Self> {
        let labels: Vec<&str> = pattern.split('.').collect();
        let compiled = compile(&labels, false)?;

        let body = compiled
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => regex::escape(text),
                Segment::Required(_) | Segment::Optional(_) => "([^.]+)".to_string(),
                Segment::Wildcard(_) => "(.+)".to_string(),
            })
            .collect::<Vec<_>>()
            .join(r"\.");

        let regex = Regex::new(&format!("(?i)^{body}$")).map_err(|e| Error::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            params: compiled.sequence,
        })
    }

    /// The pattern as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Parameter names in declared order
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Match `host` (without port), binding its parameters
    #[must_use]
    pub fn matches(&self, host: &str) -> Option<Params> {
        let captures = self.regex.captures(host)?;
        let mut params = Params::new();
        for (index, name) in self.params.iter().enumerate() {
            let value = captures.get(index + 1).map(|m| m.as_str().to_string());
            params.push(name.clone(), value);
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Constraints;
    use crate::pattern::compile_uri;

    fn add(router: &mut Router<&'static str>, methods: &[Method], uri: &str, value: &'static str) {
        router
            .insert(
                methods,
                &compile_uri(uri).unwrap(),
                Arc::new(CompiledConstraints::default()),
                Arc::new(value),
            )
            .unwrap();
    }

    #[test]
    fn test_basic_routing() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/", "home");
        add(&mut router, &[Method::Get], "/users", "index");
        add(&mut router, &[Method::Post], "/users", "store");

        assert_eq!(**router.match_route(Method::Get, "/").unwrap().value, "home");
        assert_eq!(**router.match_route(Method::Get, "/users").unwrap().value, "index");
        assert_eq!(**router.match_route(Method::Get, "/users/").unwrap().value, "index");
        assert_eq!(**router.match_route(Method::Post, "/users").unwrap().value, "store");
    }

    #[test]
    fn test_params_in_declared_order() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/users/{user}/posts/{post}", "show");

        let m = router.match_route(Method::Get, "/users/456/posts/789").unwrap();
        let pairs: Vec<_> = m.params.iter().collect();
        assert_eq!(pairs, vec![("user", Some("456")), ("post", Some("789"))]);
    }

    #[test]
    fn test_optional_params() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/users/{id}/{tab?}", "show");

        let m = router.match_route(Method::Get, "/users/42").unwrap();
        assert_eq!(m.params.get("id"), Some("42"));
        assert!(m.params.contains("tab"));
        assert_eq!(m.params.get("tab"), None);

        let m = router.match_route(Method::Get, "/users/42/posts").unwrap();
        assert_eq!(m.params.get("tab"), Some("posts"));
    }

    #[test]
    fn test_differently_named_params_share_prefix() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/posts/{post}", "show");
        add(&mut router, &[Method::Get], "/posts/{slug}/comments", "comments");

        let m = router.match_route(Method::Get, "/posts/hello/comments").unwrap();
        assert_eq!(m.params.get("slug"), Some("hello"));
        let m = router.match_route(Method::Get, "/posts/hello").unwrap();
        assert_eq!(m.params.get("post"), Some("hello"));
    }

    #[test]
    fn test_wildcard() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/files/*", "files");
        let m = router.match_route(Method::Get, "/files/a/b/c.txt").unwrap();
        assert_eq!(m.params.get("wildcard"), Some("a/b/c.txt"));
    }

    #[test]
    fn test_constraints_reject_match() {
        let mut constraints = Constraints::new();
        constraints.add("id", crate::constraint::NUMBER);
        let mut router = Router::new();
        router
            .insert(
                &[Method::Get],
                &compile_uri("/users/{id}").unwrap(),
                Arc::new(constraints.compile().unwrap()),
                Arc::new("show"),
            )
            .unwrap();

        assert!(router.match_route(Method::Get, "/users/42").is_some());
        assert!(router.match_route(Method::Get, "/users/abc").is_none());
    }

    #[test]
    fn test_conflict_is_an_error() {
        let mut router: Router<&str> = Router::new();
        add(&mut router, &[Method::Get], "/users", "a");
        let err = router
            .insert(
                &[Method::Get],
                &compile_uri("/users").unwrap(),
                Arc::new(CompiledConstraints::default()),
                Arc::new("b"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::RouteConflict { .. }));
    }

    #[test]
    fn test_method_not_allowed() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/users", "index");
        add(&mut router, &[Method::Delete], "/users", "purge");

        assert!(router.match_route(Method::Post, "/users").is_none());
        assert_eq!(
            router.allowed_methods("/users", Method::Post),
            vec![Method::Get, Method::Delete]
        );
    }

    #[test]
    fn test_percent_decoding() {
        let mut router = Router::new();
        add(&mut router, &[Method::Get], "/tags/{tag}", "tag");
        let m = router.match_route(Method::Get, "/tags/caf%C3%A9").unwrap();
        assert_eq!(m.params.get("tag"), Some("café"));
        assert_eq!(decode_segment("100%"), "100%");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
        assert_eq!(Method::from_hyper(&hyper::Method::DELETE), Some(Method::Delete));
    }

    #[test]
    fn test_domain_pattern() {
        let domain = DomainPattern::compile("{account}.example.com").unwrap();
        let params = domain.matches("acme.example.com").unwrap();
        assert_eq!(params.get("account"), Some("acme"));
        assert!(domain.matches("a.b.example.com").is_none());
        assert!(domain.matches("example.com").is_none());
        assert!(domain.matches("acme.example.org").is_none());
    }
}
