//! # Pattern Compiler
//!
//! Turns URI templates such as `/users/{id}/{tab?}` into a [`CompiledPath`]:
//! the classified segment list, parameter metadata, and the concrete matcher
//! paths the router registers.
//!
//! `matchit` has no optional-segment syntax, so a template with N trailing
//! optional parameters expands into N+1 concrete paths.

use crate::error::{Error, Result};
use std::fmt;

/// A classified path (or host) segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Static text
    Literal(String),
    /// `{name}`
    Required(String),
    /// `{name?}`
    Optional(String),
    /// Trailing `*`, captures the rest of the path
    Wildcard(String),
}

impl Segment {
    /// Parameter name, if this segment captures one
    #[must_use]
    pub fn param(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Required(name) | Self::Optional(name) | Self::Wildcard(name) => Some(name),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.write_str(text),
            Self::Required(name) => write!(f, "{{{name}}}"),
            Self::Optional(name) => write!(f, "{{{name}?}}"),
            Self::Wildcard(name) => write!(f, "{{*{name}}}"),
        }
    }
}

/// Name given to the catch-all parameter produced by a trailing `*`
pub const WILDCARD_PARAM: &str = "wildcard";

/// Output of the pattern compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPath {
    /// Template in router syntax, e.g. `/users/{id}/{tab?}`
    pub path: String,
    /// Required parameter names in declared order
    pub required: Vec<String>,
    /// Optional parameter names in declared order
    pub optional: Vec<String>,
    /// Every parameter in declared order, used for positional binding
    pub sequence: Vec<String>,
    /// Classified segments
    pub segments: Vec<Segment>,
}

impl CompiledPath {
    /// The compiled root path `/`
    #[must_use]
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            required: Vec::new(),
            optional: Vec::new(),
            sequence: Vec::new(),
            segments: Vec::new(),
        }
    }

    /// Whether the path has any parameter
    #[must_use]
    pub fn has_params(&self) -> bool {
        !self.sequence.is_empty()
    }

    /// Concrete variants for the router, full path first
    #[must_use]
    pub fn variants(&self, kind: RouteKind) -> Vec<PathVariant> {
        let optional_count = self
            .segments
            .iter()
            .rev()
            .take_while(|s| matches!(s, Segment::Optional(_)))
            .count();

        let mut variants: Vec<PathVariant> = Vec::new();
        for dropped in 0..=optional_count {
            let kept = self.segments.len() - dropped;
            let segments: Vec<Segment> = self.segments[..kept]
                .iter()
                .map(|s| match s {
                    Segment::Optional(name) => Segment::Required(name.clone()),
                    other => other.clone(),
                })
                .collect();

            let plain = PathVariant {
                segments: segments.clone(),
                trailing_slash: false,
            };
            let slashed = PathVariant {
                segments,
                trailing_slash: true,
            };

            for variant in [Some(plain), (kind == RouteKind::Dispatch).then_some(slashed)]
                .into_iter()
                .flatten()
            {
                if !variants.iter().any(|v| v.path() == variant.path()) {
                    variants.push(variant);
                }
            }
        }
        variants
    }
}

impl fmt::Display for CompiledPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// What a compiled path is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// A routable endpoint; each variant also answers with a trailing slash
    Dispatch,
    /// A mount prefix; no trailing-slash duplicates
    Prefix,
}

/// One concrete path registered with the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathVariant {
    /// Segments, optional parameters already promoted to required
    pub segments: Vec<Segment>,
    /// Whether the variant ends with `/`
    pub trailing_slash: bool,
}

impl PathVariant {
    /// Human-readable path using parameter names
    #[must_use]
    pub fn path(&self) -> String {
        self.render(|_, segment| segment.to_string())
    }

    /// Matcher path with position-based slot names (`{p0}`, `{*p3}`)
    ///
    /// Routes sharing a prefix but naming their parameters differently would
    /// otherwise conflict inside the radix tree.
    #[must_use]
    pub fn matcher_path(&self) -> String {
        self.render(|index, segment| match segment {
            Segment::Literal(text) => escape_literal(text),
            Segment::Wildcard(_) => format!("{{*{}}}", slot_name(index)),
            Segment::Required(_) | Segment::Optional(_) => format!("{{{}}}", slot_name(index)),
        })
    }

    /// `(slot, parameter name)` pairs for every captured segment
    #[must_use]
    pub fn slots(&self) -> Vec<(String, String)> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(index, segment)| {
                segment
                    .param()
                    .map(|name| (slot_name(index), name.to_string()))
            })
            .collect()
    }

    fn render(&self, mut segment_text: impl FnMut(usize, &Segment) -> String) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for (index, segment) in self.segments.iter().enumerate() {
            out.push('/');
            out.push_str(&segment_text(index, segment));
        }
        if self.trailing_slash && !matches!(self.segments.last(), Some(Segment::Wildcard(_))) {
            out.push('/');
        }
        out
    }
}

fn slot_name(index: usize) -> String {
    format!("p{index}")
}

fn escape_literal(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Compile pre-split segments into a [`CompiledPath`]
///
/// `strict` is used for URI templates; domain patterns compile with
/// `strict = false`, which lets unclassified labels through as literals.
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` in strict mode when a segment cannot
/// be classified, an optional parameter is followed by anything but another
/// optional parameter, a wildcard is not last, or a name repeats.
pub fn compile<S: AsRef<str>>(segments: &[S], strict: bool) -> Result<CompiledPath> {
    let pattern = || {
        let joined: Vec<&str> = segments.iter().map(AsRef::as_ref).collect();
        format!("/{}", joined.join("/"))
    };
    let invalid = |reason: String| Error::InvalidRoutePattern {
        pattern: pattern(),
        reason,
    };

    let mut compiled = CompiledPath::root();
    let parts: Vec<&str> = segments
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.is_empty())
        .collect();

    for (index, raw) in parts.iter().enumerate() {
        let segment = match classify(raw) {
            Some(segment) => segment,
            None if strict => {
                return Err(invalid(format!("segment '{raw}' is not a valid literal or parameter")))
            }
            None => Segment::Literal((*raw).to_string()),
        };

        if strict {
            let after_optional = matches!(compiled.segments.last(), Some(Segment::Optional(_)));
            if after_optional && !matches!(segment, Segment::Optional(_)) {
                return Err(invalid(format!(
                    "'{raw}' follows an optional parameter; optional parameters must trail"
                )));
            }
            if matches!(segment, Segment::Wildcard(_)) && index + 1 != parts.len() {
                return Err(invalid("a wildcard must be the last segment".to_string()));
            }
        }

        if let Some(name) = segment.param() {
            if compiled.sequence.iter().any(|n| n == name) {
                return Err(invalid(format!("parameter '{name}' appears more than once")));
            }
            compiled.sequence.push(name.to_string());
            match &segment {
                Segment::Optional(_) => compiled.optional.push(name.to_string()),
                _ => compiled.required.push(name.to_string()),
            }
        }
        compiled.segments.push(segment);
    }

    if !compiled.segments.is_empty() {
        compiled.path = compiled
            .segments
            .iter()
            .map(|s| format!("/{s}"))
            .collect::<String>();
    }
    Ok(compiled)
}

/// Split a URI template on `/` and compile it strictly
///
/// # Errors
///
/// See [`compile`].
pub fn compile_uri(uri: &str) -> Result<CompiledPath> {
    let segments: Vec<&str> = uri.split('/').collect();
    compile(&segments, true)
}

/// Produce every concrete path for a compiled template
///
/// N trailing optional parameters yield N+1 paths, full path first. For
/// [`RouteKind::Dispatch`] each path is followed by its trailing-slash twin.
#[must_use]
pub fn generate_optional_param_routes(compiled: &CompiledPath, kind: RouteKind) -> Vec<String> {
    compiled
        .variants(kind)
        .iter()
        .map(PathVariant::path)
        .collect()
}

/// Join a group prefix and a URI into one normalised path
#[must_use]
pub fn join_paths(prefix: &str, uri: &str) -> String {
    let joined: Vec<&str> = prefix
        .split('/')
        .chain(uri.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", joined.join("/"))
}

/// Dot-join route name fragments, ignoring empty ones and stray dots
#[must_use]
pub fn join_names<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref().trim_matches('.'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether `name` is a legal parameter name
#[must_use]
pub fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify(raw: &str) -> Option<Segment> {
    if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let (name, optional) = match inner.strip_suffix('?') {
            Some(name) => (name, true),
            None => (inner, false),
        };
        if !is_param_name(name) {
            return None;
        }
        return Some(if optional {
            Segment::Optional(name.to_string())
        } else {
            Segment::Required(name.to_string())
        });
    }

    if raw == "*" {
        return Some(Segment::Wildcard(WILDCARD_PARAM.to_string()));
    }

    is_safe_literal(raw).then(|| Segment::Literal(raw.to_string()))
}

/// Numeric, alpha, alphanumeric, slug, UUID, or dotted file names
fn is_safe_literal(raw: &str) -> bool {
    let word = |w: &str| !w.is_empty() && w.chars().all(|c| c.is_ascii_alphanumeric());

    let mut dotted = raw.split('.');
    let stem = dotted.next().unwrap_or_default();
    let extensions_ok = dotted.all(word);

    !stem.is_empty() && extensions_ok && stem.split(['-', '_']).all(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_root() {
        let compiled = compile_uri("/").unwrap();
        assert_eq!(compiled.path, "/");
        assert!(compiled.sequence.is_empty());

        let compiled = compile_uri("").unwrap();
        assert_eq!(compiled, CompiledPath::root());
    }

    #[test]
    fn test_compile_collapses_slashes() {
        let compiled = compile_uri("//users///{id}/").unwrap();
        assert_eq!(compiled.path, "/users/{id}");
        assert_eq!(compiled.required, vec!["id"]);
    }

    #[test]
    fn test_compile_optional_params() {
        let compiled = compile_uri("/users/{id}/{tab?}").unwrap();
        assert_eq!(compiled.path, "/users/{id}/{tab?}");
        assert_eq!(compiled.required, vec!["id"]);
        assert_eq!(compiled.optional, vec!["tab"]);
        assert_eq!(compiled.sequence, vec!["id", "tab"]);
    }

    #[test]
    fn test_optional_must_trail() {
        let err = compile_uri("/users/{id?}/edit").unwrap_err();
        assert!(matches!(err, Error::InvalidRoutePattern { .. }));
        assert!(compile_uri("/users/{id?}/{slug}").is_err());
    }

    #[test]
    fn test_safe_literals() {
        for uri in [
            "/2024",
            "/about",
            "/v2",
            "/blog-posts",
            "/snake_case",
            "/123e4567-e89b-12d3-a456-426614174000",
            "/robots.txt",
        ] {
            assert!(compile_uri(uri).is_ok(), "{uri} should compile");
        }
    }

    #[test]
    fn test_strict_rejects_unsafe_segments() {
        for uri in ["/users/{id-x}", "/a b", "/%20", "/*id*", "/-leading", "/{}"] {
            assert!(compile_uri(uri).is_err(), "{uri} should be rejected");
        }
    }

    #[test]
    fn test_non_strict_passes_through() {
        let compiled = compile(&["{account}", "my$host", "com"], false).unwrap();
        assert_eq!(compiled.required, vec!["account"]);
        assert_eq!(
            compiled.segments[1],
            Segment::Literal("my$host".to_string())
        );
    }

    #[test]
    fn test_wildcard_must_be_last() {
        let compiled = compile_uri("/docs/*").unwrap();
        assert_eq!(compiled.sequence, vec![WILDCARD_PARAM]);
        assert!(compile_uri("/docs/*/edit").is_err());
    }

    #[test]
    fn test_duplicate_param_rejected() {
        assert!(compile_uri("/{id}/posts/{id}").is_err());
    }

    #[test]
    fn test_optional_variants_count() {
        let compiled = compile_uri("/archive/{year?}/{month?}/{day?}").unwrap();
        let prefix = generate_optional_param_routes(&compiled, RouteKind::Prefix);
        assert_eq!(
            prefix,
            vec![
                "/archive/{year}/{month}/{day}",
                "/archive/{year}/{month}",
                "/archive/{year}",
                "/archive",
            ]
        );

        let dispatch = generate_optional_param_routes(&compiled, RouteKind::Dispatch);
        assert_eq!(dispatch.len(), 8);
        assert_eq!(dispatch[0], "/archive/{year}/{month}/{day}");
        assert_eq!(dispatch[1], "/archive/{year}/{month}/{day}/");
        for pair in prefix.windows(2) {
            assert!(pair[0].starts_with(&pair[1]));
        }
    }

    #[test]
    fn test_optional_root_variant_deduplicated() {
        let compiled = compile_uri("/{page?}").unwrap();
        let dispatch = generate_optional_param_routes(&compiled, RouteKind::Dispatch);
        assert_eq!(dispatch, vec!["/{page}", "/{page}/", "/"]);
    }

    #[test]
    fn test_matcher_path_uses_slots() {
        let compiled = compile_uri("/users/{user}/posts/{post?}").unwrap();
        let variants = compiled.variants(RouteKind::Prefix);
        assert_eq!(variants[0].matcher_path(), "/users/{p1}/posts/{p3}");
        assert_eq!(
            variants[0].slots(),
            vec![
                ("p1".to_string(), "user".to_string()),
                ("p3".to_string(), "post".to_string())
            ]
        );
        assert_eq!(variants[1].matcher_path(), "/users/{p1}/posts");
    }

    #[test]
    fn test_required_params_round_trip() {
        use crate::constraint::CompiledConstraints;
        use crate::router::{Method, Router};
        use std::sync::Arc;

        let cases: &[(&str, &[(&str, &str)])] = &[
            ("/users/{_id}", &[("_id", "42")]),
            ("/teams/{a1}/members/{userId}", &[("a1", "core"), ("userId", "u-17")]),
            ("/{p3}/{p0}", &[("p3", "first"), ("p0", "second")]),
            ("/files/{p1}/{p0}/{p2}", &[("p1", "a"), ("p0", "b"), ("p2", "c_d")]),
            (
                "/v1/shops/{shop_id}/items/{itemId}/reviews/{R2}",
                &[("shop_id", "9"), ("itemId", "blue-mug"), ("R2", "007")],
            ),
            ("/{x}", &[("x", "robots.txt")]),
        ];

        for (template, params) in cases {
            let compiled = compile_uri(template).unwrap();
            let names: Vec<&str> = params.iter().map(|(name, _)| *name).collect();
            assert_eq!(compiled.sequence, names, "{template}");

            let mut router = Router::new();
            router
                .insert(
                    &[Method::Get],
                    &compiled,
                    Arc::new(CompiledConstraints::default()),
                    Arc::new(*template),
                )
                .unwrap();

            let path = params.iter().fold((*template).to_string(), |path, (name, value)| {
                path.replace(&format!("{{{name}}}"), value)
            });
            let matched = router.match_route(Method::Get, &path).unwrap();
            let bound: Vec<(&str, Option<&str>)> = matched.params.iter().collect();
            let expected: Vec<(&str, Option<&str>)> =
                params.iter().map(|(name, value)| (*name, Some(*value))).collect();
            assert_eq!(bound, expected, "{template} <- {path}");
        }
    }

    #[test]
    fn test_join_helpers() {
        assert_eq!(join_paths("/admin/", "/dashboard"), "/admin/dashboard");
        assert_eq!(join_paths("", "/"), "/");
        assert_eq!(join_names(&["admin.", "users", "", "show"]), "admin.users.show");
    }
}
