//! # URL Generation
//!
//! Reverse routing over the route names recorded at boot.

use crate::error::{Error, Result};
use crate::pattern::{compile, CompiledPath, Segment};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

#[derive(Debug, Clone)]
struct NamedRoute {
    path: CompiledPath,
    domain: Option<CompiledPath>,
}

/// Name → path table used by `route(name, params)`
#[derive(Debug, Clone, Default)]
pub struct UrlGenerator {
    routes: HashMap<String, NamedRoute>,
    scheme: String,
}

impl UrlGenerator {
    /// Create an empty generator; absolute URLs for domain routes use the
    /// scheme of `app_url` (`http` when absent)
    #[must_use]
    pub fn new(app_url: Option<&str>) -> Self {
        let scheme = app_url
            .and_then(|url| url.split_once("://"))
            .map_or("http", |(scheme, _)| scheme)
            .to_string();
        Self {
            routes: HashMap::new(),
            scheme,
        }
    }

    /// Record `name`; returns `false` when the name is already taken
    pub fn register(&mut self, name: &str, path: CompiledPath, domain: Option<&str>) -> bool {
        if self.routes.contains_key(name) {
            return false;
        }
        let domain = domain.map(|d| {
            let labels: Vec<&str> = d.split('.').collect();
            compile(&labels, false).unwrap_or_else(|_| CompiledPath::root())
        });
        self.routes
            .insert(name.to_string(), NamedRoute { path, domain });
        true
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Number of named routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is named
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Build the URL of `name`
    ///
    /// Required parameters must be supplied; optional ones are substituted
    /// or stripped. Leftover parameters become a sorted query string.
    ///
    /// # Errors
    ///
    /// - `Error::RouteNotDefined` for an unknown name
    /// - `Error::MissingRouteParameter` when a required parameter is absent
    pub fn route<I, K, V>(&self, name: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let route = self.routes.get(name).ok_or_else(|| Error::RouteNotDefined {
            name: name.to_string(),
        })?;
        let mut params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();

        let host = match &route.domain {
            Some(domain) => Some(fill(name, domain, &mut params, ".")?),
            None => None,
        };
        let mut url = fill(name, &route.path, &mut params, "/")?;

        if !params.is_empty() {
            let query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        Ok(match host {
            Some(host) => format!("{}://{host}{url}", self.scheme),
            None => url,
        })
    }
}

/// Substitute `params` into `path`, consuming the ones used
fn fill(
    name: &str,
    path: &CompiledPath,
    params: &mut BTreeMap<String, String>,
    separator: &str,
) -> Result<String> {
    let mut parts = Vec::with_capacity(path.segments.len());
    for segment in &path.segments {
        match segment {
            Segment::Literal(text) => parts.push(text.clone()),
            Segment::Required(param) => {
                let value = params
                    .remove(param)
                    .ok_or_else(|| Error::MissingRouteParameter {
                        name: name.to_string(),
                        param: param.clone(),
                    })?;
                parts.push(encode(&value));
            }
            Segment::Optional(param) => match params.remove(param) {
                Some(value) => parts.push(encode(&value)),
                None => break,
            },
            Segment::Wildcard(param) => {
                if let Some(value) = params.remove(param) {
                    let encoded: Vec<String> = value.split('/').map(encode).collect();
                    parts.push(encoded.join("/"));
                }
            }
        }
    }

    let joined = parts.join(separator);
    Ok(if separator == "/" {
        format!("/{joined}")
    } else {
        joined
    })
}

/// Percent-encode everything but RFC 3986 unreserved characters
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
