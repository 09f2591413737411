//! # Resource Routes
//!
//! `resource("photos", controller)` registers the seven conventional actions:
//!
//! | Action  | Method    | URI                   | Name            |
//! |---------|-----------|-----------------------|-----------------|
//! | index   | GET       | `/photos`             | `photos.index`  |
//! | create  | GET       | `/photos/create`      | `photos.create` |
//! | store   | POST      | `/photos`             | `photos.store`  |
//! | show    | GET       | `/photos/{photo}`     | `photos.show`   |
//! | edit    | GET       | `/photos/{photo}/edit`| `photos.edit`   |
//! | update  | PUT/PATCH | `/photos/{photo}`     | `photos.update` |
//! | destroy | DELETE    | `/photos/{photo}`     | `photos.destroy`|
//!
//! Dotted names nest: `photos.comments` lives under `/photos/{photo}/comments`.

use crate::constraint::{ConstrainParams, Constraints};
use crate::error::{Error, Result};
use crate::middleware::MiddlewareRef;
use crate::pattern::join_names;
use crate::registry::RouteBuilder;
use crate::route::{Controller, RouteDefinition};
use crate::router::Method;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One of the seven conventional actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceAction {
    /// List
    Index,
    /// Creation form
    Create,
    /// Persist a new item
    Store,
    /// Display one item
    Show,
    /// Edit form
    Edit,
    /// Persist changes
    Update,
    /// Delete one item
    Destroy,
}

impl ResourceAction {
    /// Registration order
    pub const ALL: [Self; 7] = [
        Self::Index,
        Self::Create,
        Self::Store,
        Self::Show,
        Self::Edit,
        Self::Update,
        Self::Destroy,
    ];

    /// Controller action name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Create => "create",
            Self::Store => "store",
            Self::Show => "show",
            Self::Edit => "edit",
            Self::Update => "update",
            Self::Destroy => "destroy",
        }
    }

    pub(crate) fn methods(self) -> Vec<Method> {
        match self {
            Self::Index | Self::Create | Self::Show | Self::Edit => vec![Method::Get, Method::Head],
            Self::Store => vec![Method::Post],
            Self::Update => vec![Method::Put, Method::Patch],
            Self::Destroy => vec![Method::Delete],
        }
    }

    pub(crate) fn uri(self, base: &str, param: &str) -> String {
        match self {
            Self::Index | Self::Store => base.to_string(),
            Self::Create => format!("{base}/create"),
            Self::Show | Self::Update | Self::Destroy => format!("{base}/{{{param}}}"),
            Self::Edit => format!("{base}/{{{param}}}/edit"),
        }
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "post" => Ok(Self::Store),
            other => Self::ALL
                .into_iter()
                .find(|a| a.as_str() == other)
                .ok_or_else(|| Error::UnknownResourceAction {
                    action: other.to_string(),
                }),
        }
    }
}

/// Which filter a resource uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFilter {
    /// Keep only the listed actions
    Only,
    /// Drop the listed actions
    Except,
}

/// A registered resource
#[derive(Clone)]
pub struct ResourceDefinition {
    /// Unique id within one route file
    pub id: usize,
    /// Name as given (`photos`, `photos.comments`)
    pub name: String,
    /// Controller receiving every action
    pub controller: Arc<dyn Controller>,
    /// Surviving actions and their route ids
    pub actions: BTreeMap<ResourceAction, usize>,
    /// Filter applied so far
    pub filter: Option<ResourceFilter>,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("actions", &self.actions)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Base URI and route parameter for a resource name
///
/// `photos` → (`photos`, `photo`); `photos.comments` →
/// (`photos/{photo}/comments`, `comment`).
#[must_use]
pub fn resource_path(name: &str) -> (String, String) {
    let parts: Vec<&str> = name.split('.').filter(|p| !p.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        return (String::new(), String::new());
    };

    let mut base: Vec<String> = parents
        .iter()
        .map(|p| format!("{}/{{{}}}", pluralize(p), param_name(p)))
        .collect();
    base.push(pluralize(last));
    (base.join("/"), param_name(last))
}

fn param_name(segment: &str) -> String {
    singularize(segment).replace('-', "_")
}

const IRREGULAR: [(&str, &str); 6] = [
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("mouse", "mice"),
    ("tooth", "teeth"),
];

const UNCOUNTABLE: [&str; 5] = ["equipment", "information", "media", "news", "series"];

/// English singular form (conventional suffix rules)
#[must_use]
pub fn singularize(word: &str) -> String {
    if UNCOUNTABLE.iter().any(|u| word.ends_with(u)) {
        return word.to_string();
    }
    for (singular, plural) in IRREGULAR {
        if let Some(stem) = word.strip_suffix(plural) {
            return format!("{stem}{singular}");
        }
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if ["ss", "us", "is"].iter().any(|s| word.ends_with(s)) {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

/// English plural form; already-plural words are kept
#[must_use]
pub fn pluralize(word: &str) -> String {
    if UNCOUNTABLE.iter().any(|u| word.ends_with(u)) {
        return word.to_string();
    }
    for (singular, plural) in IRREGULAR {
        if word.ends_with(plural) {
            return word.to_string();
        }
        if let Some(stem) = word.strip_suffix(singular) {
            return format!("{stem}{plural}");
        }
    }
    if singularize(word) != word {
        return word.to_string();
    }
    let before_y = word.strip_suffix('y').and_then(|stem| stem.chars().last());
    if before_y.is_some_and(|c| !"aeiou".contains(c)) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// Chaining handle returned by [`RouteBuilder::resource`]
pub struct ResourceRoute<'a> {
    builder: &'a mut RouteBuilder,
    id: usize,
    name_prefix: String,
}

impl<'a> ResourceRoute<'a> {
    pub(crate) fn new(builder: &'a mut RouteBuilder, id: usize, name_prefix: String) -> Self {
        Self {
            builder,
            id,
            name_prefix,
        }
    }

    /// The resource id
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Keep only `actions`
    ///
    /// # Errors
    ///
    /// `Error::ResourceFilterConflict` after `except`, or
    /// `Error::UnknownResourceAction` for an unknown action name.
    pub fn only(self, actions: &[&str]) -> Result<Self> {
        let keep = parse_actions(actions)?;
        self.filter(ResourceFilter::Only, |action| !keep.contains(&action))
    }

    /// Drop `actions`
    ///
    /// # Errors
    ///
    /// `Error::ResourceFilterConflict` after `only`, or
    /// `Error::UnknownResourceAction` for an unknown action name.
    pub fn except(self, actions: &[&str]) -> Result<Self> {
        let drop = parse_actions(actions)?;
        self.filter(ResourceFilter::Except, |action| drop.contains(&action))
    }

    fn filter(mut self, kind: ResourceFilter, remove: impl Fn(ResourceAction) -> bool) -> Result<Self> {
        let removed = {
            let Some(resource) = self.builder.resource_mut(self.id) else {
                return Ok(self);
            };
            if resource.filter.is_some_and(|existing| existing != kind) {
                return Err(Error::ResourceFilterConflict {
                    resource: resource.name.clone(),
                });
            }
            resource.filter = Some(kind);

            let doomed: Vec<ResourceAction> =
                resource.actions.keys().copied().filter(|a| remove(*a)).collect();
            doomed
                .into_iter()
                .filter_map(|action| resource.actions.remove(&action))
                .collect::<Vec<_>>()
        };
        for route in removed {
            self.builder.remove_route(route);
        }
        Ok(self)
    }

    /// Append middleware to every generated route
    pub fn middleware<I, R>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MiddlewareRef>,
    {
        let entries: Vec<MiddlewareRef> = entries.into_iter().map(Into::into).collect();
        self.for_each_route(|route| route.middleware.extend(entries.iter().cloned()));
        self
    }

    /// Override generated names, e.g. `[("index", "gallery")]`
    ///
    /// # Errors
    ///
    /// `Error::UnknownResourceAction` for an unknown action name.
    pub fn names(mut self, names: &[(&str, &str)]) -> Result<Self> {
        for (action, name) in names {
            let action: ResourceAction = action.parse()?;
            let full = join_names(&[self.name_prefix.as_str(), name]);
            let route_id = self
                .builder
                .resource_mut(self.id)
                .and_then(|r| r.actions.get(&action).copied());
            if let Some(route) = route_id.and_then(|id| self.builder.route_mut(id)) {
                route.name = Some(full);
            }
        }
        Ok(self)
    }

    fn for_each_route(&mut self, mut f: impl FnMut(&mut RouteDefinition)) {
        let ids: Vec<usize> = self
            .builder
            .resource_def(self.id)
            .map(|r| r.actions.values().copied().collect())
            .unwrap_or_default();
        for id in ids {
            if let Some(route) = self.builder.route_mut(id) {
                f(route);
            }
        }
    }
}

impl ConstrainParams for ResourceRoute<'_> {
    fn where_(mut self, param: &str, pattern: &str) -> Self {
        let mut single = Constraints::new();
        single.add(param, pattern);
        self.for_each_route(|route| route.constraints.extend(&single));
        self
    }
}

fn parse_actions(actions: &[&str]) -> Result<Vec<ResourceAction>> {
    actions.iter().map(|a| a.parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflection() {
        assert_eq!(pluralize("photo"), "photos");
        assert_eq!(pluralize("photos"), "photos");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("status"), "statuses");
        assert_eq!(pluralize("person"), "people");

        assert_eq!(singularize("photos"), "photo");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("news"), "news");
    }

    #[test]
    fn test_resource_path() {
        assert_eq!(resource_path("photos"), ("photos".to_string(), "photo".to_string()));
        assert_eq!(
            resource_path("blog-posts"),
            ("blog-posts".to_string(), "blog_post".to_string())
        );
        assert_eq!(
            resource_path("photos.comments"),
            ("photos/{photo}/comments".to_string(), "comment".to_string())
        );
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("post".parse::<ResourceAction>().unwrap(), ResourceAction::Store);
        assert_eq!("destroy".parse::<ResourceAction>().unwrap(), ResourceAction::Destroy);
        assert!("purge".parse::<ResourceAction>().is_err());
    }

    #[test]
    fn test_action_uris() {
        assert_eq!(ResourceAction::Edit.uri("photos", "photo"), "photos/{photo}/edit");
        assert_eq!(ResourceAction::Update.methods(), vec![Method::Put, Method::Patch]);
    }
}
