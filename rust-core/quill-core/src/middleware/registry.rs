//! Named middleware, group aliases and the global list.

use super::{Middleware, MiddlewareRef, ResolvedMiddleware};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table that turns [`MiddlewareRef`]s into [`ResolvedMiddleware`]s
#[derive(Default, Clone)]
pub struct MiddlewareRegistry {
    named: HashMap<String, Arc<dyn Middleware>>,
    groups: HashMap<String, Vec<MiddlewareRef>>,
    global: Vec<MiddlewareRef>,
}

impl MiddlewareRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `middleware` under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, middleware: impl Middleware + 'static) {
        self.named.insert(name.into(), Arc::new(middleware));
    }

    /// Register an alias that expands to `entries`
    pub fn group<I, R>(&mut self, name: impl Into<String>, entries: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<MiddlewareRef>,
    {
        self.groups
            .insert(name.into(), entries.into_iter().map(Into::into).collect());
    }

    /// Append to the list every route runs first
    pub fn push_global(&mut self, entry: impl Into<MiddlewareRef>) {
        self.global.push(entry.into());
    }

    /// The global list
    #[must_use]
    pub fn global(&self) -> &[MiddlewareRef] {
        &self.global
    }

    /// Whether `name` is a registered middleware
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Whether `name` is a group alias
    #[must_use]
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Resolve `entries` in order, expanding aliases
    ///
    /// # Errors
    ///
    /// - `Error::UnknownMiddleware` for a name that is neither registered nor an alias
    /// - `Error::MiddlewareCycle` when aliases reference each other
    /// - `Error::InvalidMiddlewareArgs` when a middleware rejects its arguments
    pub fn resolve(&self, entries: &[MiddlewareRef]) -> Result<Vec<ResolvedMiddleware>> {
        let mut resolved = Vec::new();
        let mut expanding = Vec::new();
        for entry in entries {
            self.resolve_into(entry, &mut expanding, &mut resolved)?;
        }
        Ok(resolved)
    }

    fn resolve_into(
        &self,
        entry: &MiddlewareRef,
        expanding: &mut Vec<String>,
        out: &mut Vec<ResolvedMiddleware>,
    ) -> Result<()> {
        let (name, args) = match entry {
            MiddlewareRef::Inline(middleware) => {
                out.push(ResolvedMiddleware {
                    label: middleware.name().to_string(),
                    middleware: Arc::clone(middleware),
                    args: Arc::from(Vec::new()),
                });
                return Ok(());
            }
            MiddlewareRef::Named { name, args } => (name, args),
        };

        if let Some(middleware) = self.named.get(name) {
            middleware
                .validate_args(args)
                .map_err(|reason| Error::InvalidMiddlewareArgs {
                    name: name.clone(),
                    reason,
                })?;
            out.push(ResolvedMiddleware {
                label: name.clone(),
                middleware: Arc::clone(middleware),
                args: Arc::from(args.clone()),
            });
            return Ok(());
        }

        let Some(members) = self.groups.get(name) else {
            return Err(Error::UnknownMiddleware { name: name.clone() });
        };
        if expanding.contains(name) {
            return Err(Error::MiddlewareCycle { name: name.clone() });
        }
        expanding.push(name.clone());
        for member in members {
            self.resolve_into(member, expanding, out)?;
        }
        expanding.pop();
        Ok(())
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut named: Vec<&String> = self.named.keys().collect();
        named.sort();
        let mut groups: Vec<&String> = self.groups.keys().collect();
        groups.sort();
        f.debug_struct("MiddlewareRegistry")
            .field("named", &named)
            .field("groups", &groups)
            .field("global", &self.global)
            .finish()
    }
}
