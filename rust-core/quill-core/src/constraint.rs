//! # Regex Constraints
//!
//! Per-parameter regex alternatives. A value passes when it matches ANY of
//! the alternatives declared for its parameter.
//!
//! Route-level constraints are checked by the router while matching; group
//! level constraints are checked by [`ConstraintGuard`], a middleware the
//! kernel places in front of the group's own middleware.

use crate::error::{Error, Result};
use crate::exception::HttpException;
use crate::middleware::{BoxFuture, Flow, Middleware};
use crate::request::Request;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pattern used by `where_number`
pub const NUMBER: &str = "[0-9]+";
/// Pattern used by `where_alpha`
pub const ALPHA: &str = "[a-zA-Z]+";
/// Pattern used by `where_alpha_numeric`
pub const ALPHA_NUMERIC: &str = "[a-zA-Z0-9]+";
/// Pattern used by `where_uuid`
pub const UUID: &str = "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

/// Declared (uncompiled) constraints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraints {
    patterns: BTreeMap<String, Vec<String>>,
}

impl Constraints {
    /// Create an empty constraint set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alternative pattern for `param`
    pub fn add(&mut self, param: impl Into<String>, pattern: impl Into<String>) {
        let pattern = pattern.into();
        let alternatives = self.patterns.entry(param.into()).or_default();
        if !alternatives.contains(&pattern) {
            alternatives.push(pattern);
        }
    }

    /// Add every alternative of `other`
    pub fn extend(&mut self, other: &Self) {
        for (param, alternatives) in &other.patterns {
            for pattern in alternatives {
                self.add(param.clone(), pattern.clone());
            }
        }
    }

    /// Restrict `param` to one of the literal `values`
    pub fn add_in<I, S>(&mut self, param: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternation = values
            .into_iter()
            .map(|v| regex::escape(v.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        self.add(param, alternation);
    }

    /// Alternatives declared for `param`
    #[must_use]
    pub fn get(&self, param: &str) -> Option<&[String]> {
        self.patterns.get(param).map(Vec::as_slice)
    }

    /// Whether no constraint was declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Compile every alternative into an anchored regex
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConstraint` for a pattern that does not compile.
    pub fn compile(&self) -> Result<CompiledConstraints> {
        let mut compiled = BTreeMap::new();
        for (param, alternatives) in &self.patterns {
            let regexes = alternatives
                .iter()
                .map(|pattern| {
                    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                        Error::InvalidConstraint {
                            param: param.clone(),
                            source,
                        }
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            compiled.insert(param.clone(), regexes);
        }
        Ok(CompiledConstraints { regexes: compiled })
    }
}

/// Constraints ready for matching
#[derive(Debug, Clone, Default)]
pub struct CompiledConstraints {
    regexes: BTreeMap<String, Vec<Regex>>,
}

impl CompiledConstraints {
    /// Whether `value` satisfies the constraints of `param`
    ///
    /// Unconstrained parameters always pass.
    #[must_use]
    pub fn allows(&self, param: &str, value: &str) -> bool {
        self.regexes
            .get(param)
            .map_or(true, |alternatives| alternatives.iter().any(|re| re.is_match(value)))
    }

    /// Whether no constraint is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }
}

/// Shorthand helpers shared by route, group and resource builders
pub trait ConstrainParams: Sized {
    /// Add a raw regex alternative for `param`
    fn where_(self, param: &str, pattern: &str) -> Self;

    /// `param` must be digits
    fn where_number(self, param: &str) -> Self {
        self.where_(param, NUMBER)
    }

    /// `param` must be letters
    fn where_alpha(self, param: &str) -> Self {
        self.where_(param, ALPHA)
    }

    /// `param` must be letters or digits
    fn where_alpha_numeric(self, param: &str) -> Self {
        self.where_(param, ALPHA_NUMERIC)
    }

    /// `param` must be a UUID
    fn where_uuid(self, param: &str) -> Self {
        self.where_(param, UUID)
    }

    /// `param` must equal one of `values`
    fn where_in(self, param: &str, values: &[&str]) -> Self {
        let alternation = values
            .iter()
            .map(|v| regex::escape(v))
            .collect::<Vec<_>>()
            .join("|");
        self.where_(param, &alternation)
    }
}

/// Enforces group-level constraints before the group's middleware run
pub struct ConstraintGuard {
    constraints: Arc<CompiledConstraints>,
}

impl ConstraintGuard {
    /// Guard the given constraints
    #[must_use]
    pub fn new(constraints: CompiledConstraints) -> Self {
        Self {
            constraints: Arc::new(constraints),
        }
    }
}

impl Middleware for ConstraintGuard {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        _args: &'a [String],
    ) -> BoxFuture<'a, std::result::Result<Flow, HttpException>> {
        Box::pin(async move {
            let rejected = req
                .params()
                .iter()
                .find(|&(name, value)| value.is_some_and(|v| !self.constraints.allows(name, v)));
            match rejected {
                Some((name, _)) => {
                    tracing::debug!(param = %name, path = %req.path, "Group constraint rejected request");
                    Err(HttpException::not_found())
                }
                None => Ok(Flow::Continue),
            }
        })
    }

    fn name(&self) -> &'static str {
        "ConstraintGuard"
    }
}
