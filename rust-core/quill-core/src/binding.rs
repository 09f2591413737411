//! # Route-Model Binding
//!
//! A [`ModelBinder`] registered for a parameter name turns the raw path
//! value into a model before the handler runs. A lookup that finds nothing
//! ends the request with 404.

use crate::database::{validate_identifier, DatabasePool};
use crate::error::Result;
use crate::exception::HttpException;
use crate::middleware::BoxFuture;
use crate::request::Request;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Resolves a path parameter into a model
pub trait ModelBinder: Send + Sync {
    /// Look up the model identified by `value`
    fn find<'a>(&'a self, value: &'a str) -> BoxFuture<'a, std::result::Result<Option<Value>, HttpException>>;
}

/// Binder backed by a plain lookup function
pub struct FnBinder<F>(F);

impl<F> ModelBinder for FnBinder<F>
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn find<'a>(&'a self, value: &'a str) -> BoxFuture<'a, std::result::Result<Option<Value>, HttpException>> {
        Box::pin(async move { Ok((self.0)(value)) })
    }
}

/// Binder that loads one row of a table by column
#[derive(Debug, Clone)]
pub struct TableBinder {
    pool: DatabasePool,
    table: String,
    column: String,
}

impl TableBinder {
    /// Look rows up by primary key `id`
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when `table` is not a valid identifier.
    pub fn new(pool: DatabasePool, table: &str) -> Result<Self> {
        Self::by(pool, table, "id")
    }

    /// Look rows up by `column`
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when an identifier is invalid.
    pub fn by(pool: DatabasePool, table: &str, column: &str) -> Result<Self> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

impl ModelBinder for TableBinder {
    fn find<'a>(&'a self, value: &'a str) -> BoxFuture<'a, std::result::Result<Option<Value>, HttpException>> {
        Box::pin(async move {
            let row = self
                .pool
                .find_row(&self.table, &self.column, value)
                .await
                .map_err(HttpException::from)?;
            Ok(row.map(Value::Object))
        })
    }
}

/// Parameter name → binder
#[derive(Default, Clone)]
pub struct ModelBindings {
    binders: HashMap<String, Arc<dyn ModelBinder>>,
}

impl ModelBindings {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `param` with `binder`, replacing any previous binder
    pub fn bind(&mut self, param: impl Into<String>, binder: impl ModelBinder + 'static) {
        self.binders.insert(param.into(), Arc::new(binder));
    }

    /// Bind `param` with a lookup function
    pub fn bind_fn<F>(&mut self, param: impl Into<String>, lookup: F)
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.bind(param, FnBinder(lookup));
    }

    /// Whether `param` has a binder
    #[must_use]
    pub fn contains(&self, param: &str) -> bool {
        self.binders.contains_key(param)
    }

    /// Whether nothing is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.binders.is_empty()
    }

    /// Resolve every bound parameter of `req` and store the models on it
    ///
    /// Absent optional parameters are skipped.
    ///
    /// # Errors
    ///
    /// `404` when a binder finds nothing; binder failures pass through.
    pub async fn resolve(&self, req: &mut Request) -> std::result::Result<(), HttpException> {
        if self.binders.is_empty() {
            return Ok(());
        }

        let lookups: Vec<(String, String)> = req
            .params()
            .iter()
            .filter(|(name, _)| self.binders.contains_key(*name))
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v.to_string())))
            .collect();

        for (name, value) in lookups {
            let Some(binder) = self.binders.get(&name) else {
                continue;
            };
            match binder.find(&value).await? {
                Some(model) => req.set_model(name, model),
                None => {
                    debug!(param = %name, value = %value, "No model bound");
                    return Err(HttpException::not_found());
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModelBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<&String> = self.binders.keys().collect();
        params.sort();
        f.debug_struct("ModelBindings").field("params", &params).finish()
    }
}
