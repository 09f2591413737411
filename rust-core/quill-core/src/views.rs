//! # Views
//!
//! Named templates for `view()` routes and custom error pages.
//!
//! Only interpolation is supported: `{{ key }}` is HTML-escaped,
//! `{!! key !!}` is emitted raw. Keys may use dotted paths (`user.name`).

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Registry of named templates
#[derive(Debug, Clone, Default)]
pub struct Views {
    templates: HashMap<String, String>,
}

impl Views {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a template
    pub fn add(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Render `name` with `data`
    ///
    /// # Errors
    ///
    /// Returns `Error::ViewNotFound` for unregistered names.
    pub fn render(&self, name: &str, data: &Value) -> Result<String> {
        let template = self.templates.get(name).ok_or_else(|| Error::ViewNotFound {
            name: name.to_string(),
        })?;
        Ok(interpolate(template, data))
    }
}

fn interpolate(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let raw_at = rest.find("{!!");
        let escaped_at = rest.find("{{");
        let (start, open, close, raw) = match (raw_at, escaped_at) {
            (Some(r), Some(e)) if r <= e => (r, "{!!", "!!}", true),
            (Some(r), None) => (r, "{!!", "!!}", true),
            (_, Some(e)) => (e, "{{", "}}", false),
            (None, None) => break,
        };

        let after_open = &rest[start + open.len()..];
        let Some(end) = after_open.find(close) else {
            break;
        };

        out.push_str(&rest[..start]);
        let key = after_open[..end].trim();
        let text = lookup(data, key).map(display).unwrap_or_default();
        if raw {
            out.push_str(&text);
        } else {
            out.push_str(&escape_html(&text));
        }
        rest = &after_open[end + close.len()..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(data: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(data, |value, part| value.get(part))
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape text for inclusion in HTML
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
