//! # Validation Module
//!
//! Field → messages error bags and a small rule validator for request input.
//!
//! Rules use the pipe syntax: `"required|string|max:255"`.

use crate::exception::HttpException;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Messages grouped by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Create an empty error bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message for `field`
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    /// Messages for one field
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of fields with errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// First message plus a count of the rest, e.g.
    /// `"The name field is required. (and 1 more error)"`
    #[must_use]
    pub fn summary(&self) -> String {
        let mut messages = self.errors.values().flatten();
        let Some(first) = messages.next() else {
            return "The given data was invalid.".to_string();
        };
        match messages.count() {
            0 => first.clone(),
            1 => format!("{first} (and 1 more error)"),
            n => format!("{first} (and {n} more errors)"),
        }
    }

    /// Turn the bag into an exception
    #[must_use]
    pub fn into_exception(self, redirect: Option<String>) -> HttpException {
        HttpException::Validation {
            errors: self,
            redirect,
        }
    }
}

/// A single parsed rule
#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Required,
    Nullable,
    String,
    Numeric,
    Integer,
    Boolean,
    Email,
    Min(f64),
    Max(f64),
    In(Vec<String>),
}

impl Rule {
    fn parse(raw: &str) -> Option<Self> {
        let (name, arg) = raw.split_once(':').unwrap_or((raw, ""));
        match name.trim() {
            "required" => Some(Self::Required),
            "nullable" => Some(Self::Nullable),
            "string" => Some(Self::String),
            "numeric" => Some(Self::Numeric),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "email" => Some(Self::Email),
            "min" => arg.parse().ok().map(Self::Min),
            "max" => arg.parse().ok().map(Self::Max),
            "in" => Some(Self::In(arg.split(',').map(str::to_string).collect())),
            _ => None,
        }
    }

    fn check(&self, field: &str, value: &Value, numeric: bool) -> Option<String> {
        let label = field.replace('_', " ");
        let size = if numeric {
            as_number(value).unwrap_or_default()
        } else {
            size_of(value)
        };
        let unit = if numeric { "" } else { unit(value) };
        let passes = match self {
            Self::Required | Self::Nullable => true,
            Self::String => value.is_string(),
            Self::Numeric => as_number(value).is_some(),
            Self::Integer => as_number(value).is_some_and(|n| n.fract() == 0.0),
            Self::Boolean => {
                value.is_boolean()
                    || matches!(value.as_str(), Some("0" | "1" | "true" | "false"))
                    || matches!(value.as_i64(), Some(0 | 1))
            }
            Self::Email => value.as_str().is_some_and(looks_like_email),
            Self::Min(min) => size >= *min,
            Self::Max(max) => size <= *max,
            Self::In(allowed) => scalar_text(value).is_some_and(|v| allowed.contains(&v)),
        };
        if passes {
            return None;
        }
        Some(match self {
            Self::Required | Self::Nullable => format!("The {label} field is required."),
            Self::String => format!("The {label} field must be a string."),
            Self::Numeric => format!("The {label} field must be a number."),
            Self::Integer => format!("The {label} field must be an integer."),
            Self::Boolean => format!("The {label} field must be true or false."),
            Self::Email => format!("The {label} field must be a valid email address."),
            Self::Min(min) => format!("The {label} field must be at least {min}{unit}."),
            Self::Max(max) => format!("The {label} field must not be greater than {max}{unit}."),
            Self::In(_) => format!("The selected {label} is invalid."),
        })
    }
}

/// Validate `input` (a JSON object) against `rules`
///
/// Fields that are absent or `null` skip every rule except `required`.
/// Unknown rule names are ignored.
///
/// # Errors
///
/// Returns `HttpException::Validation` carrying every failed message.
pub fn validate(input: &Value, rules: &[(&str, &str)]) -> Result<(), HttpException> {
    let mut errors = ValidationErrors::new();

    for (field, rule_list) in rules {
        let parsed: Vec<Rule> = rule_list.split('|').filter_map(Rule::parse).collect();
        let value = input.get(*field).filter(|v| !is_blank(v));

        match value {
            None => {
                if parsed.contains(&Rule::Required) {
                    errors.add(*field, format!("The {} field is required.", field.replace('_', " ")));
                }
            }
            Some(value) => {
                let numeric = parsed
                    .iter()
                    .any(|r| matches!(r, Rule::Numeric | Rule::Integer));
                for rule in &parsed {
                    if let Some(message) = rule.check(field, value, numeric) {
                        errors.add(*field, message);
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into_exception(None))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Strings measure characters, arrays items, numbers their value
#[allow(clippy::cast_precision_loss)]
fn size_of(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.chars().count() as f64,
        Value::Array(items) => items.len() as f64,
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        _ => 0.0,
    }
}

fn unit(value: &Value) -> &'static str {
    match value {
        Value::String(_) => " characters",
        Value::Array(_) => " items",
        _ => "",
    }
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
        && !s.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors_of(result: Result<(), HttpException>) -> ValidationErrors {
        match result {
            Err(HttpException::Validation { errors, .. }) => errors,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_passes() {
        let input = json!({"email": "ada@example.com", "age": "36", "role": "admin"});
        let rules = [
            ("email", "required|email"),
            ("age", "required|integer|min:18"),
            ("role", "in:admin,editor"),
            ("bio", "nullable|string|max:500"),
        ];
        assert!(validate(&input, &rules).is_ok());
    }

    #[test]
    fn test_required_reports_once() {
        let errors = errors_of(validate(&json!({"name": "  "}), &[("name", "required|string|min:3")]));
        assert_eq!(
            errors.get("name"),
            Some(&["The name field is required.".to_string()][..])
        );
    }

    #[test]
    fn test_collects_every_failure() {
        let input = json!({"email": "nope", "password": "abc"});
        let errors = errors_of(validate(
            &input,
            &[("email", "required|email"), ("password", "required|string|min:8")],
        ));
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.get("password").unwrap()[0],
            "The password field must be at least 8 characters."
        );
        assert!(errors.summary().contains("(and 1 more error)"));
    }

    #[test]
    fn test_serializes_as_map() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "The title field is required.");
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({"title": ["The title field is required."]})
        );
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a b@c.de"));
        assert!(!looks_like_email("@c.de"));
    }
}
