//! # Configuration
//!
//! Application settings read from a TOML file and overridden by the
//! conventional environment variables (`APP_NAME`, `APP_ENV`, `APP_DEBUG`,
//! `APP_URL`, `APP_HOST`, `APP_PORT`, `APP_MAX_BODY`, `JWT_SECRET`).
//!
//! ```toml
//! name = "Quill"
//! env = "production"
//! debug = false
//! url = "https://example.com"
//! host = "0.0.0.0"
//! port = 8080
//! ```

use crate::error::{Error, Result};
use crate::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Application settings; every field has a default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, used in logs
    pub name: String,
    /// Environment name (`local`, `production`, ...)
    pub env: String,
    /// Render exception details
    pub debug: bool,
    /// Public base URL; its scheme is used for absolute route URLs
    pub url: Option<String>,
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Max request body size in bytes
    pub max_body: usize,
    /// HS256 secret enabling the `auth` middleware
    pub jwt_secret: Option<String>,
    /// Keep HTTP/1 connections alive
    pub keep_alive: bool,
    /// Seconds to wait for in-flight connections on shutdown
    pub shutdown_timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Quill".to_string(),
            env: "production".to_string(),
            debug: false,
            url: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_body: 1024 * 1024,
            jwt_secret: None,
            keep_alive: true,
            shutdown_timeout: 30,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the document is not valid TOML or has
    /// fields of the wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            reason: format!("Parse error: {e}"),
        })
    }

    /// Load a TOML file, then apply environment overrides
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the file cannot be read or parsed, or an
    /// override does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
                reason: format!("Cannot read {}: {e}", path.display()),
            })?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults plus environment overrides
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when an override does not parse.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a numeric or boolean value does not parse.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("APP_NAME") {
            self.name = name;
        }
        if let Some(env) = lookup("APP_ENV") {
            self.env = env;
        }
        if let Some(debug) = lookup("APP_DEBUG") {
            self.debug = parse_bool("APP_DEBUG", &debug)?;
        }
        if let Some(url) = lookup("APP_URL") {
            self.url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(host) = lookup("APP_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("APP_PORT") {
            self.port = parse_number("APP_PORT", &port)?;
        }
        if let Some(max_body) = lookup("APP_MAX_BODY") {
            self.max_body = parse_number("APP_MAX_BODY", &max_body)?;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.jwt_secret = Some(secret).filter(|s| !s.is_empty());
        }
        Ok(self)
    }

    /// Listener settings derived from this configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when `host` is not an IP address (or
    /// `localhost`).
    pub fn server_config(&self) -> Result<ServerConfig> {
        let ip: IpAddr = if self.host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host.parse().map_err(|_| Error::Config {
                reason: format!("APP_HOST '{}' is not an IP address", self.host),
            })?
        };
        Ok(ServerConfig {
            address: SocketAddr::new(ip, self.port),
            keep_alive: self.keep_alive,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            max_body_size: self.max_body,
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().trim_matches(|c: char| c == '(' || c == ')').to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config {
            reason: format!("{key} must be a boolean, got '{other}'"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::Config {
        reason: format!("{key} must be a number, got '{raw}'"),
    })
}
