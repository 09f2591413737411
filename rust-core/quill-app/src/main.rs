//! # Quill host
//!
//! Loads `quill.toml` (plus `APP_*` environment overrides), registers the
//! `web` and `api` route files and serves them until Ctrl-C.

mod routes;

use anyhow::Context;
use quill_core::{AppConfig, Kernel};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quill=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load(Path::new("quill.toml")).context("loading configuration")?;
    let server_config = config.server_config()?;
    info!(
        app = %config.name,
        env = %config.env,
        debug = config.debug,
        "Booting application"
    );

    let kernel = routes::register(Kernel::new(config));
    let app = kernel.build().context("compiling routes")?;
    info!(
        routes = app.route_count(),
        domains = app.domain_count(),
        "Routes compiled"
    );

    quill_core::serve(Arc::new(app), server_config).await?;
    info!("Server stopped");
    Ok(())
}
