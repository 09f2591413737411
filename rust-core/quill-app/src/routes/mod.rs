//! Route files of the host application.

mod api;
mod web;

use quill_core::Kernel;

/// Register middleware groups, views and both route files
pub fn register(kernel: Kernel) -> Kernel {
    let auth = kernel.config().jwt_secret.is_some();
    kernel
        .middleware_group("web", ["log"])
        .middleware_group("api", ["timing", "throttle:60,1"])
        .view("welcome", web::WELCOME)
        .view("errors.404", web::NOT_FOUND)
        .routes("web", web::routes)
        .routes("api", move |r| api::routes(r, auth))
}
