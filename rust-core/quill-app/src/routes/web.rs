use quill_core::middleware::BoxFuture;
use quill_core::{
    handler, ConstrainParams, Controller, HandlerResult, HttpException, Request, Response,
    Result, RouteBuilder,
};
use serde_json::json;
use std::sync::Arc;

pub const WELCOME: &str = "<!DOCTYPE html>\n<html><head><title>{{ app }}</title></head>\
<body><h1>{{ app }}</h1><p>{{ tagline }}</p></body></html>\n";

pub const NOT_FOUND: &str = "<!DOCTYPE html>\n<html><body><h1>{{ status }}</h1>\
<p>{{ message }}</p><a href=\"/\">Home</a></body></html>\n";

/// Browser-facing routes
pub fn routes(r: &mut RouteBuilder) -> Result<()> {
    r.view(
        "/",
        "welcome",
        json!({"app": "Quill", "tagline": "Routes, middleware and nothing else."}),
    )?
    .name("home");
    r.redirect("/home", "/")?;

    r.get(
        "/users/{id}/{tab?}",
        handler(|req: Request| async move {
            json!({
                "id": req.param("id"),
                "tab": req.param("tab").unwrap_or("profile"),
            })
        }),
    )?
    .name("users.show")
    .where_number("id");

    r.resource("posts", Arc::new(PostController))?
        .except(&["destroy"])?
        .where_number("post");

    Ok(())
}

struct PostController;

impl Controller for PostController {
    fn call<'a>(&'a self, action: &'a str, req: Request) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match action {
                "index" => Ok(Response::json_value(&json!({"posts": []}))),
                "create" => Ok(Response::html("<form method=\"post\" action=\"/posts\"></form>")),
                "store" | "update" => {
                    quill_core::validate(&req.input(), &[("title", "required|string|max:120")])?;
                    let status = if action == "store" { 201 } else { 200 };
                    Ok(Response::json_value(&req.input()).with_status(status))
                }
                "show" | "edit" => Ok(Response::json_value(&json!({
                    "id": req.param("post"),
                    "action": action,
                }))),
                _ => Err(HttpException::not_found()),
            }
        })
    }
}
