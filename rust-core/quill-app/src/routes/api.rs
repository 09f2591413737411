use quill_core::{handler, GroupConfig, Request, Result, RouteBuilder};
use serde_json::json;

/// JSON API under `/api`
///
/// The `admin` routes need a JWT secret, so they are only registered when
/// `auth` is available.
pub fn routes(r: &mut RouteBuilder, auth: bool) -> Result<()> {
    r.group(GroupConfig::new().prefix("/api").name("api."), |r| {
        r.get("/ping", handler(|_req| async { json!({"pong": true}) }))?
            .name("ping");

        r.get(
            "/me",
            handler(|req: Request| async move {
                json!({ "request_id": req.header("x-request-id"), "claims": req.claims })
            }),
        )?;

        if auth {
            r.group(
                GroupConfig::new().prefix("/admin").name("admin.").middleware(["auth:admin"]),
                |r| {
                    r.get(
                        "/stats",
                        handler(|_req| async { json!({"users": 0, "posts": 0}) }),
                    )?
                    .name("stats");
                    Ok(())
                },
            )?;
        }
        Ok(())
    })
}
