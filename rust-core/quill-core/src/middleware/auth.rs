//! JWT bearer authentication, registered as `auth`.
//!
//! `auth` only requires a valid token; `auth:admin,editor` also requires the
//! token's `role` claim to be one of the listed roles.

use super::{BoxFuture, Flow, Middleware};
use crate::exception::HttpException;
use crate::request::Request;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::warn;

/// Bearer-token guard
#[derive(Clone)]
pub struct AuthMiddleware {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthMiddleware {
    /// Create auth config from shared secret (HS256)
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn verify(&self, req: &Request) -> Result<Value, HttpException> {
        let token = req
            .header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(HttpException::unauthenticated)?;

        decode::<Value>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(path = %req.path, "JWT validation failed: {}", e);
                HttpException::unauthenticated()
            })
    }
}

impl Middleware for AuthMiddleware {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        args: &'a [String],
    ) -> BoxFuture<'a, Result<Flow, HttpException>> {
        Box::pin(async move {
            let claims = self.verify(req)?;
            if !args.is_empty() {
                let role = claims.get("role").and_then(Value::as_str);
                if !role.is_some_and(|r| args.iter().any(|a| a == r)) {
                    return Err(HttpException::forbidden());
                }
            }
            req.claims = Some(claims);
            Ok(Flow::Continue)
        })
    }

    fn name(&self) -> &'static str {
        "AuthMiddleware"
    }
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(role: &str) -> String {
        let claims = json!({"sub": "42", "role": role, "exp": 4_102_444_800u64});
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn request(token: Option<&str>) -> Request {
        let mut req = Request::get("/admin/dashboard");
        if let Some(token) = token {
            req.set_header("authorization", &format!("Bearer {token}"));
        }
        req
    }

    #[tokio::test]
    async fn test_missing_token() {
        let mw = AuthMiddleware::new(SECRET);
        let err = mw.handle(&mut request(None), &[]).await.unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let mw = AuthMiddleware::new(SECRET);
        let err = mw.handle(&mut request(Some("garbage")), &[]).await.unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn test_valid_token_stores_claims() {
        let mw = AuthMiddleware::new(SECRET);
        let mut req = request(Some(&token("editor")));
        let flow = mw.handle(&mut req, &[]).await.unwrap();
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(req.claims.unwrap()["sub"], "42");
    }

    #[tokio::test]
    async fn test_role_arguments() {
        let mw = AuthMiddleware::new(SECRET);
        let admins = vec!["admin".to_string()];

        let err = mw
            .handle(&mut request(Some(&token("editor"))), &admins)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 403);

        let flow = mw
            .handle(&mut request(Some(&token("admin"))), &admins)
            .await
            .unwrap();
        assert!(matches!(flow, Flow::Continue));
    }
}
