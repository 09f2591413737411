//! Stock middleware registered under `log`, `timing`, `cors` and `throttle`.

use super::{BoxFuture, Flow, Middleware};
use crate::exception::HttpException;
use crate::request::Request;
use crate::response::Response;
use crate::router::Method;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info};

/// Logging middleware - logs requests in structured form
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Flow, HttpException>> {
        Box::pin(async move {
            let request_id = req.header("x-request-id").unwrap_or("-");
            info!(
                method = %req.method,
                path = %req.path,
                request_id = %request_id,
                "Request received"
            );
            Ok(Flow::Continue)
        })
    }

    fn fallback<'a>(
        &'a self,
        req: &'a mut Request,
        res: Response,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Response, HttpException>> {
        Box::pin(async move {
            let request_id = req.header("x-request-id").unwrap_or("-");
            info!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                request_id = %request_id,
                "Response sent"
            );
            Ok(res)
        })
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

#[derive(Debug, Clone, Copy)]
struct RequestStart(Instant);

/// Timing middleware - measures the time spent inside it
///
/// The duration is reported in the `X-Response-Time` header.
#[derive(Debug, Default)]
pub struct TimingMiddleware;

impl TimingMiddleware {
    /// Create a new timing middleware
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for TimingMiddleware {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Flow, HttpException>> {
        Box::pin(async move {
            req.context().insert(RequestStart(Instant::now()));
            Ok(Flow::Continue)
        })
    }

    fn fallback<'a>(
        &'a self,
        req: &'a mut Request,
        mut res: Response,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Response, HttpException>> {
        Box::pin(async move {
            if let Some(RequestStart(start)) = req.context().take::<RequestStart>() {
                let duration = start.elapsed();
                debug!(
                    method = %req.method,
                    path = %req.path,
                    duration_ms = %duration.as_millis(),
                    "Request timing"
                );
                res.set_header("x-response-time", &format!("{}ms", duration.as_millis()));
            }
            Ok(res)
        })
    }

    fn name(&self) -> &'static str {
        "TimingMiddleware"
    }
}

/// CORS middleware - answers preflights and adds Cross-Origin headers
///
/// `cors:https://app.example` overrides the configured origin per route.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }

    fn settings(&self, args: &[String]) -> CorsSettings {
        CorsSettings {
            origin: args.first().unwrap_or(&self.allow_origin).clone(),
            methods: self.allow_methods.clone(),
            headers: self.allow_headers.clone(),
        }
    }
}

/// Headers a `cors` layer decided on, handed from `handle` to `fallback`
#[derive(Debug, Clone)]
struct CorsSettings {
    origin: String,
    methods: String,
    headers: String,
}

impl CorsSettings {
    fn apply(&self, res: &mut Response) {
        res.set_header("access-control-allow-origin", &self.origin);
        res.set_header("access-control-allow-methods", &self.methods);
        res.set_header("access-control-allow-headers", &self.headers);
    }
}

impl Middleware for CorsMiddleware {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        args: &'a [String],
    ) -> BoxFuture<'a, Result<Flow, HttpException>> {
        Box::pin(async move {
            let settings = self.settings(args);
            let preflight = req.method == Method::Options
                && req.header("access-control-request-method").is_some();
            if !preflight {
                req.context().insert(settings);
                return Ok(Flow::Continue);
            }
            let mut res = Response::no_content();
            settings.apply(&mut res);
            Ok(Flow::Respond(res))
        })
    }

    fn fallback<'a>(
        &'a self,
        req: &'a mut Request,
        mut res: Response,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Response, HttpException>> {
        Box::pin(async move {
            if let Some(settings) = req.context().take::<CorsSettings>() {
                settings.apply(&mut res);
            }
            Ok(res)
        })
    }

    fn validate_args(&self, args: &[String]) -> Result<(), String> {
        if args.len() > 1 {
            return Err("expected at most one origin".to_string());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}

/// Token bucket rate limiting middleware
///
/// `throttle:60,1` allows a burst of 60 requests refilled over one minute.
/// Without arguments the limits given to [`RateLimitMiddleware::new`] apply.
/// Buckets idle for longer than their window are full again and get dropped.
pub struct RateLimitMiddleware {
    /// Maximum burst capacity
    capacity: u64,
    /// Window over which a full bucket refills
    window: Duration,
    /// Per-key buckets
    state: Mutex<Buckets>,
}

/// Internal token bucket state
struct Bucket {
    tokens: f64,
    last_refill: TokioInstant,
    window: Duration,
}

struct Buckets {
    map: HashMap<String, Bucket>,
    last_sweep: TokioInstant,
}

/// Outcome of taking a token
#[derive(Debug, Clone, Copy)]
struct Quota {
    limit: u64,
    remaining: u64,
    retry_after: Option<u64>,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn window_from_minutes(minutes: u64) -> Option<Duration> {
    minutes.checked_mul(60).map(Duration::from_secs)
}

impl RateLimitMiddleware {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            capacity,
            window,
            state: Mutex::new(Buckets {
                map: HashMap::new(),
                last_sweep: TokioInstant::now(),
            }),
        }
    }

    fn limits(&self, args: &[String]) -> (u64, Duration) {
        let capacity = args
            .first()
            .and_then(|a| a.parse().ok())
            .unwrap_or(self.capacity);
        let window = args
            .get(1)
            .and_then(|a| a.parse::<u64>().ok())
            .and_then(window_from_minutes)
            .unwrap_or(self.window);
        (capacity, window)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn take(&self, key: &str, capacity: u64, window: Duration) -> Quota {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = TokioInstant::now();
        if now.duration_since(state.last_sweep) >= SWEEP_INTERVAL {
            let before = state.map.len();
            state
                .map
                .retain(|_, b| now.duration_since(b.last_refill) < b.window);
            state.last_sweep = now;
            debug!(dropped = before - state.map.len(), "Idle rate limit buckets dropped");
        }

        let bucket = state.map.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity as f64,
            last_refill: now,
            window,
        });

        let per_sec = capacity as f64 / window.as_secs_f64().max(1.0);
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = elapsed.mul_add(per_sec, bucket.tokens).min(capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            let wait = ((1.0 - bucket.tokens) / per_sec).ceil().max(1.0) as u64;
            return Quota {
                limit: capacity,
                remaining: 0,
                retry_after: Some(wait),
            };
        }
        bucket.tokens -= 1.0;
        Quota {
            limit: capacity,
            remaining: bucket.tokens.floor() as u64,
            retry_after: None,
        }
    }

    fn client_key(req: &Request, args: &[String]) -> String {
        let client = req
            .header("x-client-ip")
            .or_else(|| {
                req.header("x-forwarded-for")
                    .and_then(|v| v.split(',').next())
                    .map(str::trim)
            })
            .unwrap_or("unknown");
        format!("{}|{client}", args.join(","))
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        args: &'a [String],
    ) -> BoxFuture<'a, Result<Flow, HttpException>> {
        Box::pin(async move {
            let (capacity, window) = self.limits(args);
            let quota = self.take(&Self::client_key(req, args), capacity, window);
            if let Some(wait) = quota.retry_after {
                let res = Response::json(r#"{"message":"Too Many Attempts.","error_type":"AbortError"}"#)
                    .with_status(429)
                    .with_header("retry-after", &wait.to_string())
                    .with_header("x-ratelimit-limit", &quota.limit.to_string())
                    .with_header("x-ratelimit-remaining", "0");
                return Ok(Flow::Respond(res));
            }
            req.context().insert(quota);
            Ok(Flow::Continue)
        })
    }

    fn fallback<'a>(
        &'a self,
        req: &'a mut Request,
        mut res: Response,
        _args: &'a [String],
    ) -> BoxFuture<'a, Result<Response, HttpException>> {
        Box::pin(async move {
            if let Some(quota) = req.context().take::<Quota>() {
                res.set_header("x-ratelimit-limit", &quota.limit.to_string());
                res.set_header("x-ratelimit-remaining", &quota.remaining.to_string());
            }
            Ok(res)
        })
    }

    fn validate_args(&self, args: &[String]) -> Result<(), String> {
        if args.len() > 2 {
            return Err("expected `throttle:max,minutes`".to_string());
        }
        if let Some(bad) = args.iter().find(|a| a.parse::<u64>().map_or(true, |n| n == 0)) {
            return Err(format!("`{bad}` is not a positive integer"));
        }
        match args.get(1).and_then(|m| m.parse::<u64>().ok()) {
            Some(minutes) if window_from_minutes(minutes).is_none() => {
                Err(format!("`{minutes}` minutes is too long a window"))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "RateLimitMiddleware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_middleware_names() {
        assert_eq!(LoggingMiddleware::new().name(), "LoggingMiddleware");
        assert_eq!(TimingMiddleware::new().name(), "TimingMiddleware");
    }

    #[test]
    fn test_cors_middleware_custom_origin() {
        let mw = CorsMiddleware::new().allow_origin("https://example.com");
        assert_eq!(mw.origin(), "https://example.com");
    }

    #[tokio::test]
    async fn test_cors_preflight_short_circuits() {
        let mw = CorsMiddleware::new();
        let mut req = Request::get("/api/users");
        req.method = Method::Options;
        req.set_header("access-control-request-method", "POST");

        let flow = mw.handle(&mut req, &args(&["https://app.test"])).await.unwrap();
        let Flow::Respond(res) = flow else {
            panic!("preflight should respond");
        };
        assert_eq!(res.status, 204);
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.test"));
    }

    #[tokio::test]
    async fn test_cors_fallback_uses_settings_from_handle() {
        let mw = CorsMiddleware::new().allow_headers("X-Token");
        let mut req = Request::get("/");
        let flow = mw.handle(&mut req, &args(&["https://app.test"])).await.unwrap();
        assert!(matches!(flow, Flow::Continue));
        assert!(req.context().contains::<CorsSettings>());

        let res = mw.fallback(&mut req, Response::text("ok"), &[]).await.unwrap();
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.test"));
        assert_eq!(res.header("access-control-allow-headers"), Some("X-Token"));
        assert!(!req.context().contains::<CorsSettings>());

        let mut bare = Request::get("/");
        let res = mw.fallback(&mut bare, Response::text("ok"), &[]).await.unwrap();
        assert_eq!(res.header("access-control-allow-origin"), None);
    }

    #[tokio::test]
    async fn test_timing_sets_header() {
        let mw = TimingMiddleware::new();
        let mut req = Request::get("/");
        mw.handle(&mut req, &[]).await.unwrap();
        let res = mw.fallback(&mut req, Response::text("ok"), &[]).await.unwrap();
        assert!(res.header("x-response-time").unwrap().ends_with("ms"));
    }

    #[tokio::test]
    async fn test_throttle_exhausts_bucket() {
        let mw = RateLimitMiddleware::new(100, Duration::from_secs(60));
        let limit = args(&["2", "1"]);
        let mut req = Request::get("/login");
        req.set_header("x-client-ip", "10.0.0.1");

        for _ in 0..2 {
            let flow = mw.handle(&mut req, &limit).await.unwrap();
            assert!(matches!(flow, Flow::Continue));
        }
        let res = mw.fallback(&mut req, Response::text("ok"), &limit).await.unwrap();
        assert_eq!(res.header("x-ratelimit-remaining"), Some("0"));

        let Flow::Respond(res) = mw.handle(&mut req, &limit).await.unwrap() else {
            panic!("third request should be throttled");
        };
        assert_eq!(res.status, 429);
        assert!(res.header("retry-after").is_some());

        let mut other = Request::get("/login");
        other.set_header("x-client-ip", "10.0.0.2");
        assert!(matches!(
            mw.handle(&mut other, &limit).await.unwrap(),
            Flow::Continue
        ));
    }

    #[test]
    fn test_throttle_rejects_bad_args() {
        let mw = RateLimitMiddleware::new(60, Duration::from_secs(60));
        assert!(mw.validate_args(&args(&["60", "1"])).is_ok());
        assert!(mw.validate_args(&args(&["sixty"])).is_err());
        assert!(mw.validate_args(&args(&["0"])).is_err());
        assert!(mw.validate_args(&args(&["1", "2", "3"])).is_err());
        assert!(mw.validate_args(&args(&["5", "400000000000000000"])).is_err());
        assert!(mw.validate_args(&args(&["5", "307445734561825860"])).is_ok());
    }

    #[test]
    fn test_throttle_window_never_overflows() {
        let mw = RateLimitMiddleware::new(60, Duration::from_secs(60));
        assert_eq!(mw.limits(&args(&["5", "2"])), (5, Duration::from_secs(120)));
        assert_eq!(
            mw.limits(&args(&["5", "400000000000000000"])),
            (5, Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_drops_idle_buckets() {
        let mw = RateLimitMiddleware::new(60, Duration::from_secs(60));
        let limit = args(&["2", "1"]);
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let mut req = Request::get("/");
            req.set_header("x-client-ip", ip);
            mw.handle(&mut req, &limit).await.unwrap();
        }
        assert_eq!(mw.state.lock().unwrap().map.len(), 3);

        tokio::time::advance(Duration::from_secs(30)).await;
        let mut busy = Request::get("/");
        busy.set_header("x-client-ip", "10.0.0.1");
        mw.handle(&mut busy, &limit).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        mw.handle(&mut busy, &limit).await.unwrap();
        let state = mw.state.lock().unwrap();
        assert_eq!(state.map.len(), 1);
        assert!(state.map.contains_key("2,1|10.0.0.1"));
    }
}
