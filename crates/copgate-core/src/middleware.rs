//! Request filters: inbound API-key check, rate limiting, manual approval,
//! and the request-id / access-log wrapper.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

/// Inbound API-key check. An empty configured set disables the filter;
/// `GET /` and CORS preflights always pass.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/" || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let keys = state.config.read().unwrap().api_keys();
    if keys.is_empty() {
        return next.run(request).await;
    }

    match extract_api_key(request.headers()) {
        Some(key) if keys.iter().any(|candidate| *candidate == key) => next.run(request).await,
        _ => unauthorized(),
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(|token| token.to_string())
}

fn unauthorized() -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({
            "error": {"message": "Unauthorized", "type": "authentication_error"}
        })),
    )
        .into_response();
    response.headers_mut().insert(
        "WWW-Authenticate",
        HeaderValue::from_static("Bearer realm=\"copgate\""),
    );
    response
}

/// Minimum-interval rate limiter. In wait mode the lock is released across
/// the sleep and the timestamp refreshed afterwards.
#[derive(Debug)]
pub struct RateLimiter {
    seconds: u64,
    wait: bool,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(seconds: u64, wait: bool) -> Self {
        Self {
            seconds,
            wait,
            last_request: Mutex::new(None),
        }
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cooldown = Duration::from_secs(limiter.seconds);

    let remaining = {
        let mut last = limiter.last_request.lock().unwrap();
        match *last {
            None => {
                *last = Some(Instant::now());
                None
            }
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed >= cooldown {
                    *last = Some(Instant::now());
                    None
                } else {
                    Some(cooldown - elapsed)
                }
            }
        }
    };

    let Some(remaining) = remaining else {
        return next.run(request).await;
    };

    if limiter.wait {
        tokio::time::sleep(remaining).await;
        *limiter.last_request.lock().unwrap() = Some(Instant::now());
        return next.run(request).await;
    }

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        axum::Json(json!({
            "error": {"message": "Rate limit exceeded", "type": "rate_limit_error"}
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&remaining.as_secs().max(1).to_string()) {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}

/// Interactive per-request approval on the operator's terminal. The health
/// check always passes.
pub async fn manual_approval(request: Request<Body>, next: Next) -> Response {
    if request.uri().path() == "/" {
        return next.run(request).await;
    }

    let summary = format!("{} {}", request.method(), request.uri().path());
    let approved = tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("\n  Incoming request: {summary}\n  Accept? [y/N]: ");
        let _ = std::io::stdout().flush();
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    })
    .await
    .unwrap_or(false);

    if !approved {
        tracing::info!("request rejected by operator");
        return (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": {"message": "Request rejected", "type": "permission_error"}
            })),
        )
            .into_response();
    }

    next.run(request).await
}

/// Outermost wrapper: assigns a request id, resolves the client IP behind
/// proxies, and writes one structured access-log line per request.
pub async fn access_log(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = real_ip(request.headers());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        client_ip = %client_ip,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

fn real_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string()
}
