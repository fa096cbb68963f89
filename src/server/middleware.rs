use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;
use crate::models::RateLimitDecision;
use crate::server::error::ApiError;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Identifies the caller for rate limiting. Proxy headers are consulted
/// only when trusted: first `X-Forwarded-For` entry, then `X-Real-IP`.
/// Otherwise, and as a last resort, the socket peer IP.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if trust_forwarded {
        if let Some(forwarded_for) = header_value("x-forwarded-for") {
            if let Some(first) = forwarded_for.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
                return first.to_string();
            }
        }

        if let Some(real_ip) = header_value("x-real-ip") {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_at_unix()));
}

/// Per-client fixed-window limit for the message endpoint.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(config) = state.rate_limit() else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identifier(request.headers(), peer, state.trust_forwarded_headers());
    let decision = state.rate_limiter().check(&client, &config);

    if !decision.allowed {
        warn!("Rate limit exceeded for client {}", client);
        let mut response =
            ApiError::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
        let headers = response.headers_mut();
        apply_headers(headers, &decision);
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(decision.retry_after_secs()),
        );
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
