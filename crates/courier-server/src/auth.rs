use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use std::fmt::Write;

use crate::api::error_response;
use crate::ratelimit::{RateLimitDecision, RateLimitError};
use crate::state::AppState;

static API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// SHA-256 hex digest of a plaintext API key. Only the digest is ever
/// stored or compared.
pub fn hash_api_key(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    let mut s = String::with_capacity(64);
    for b in digest {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn apply_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_epoch_ms.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Middleware for the public notification API: validates `X-API-Key`,
/// consults the rate limiter, stamps `X-RateLimit-*` headers, and injects
/// the resolved client into request extensions.
pub async fn api_key_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let api_key = req
        .headers()
        .get(&API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if api_key.is_empty() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "MISSING_API_KEY",
            "API key is required",
        );
    }

    let decision = state.rate_limiter.check(&hash_api_key(api_key)).await;

    if !decision.allowed {
        let mut response = match decision.error {
            Some(RateLimitError::InvalidApiKey) | None => error_response(
                StatusCode::UNAUTHORIZED,
                "INVALID_API_KEY",
                "Invalid API key",
            ),
            Some(RateLimitError::ClientInactive) => error_response(
                StatusCode::FORBIDDEN,
                "CLIENT_INACTIVE",
                "API client is inactive",
            ),
            Some(RateLimitError::RateLimitExceeded) => {
                let mut resp = error_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMIT_EXCEEDED",
                    "Rate limit exceeded",
                );
                resp.headers_mut()
                    .insert("Retry-After", HeaderValue::from_static("60"));
                resp
            }
        };
        apply_rate_limit_headers(&mut response, &decision);
        return response;
    }

    if let Some(client) = decision.client.clone() {
        req.extensions_mut().insert(client);
    }

    let mut response = next.run(req).await;
    apply_rate_limit_headers(&mut response, &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_hash_is_sha256_hex() {
        // echo -n "hello" | sha256sum
        assert_eq!(
            hash_api_key("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(hash_api_key("").len(), 64);
    }
}
