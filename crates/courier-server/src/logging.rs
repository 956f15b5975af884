use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Per-request trace id, inserted into request extensions by the logging
/// middleware and echoed back as the `X-Trace-Id` response header.
#[derive(Debug, Clone, Default)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

// ANSI color codes
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const MAGENTA: &str = "\x1b[35m";
const BLUE: &str = "\x1b[34m";
const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

/// Color HTTP method: GET=green, POST=cyan, PUT=yellow, DELETE=red, PATCH=magenta, others=blue.
fn method_color(method: &axum::http::Method) -> &'static str {
    match method.as_str() {
        "GET" => GREEN,
        "POST" => CYAN,
        "PUT" => YELLOW,
        "DELETE" => RED,
        "PATCH" => MAGENTA,
        _ => BLUE,
    }
}

/// Format elapsed time with color: green <100ms, yellow 100ms-1s, red >1s.
fn format_elapsed(elapsed_us: u128) -> String {
    let (time_str, color) = if elapsed_us < 1000 {
        (format!("{elapsed_us}µs"), GREEN)
    } else if elapsed_us < 100_000 {
        (format!("{}ms", elapsed_us / 1000), GREEN)
    } else if elapsed_us < 1_000_000 {
        (format!("{}ms", elapsed_us / 1000), YELLOW)
    } else {
        (format!("{:.1}s", elapsed_us as f64 / 1_000_000.0), RED)
    };
    format!("{color}{time_str}{RESET}")
}

/// Request/response logging middleware.
///
/// Bodies are never logged: send requests carry raw recipients and message
/// text, and the masking rule must hold for every log line.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    // Skip logging for Swagger UI static assets
    if path.starts_with("/docs") {
        return next.run(req).await;
    }

    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let query = uri.query().unwrap_or("");
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let mc = method_color(&method);

    let url = if query.is_empty() {
        path.clone()
    } else {
        format!("{path}?{query}")
    };

    println!(
        "{GRAY}{}{RESET} {CYAN}-->{RESET} [{trace_id}] {mc}{method}{RESET} {url} {GRAY}ua={user_agent}{RESET}",
        now_str()
    );

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_us = start.elapsed().as_micros();
    let status = response.status();

    // Status code color: green 2xx, yellow 4xx, red 5xx/others
    let status_color = if status.is_success() {
        GREEN
    } else if status.is_client_error() {
        YELLOW
    } else {
        RED
    };

    let elapsed_colored = format_elapsed(elapsed_us);
    println!(
        "{GRAY}{}{RESET} {status_color}<--{RESET} [{trace_id}] {status_color}{status}{RESET} {elapsed_colored}",
        now_str()
    );

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }

    response
}
