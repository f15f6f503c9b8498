//! HTTP request logging: one structured line per request with method,
//! path, status, and latency. `/health` is exempt; load balancers poll it
//! constantly and the lines carry no information.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, warn};

pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let started = Instant::now();
    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    let client_ip = addr.ip();

    if status >= 500 {
        warn!(%method, path, status, latency_ms, %client_ip, "request failed");
    } else {
        info!(%method, path, status, latency_ms, %client_ip, "request");
    }

    response
}
