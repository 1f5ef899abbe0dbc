//! Client context extraction.
//!
//! # Responsibilities
//! - Resolve the client IP (first `X-Forwarded-For` entry, else the peer)
//! - Read the sticky cookie from `Cookie` headers
//! - Build the `Set-Cookie` value for a new binding
//! - Append the peer to `X-Forwarded-For` before forwarding

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::http::header::{HeaderMap, HeaderValue, COOKIE};

use crate::load_balancer::ClientContext;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolved client IP, or `None` if neither source is available.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => peer.map(|p| p.ip().to_string()),
    }
}

/// Value of the cookie called `name`, looking through every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Everything the balancer needs to know about the request.
pub fn client_context(headers: &HeaderMap, peer: Option<SocketAddr>, cookie_name: &str) -> ClientContext {
    ClientContext {
        client_ip: client_ip(headers, peer),
        sticky_token: cookie_value(headers, cookie_name),
    }
}

/// `Set-Cookie` value binding the client to `client_id` for `ttl`.
pub fn sticky_cookie(name: &str, client_id: &str, ttl: Duration) -> Option<HeaderValue> {
    let cookie = format!(
        "{name}={client_id}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        ttl.as_secs()
    );
    HeaderValue::from_str(&cookie).ok()
}

/// Record `peer` as the latest hop in `X-Forwarded-For`.
pub fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {peer}"),
        _ => peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
