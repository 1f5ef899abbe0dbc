//! Request forwarding to a chosen backend.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the backend base URL
//! - Strip hop-by-hop headers in both directions
//! - Send the request and hand back the streamed response
//!
//! Forwarding failures are returned to the dispatcher; they never touch
//! backend health.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, Response, Uri};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid backend address '{0}'")]
    InvalidBackend(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

/// Sends a request to a backend address.
pub trait Forwarder: Send + Sync + 'static {
    fn forward<'a>(
        &'a self,
        backend: &'a str,
        request: Request<Body>,
    ) -> BoxFuture<'a, Result<Response<Body>, ForwardError>>;
}

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers listed in `Connection` are hop-by-hop as well.
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Join the backend base URL with the request's path and query.
pub fn backend_uri(backend: &str, original: &Uri) -> Result<Uri, ForwardError> {
    let invalid = || ForwardError::InvalidBackend(backend.to_string());
    let base: Uri = backend.parse().map_err(|_| invalid())?;
    let scheme = base.scheme().cloned().ok_or_else(invalid)?;
    let authority = base.authority().cloned().ok_or_else(invalid)?;

    let base_path = base.path().trim_end_matches('/');
    let request_path = original.path();
    let mut path_and_query = format!("{base_path}{request_path}");
    if let Some(query) = original.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|_| invalid())
}

/// Forwarder backed by the hyper client.
#[derive(Debug, Clone)]
pub struct HyperForwarder {
    client: Client<HttpConnector, Body>,
}

impl HyperForwarder {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }

    async fn send(&self, backend: &str, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = backend_uri(backend, &parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);

        tracing::debug!(backend = %backend, uri = %parts.uri, "Forwarding request");

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Forwarder for HyperForwarder {
    fn forward<'a>(
        &'a self,
        backend: &'a str,
        request: Request<Body>,
    ) -> BoxFuture<'a, Result<Response<Body>, ForwardError>> {
        Box::pin(self.send(backend, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_backend_uri() {
        let original: Uri = "/hello?x=1".parse().unwrap();
        assert_eq!(
            backend_uri("http://10.0.0.1:8081", &original).unwrap(),
            "http://10.0.0.1:8081/hello?x=1"
        );
        assert_eq!(
            backend_uri("http://10.0.0.1:8081/api/", &original).unwrap(),
            "http://10.0.0.1:8081/api/hello?x=1"
        );
        assert!(backend_uri("not a url", &original).is_err());
        assert!(backend_uri("/relative", &original).is_err());
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-internal"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-internal", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_upstream_error() {
        let forwarder = HyperForwarder::new(Duration::from_secs(1));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let result = forwarder.forward("http://127.0.0.1:1", request).await;
        assert!(matches!(result, Err(ForwardError::Upstream(_))));
    }
}
