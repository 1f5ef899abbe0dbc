//! Health probes.
//!
//! # Responsibilities
//! - Define the probe contract the monitor drives
//! - Provide the HTTP probe: `GET <address><path>`, healthy iff the status
//!   equals the expected one

use std::future::Future;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::HealthCheckConfig;

/// Why a probe considered a backend unhealthy.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("invalid probe uri {0}")]
    InvalidUri(String),

    #[error("connection error: {0}")]
    Transport(String),

    #[error("unexpected status {status} (expected {expected})")]
    UnexpectedStatus { status: u16, expected: u16 },
}

/// Liveness check for a single backend.
///
/// Implementations do not enforce a deadline themselves; the monitor wraps
/// every call in its own per-probe timeout.
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, address: &str) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// HTTP GET probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    path: String,
    expected_status: StatusCode,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, expected_status: StatusCode) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            path: path.into(),
            expected_status,
        }
    }

    pub fn from_config(config: &HealthCheckConfig) -> Self {
        let expected = StatusCode::from_u16(config.expected_status).unwrap_or(StatusCode::OK);
        Self::new(config.path.clone(), expected)
    }

    fn uri_for(&self, address: &str) -> String {
        format!("{}{}", address.trim_end_matches('/'), self.path)
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        let uri = self.uri_for(address);
        let request = Request::builder()
            .method("GET")
            .uri(&uri)
            .header("user-agent", "http-balancer-health-check")
            .body(Body::empty())
            .map_err(|_| ProbeError::InvalidUri(uri.clone()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        if response.status() == self.expected_status {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedStatus {
                status: response.status().as_u16(),
                expected: self.expected_status.as_u16(),
            })
        }
    }
}
