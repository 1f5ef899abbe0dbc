//! HTTP server setup and the request dispatcher.
//!
//! # Responsibilities
//! - Create the Axum router (`/stats` plus the proxy fallback)
//! - Wire up middleware (trace, timeout, request ID)
//! - Dispatch each request: select backend, hold an active guard, forward
//! - Run the health monitor and sticky janitor next to the listener
//! - Apply reloaded configuration

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper::body::{Frame, SizeHint};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::affinity::Balancer;
use crate::config::{BalancerConfig, ProxyConfig};
use crate::health::HealthMonitor;
use crate::http::client;
use crate::http::forward::{Forwarder, HyperForwarder};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{ActiveGuard, BackendPool, BackendRegistry, BackendSnapshot};
use crate::observability::metrics;

/// Balancer plus the settings it was built from. Swapped as a unit on reload.
#[derive(Debug)]
pub struct Dispatch {
    pub balancer: Balancer,
    pub settings: BalancerConfig,
}

impl Dispatch {
    fn new(registry: Arc<BackendRegistry>, settings: BalancerConfig) -> Self {
        Self {
            balancer: Balancer::from_config(registry, &settings),
            settings,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub dispatch: Arc<ArcSwap<Dispatch>>,
    pub forwarder: Arc<dyn Forwarder>,
}

impl AppState {
    pub fn new(registry: Arc<BackendRegistry>, settings: BalancerConfig, forwarder: Arc<dyn Forwarder>) -> Self {
        let dispatch = Dispatch::new(registry.clone(), settings);
        Self {
            registry,
            dispatch: Arc::new(ArcSwap::from_pointee(dispatch)),
            forwarder,
        }
    }

    /// Apply a reloaded configuration.
    ///
    /// Membership is reconciled in place so unchanged backends keep their
    /// health and load. The balancer is rebuilt only when its settings
    /// changed, which resets strategy counters and sticky bindings.
    pub fn apply_config(&self, config: &ProxyConfig) {
        let summary = self.registry.reconcile(config.backend_entries());
        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            unchanged = summary.unchanged,
            "Backends reconciled"
        );

        if self.dispatch.load().settings != config.balancer {
            let dispatch = Dispatch::new(self.registry.clone(), config.balancer.clone());
            tracing::info!(
                strategy = dispatch.balancer.strategy_name(),
                sticky = %dispatch.balancer.sticky_mode(),
                "Balancer settings changed"
            );
            self.dispatch.store(Arc::new(dispatch));
        }
    }
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    config: ProxyConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server forwarding through the hyper client.
    pub fn new(config: ProxyConfig) -> Self {
        let forwarder = HyperForwarder::new(Duration::from_secs(config.timeouts.connect_secs));
        Self::with_forwarder(config, Arc::new(forwarder))
    }

    /// Create a server with a custom forwarding collaborator.
    pub fn with_forwarder(config: ProxyConfig, forwarder: Arc<dyn Forwarder>) -> Self {
        let registry = Arc::new(BackendRegistry::from_backends(config.backend_entries()));
        let state = AppState::new(registry, config.balancer.clone(), forwarder);
        Self { config, state }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.state.registry
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/stats", get(stats_handler))
            .fallback(proxy_handler)
            .with_state(self.state.clone())
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let mut server_shutdown = shutdown.subscribe();

        tracing::info!(
            address = %addr,
            backends = self.state.registry.len(),
            strategy = %self.config.balancer.strategy,
            sticky = %self.config.balancer.sticky,
            "HTTP server starting"
        );

        if self.config.health_check.enabled {
            let monitor = HealthMonitor::from_config(self.state.registry.clone(), &self.config.health_check);
            tokio::spawn(monitor.run(shutdown.subscribe()));
        } else {
            tracing::info!("Active health checks disabled");
        }

        tokio::spawn(sticky_janitor(self.state.dispatch.clone(), shutdown.subscribe()));

        tokio::spawn(apply_updates(self.state.clone(), config_updates, shutdown.subscribe()));

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Apply reloaded configs until shutdown.
async fn apply_updates(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(config) = updates.recv() => state.apply_config(&config),
            _ = stop.recv() => break,
        }
    }
}

/// How often a disabled janitor re-reads its interval.
const JANITOR_IDLE_RECHECK: Duration = Duration::from_secs(60);

/// Sweep expired cookie bindings on whichever balancer is current.
///
/// The interval is read from the current settings before every wait, so a
/// reload that changes `sticky_sweep_secs` applies from the next cycle.
/// While it is 0 the janitor only wakes to re-read it.
async fn sticky_janitor(dispatch: Arc<ArcSwap<Dispatch>>, mut stop: broadcast::Receiver<()>) {
    loop {
        let secs = dispatch.load().settings.sticky_sweep_secs;
        let wait = if secs > 0 {
            Duration::from_secs(secs)
        } else {
            JANITOR_IDLE_RECHECK
        };

        tokio::select! {
            _ = time::sleep(wait) => {
                let current = dispatch.load();
                if current.settings.sticky_sweep_secs == 0 {
                    continue;
                }
                if let Some(cookies) = current.balancer.cookie_affinity() {
                    let removed = cookies.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = cookies.len(), "Swept expired sticky entries");
                    }
                }
            }
            _ = stop.recv() => {
                tracing::info!("Sticky janitor received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

/// Main proxy handler.
/// Selects a backend (affinity first, then strategy) and forwards the request.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let start = Instant::now();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let dispatch = state.dispatch.load_full();
    let ctx = client::client_context(request.headers(), peer, &dispatch.settings.cookie_name);

    let Some(selection) = dispatch.balancer.select(&ctx) else {
        tracing::warn!(path = %request.uri().path(), "No healthy backends");
        metrics::record_no_healthy_backend();
        return (StatusCode::SERVICE_UNAVAILABLE, "No healthy backends available").into_response();
    };

    // Deregistered between selection and here.
    let Some(guard) = state.registry.acquire(&selection.address) else {
        tracing::warn!(backend = %selection.address, "Selected backend vanished");
        metrics::record_no_healthy_backend();
        return (StatusCode::SERVICE_UNAVAILABLE, "No healthy backends available").into_response();
    };

    if let Some(peer) = peer {
        client::append_forwarded_for(request.headers_mut(), peer.ip());
    }

    tracing::debug!(
        backend = %guard.address(),
        path = %request.uri().path(),
        client_ip = ?ctx.client_ip,
        "Proxying request"
    );

    let backend = selection.address;
    let mut response = match state.forwarder.forward(&backend, request).await {
        // The backend stays active until the body is fully sent or dropped.
        Ok(response) => response.map(|body| Body::new(GuardedBody::new(body, guard))),
        Err(e) => {
            tracing::error!(backend = %backend, error = %e, "Upstream error");
            drop(guard);
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    };
    metrics::record_request(&backend, response.status().as_u16(), start);

    if let Some(client_id) = selection.sticky_cookie {
        let ttl = dispatch
            .balancer
            .cookie_affinity()
            .map_or(Duration::ZERO, |cookies| cookies.ttl());
        if let Some(cookie) = client::sticky_cookie(&dispatch.settings.cookie_name, &client_id, ttl) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }

    response
}

/// Response body that holds the backend's [`ActiveGuard`] until it is
/// exhausted or dropped.
struct GuardedBody {
    inner: Body,
    guard: Option<ActiveGuard>,
}

impl GuardedBody {
    fn new(inner: Body, guard: ActiveGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl HttpBody for GuardedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(None) | Poll::Ready(Some(Err(_))) = &polled {
            this.guard.take();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[derive(Debug, Serialize)]
struct Stats {
    servers: BTreeMap<String, bool>,
    backends: Vec<BackendSnapshot>,
    total_weight: u64,
    strategy: &'static str,
    sticky: String,
    sticky_entries: usize,
}

/// Debug view of registry and balancer state.
async fn stats_handler(State(state): State<AppState>) -> Json<Stats> {
    let dispatch = state.dispatch.load();
    let backends = state.registry.snapshot();
    Json(Stats {
        servers: backends.iter().map(|b| (b.address.clone(), b.healthy)).collect(),
        total_weight: state.registry.total_weight(),
        backends,
        strategy: dispatch.balancer.strategy_name(),
        sticky: dispatch.balancer.sticky_mode().to_string(),
        sticky_entries: dispatch.balancer.sticky_entries(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::StickyMode;
    use crate::config::BackendConfig;
    use crate::http::forward::ForwardError;
    use crate::load_balancer::StrategyKind;
    use axum::http::HeaderValue;
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Answers with the backend address; records the active count it saw.
    #[derive(Default)]
    struct EchoForwarder {
        registry: Mutex<Option<Arc<BackendRegistry>>>,
        seen_active: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl Forwarder for EchoForwarder {
        fn forward<'a>(
            &'a self,
            backend: &'a str,
            _request: Request<Body>,
        ) -> BoxFuture<'a, Result<Response<Body>, ForwardError>> {
            Box::pin(async move {
                if let Some(registry) = self.registry.lock().unwrap().as_ref() {
                    let active = registry
                        .snapshot()
                        .into_iter()
                        .find(|b| b.address == backend)
                        .map_or(0, |b| b.active_connections);
                    self.seen_active.lock().unwrap().push(active);
                }
                if self.fail {
                    return Err(ForwardError::Upstream("connection refused".into()));
                }
                Ok(Response::new(Body::from(backend.to_string())))
            })
        }
    }

    /// Answers with a body that yields its only chunk once polled.
    struct StreamingForwarder;

    impl Forwarder for StreamingForwarder {
        fn forward<'a>(
            &'a self,
            _backend: &'a str,
            _request: Request<Body>,
        ) -> BoxFuture<'a, Result<Response<Body>, ForwardError>> {
            Box::pin(async move {
                let chunk = futures_util::stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(b"streamed"))
                });
                Ok(Response::new(Body::from_stream(chunk)))
            })
        }
    }

    fn config(strategy: StrategyKind, sticky: StickyMode, backends: &[(&str, i64)]) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.balancer.strategy = strategy;
        config.balancer.sticky = sticky;
        config.backends = backends.iter().map(|(a, w)| BackendConfig::new(*a, *w)).collect();
        config.health_check.enabled = false;
        config
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_weighted_dispatch_sequence() {
        let config = config(
            StrategyKind::Weighted,
            StickyMode::None,
            &[("http://a:1", 1), ("http://b:1", 3)],
        );
        let server = HttpServer::with_forwarder(config, Arc::new(EchoForwarder::default()));
        let app = server.router();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let response = app.clone().oneshot(get("/hello")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().contains_key("x-request-id"));
            seen.push(body_string(response).await);
        }
        assert_eq!(seen, ["http://a:1", "http://b:1", "http://b:1", "http://b:1"]);
    }

    #[tokio::test]
    async fn test_no_healthy_backend_is_503() {
        let config = config(StrategyKind::RoundRobin, StickyMode::None, &[("http://a:1", 1)]);
        let server = HttpServer::with_forwarder(config, Arc::new(EchoForwarder::default()));
        server.registry().set_health("http://a:1", false);

        let response = server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_forwarding_failure_is_502_and_keeps_health() {
        let config = config(StrategyKind::RoundRobin, StickyMode::None, &[("http://a:1", 1)]);
        let forwarder = Arc::new(EchoForwarder { fail: true, ..Default::default() });
        let server = HttpServer::with_forwarder(config, forwarder);

        let response = server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(server.registry().is_healthy("http://a:1"));
        assert_eq!(server.registry().snapshot()[0].active_connections, 0);
    }

    #[tokio::test]
    async fn test_active_count_held_during_forward() {
        let config = config(StrategyKind::Least, StickyMode::None, &[("http://a:1", 1)]);
        let forwarder = Arc::new(EchoForwarder::default());
        let server = HttpServer::with_forwarder(config, forwarder.clone());
        *forwarder.registry.lock().unwrap() = Some(server.registry().clone());

        server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(*forwarder.seen_active.lock().unwrap(), [1]);
        assert_eq!(server.registry().snapshot()[0].active_connections, 0);
    }

    #[tokio::test]
    async fn test_active_count_held_until_body_is_consumed() {
        let config = config(StrategyKind::Least, StickyMode::None, &[("http://a:1", 1)]);
        let server = HttpServer::with_forwarder(config, Arc::new(StreamingForwarder));

        let response = server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(server.registry().snapshot()[0].active_connections, 1);

        assert_eq!(body_string(response).await, "streamed");
        assert_eq!(server.registry().snapshot()[0].active_connections, 0);
    }

    #[tokio::test]
    async fn test_active_count_released_when_body_dropped() {
        let config = config(StrategyKind::Least, StickyMode::None, &[("http://a:1", 1)]);
        let server = HttpServer::with_forwarder(config, Arc::new(StreamingForwarder));

        let response = server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(server.registry().snapshot()[0].active_connections, 1);
        drop(response);
        assert_eq!(server.registry().snapshot()[0].active_connections, 0);
    }

    #[tokio::test]
    async fn test_cookie_affinity_round_trip() {
        let config = config(
            StrategyKind::RoundRobin,
            StickyMode::Cookie,
            &[("http://a:1", 1), ("http://b:1", 1)],
        );
        let server = HttpServer::with_forwarder(config, Arc::new(EchoForwarder::default()));
        let app = server.router();

        let first = app.clone().oneshot(get("/")).await.unwrap();
        let set_cookie = first.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("LB-STICKY="));
        assert!(set_cookie.contains("HttpOnly"));
        let first_backend = body_string(first).await;
        let cookie = set_cookie.split(';').next().unwrap().to_string();

        for _ in 0..3 {
            let mut request = get("/");
            request.headers_mut().insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
            let response = app.clone().oneshot(request).await.unwrap();
            assert!(!response.headers().contains_key(header::SET_COOKIE));
            assert_eq!(body_string(response).await, first_backend);
        }

        server.registry().set_health(&first_backend, false);
        let mut request = get("/");
        request.headers_mut().insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.headers().contains_key(header::SET_COOKIE));
        assert_ne!(body_string(response).await, first_backend);
    }

    #[tokio::test]
    async fn test_ip_affinity_uses_forwarded_for() {
        let config = config(
            StrategyKind::RoundRobin,
            StickyMode::Ip,
            &[("http://a:1", 1), ("http://b:1", 1), ("http://c:1", 1)],
        );
        let server = HttpServer::with_forwarder(config, Arc::new(EchoForwarder::default()));
        let app = server.router();

        for _ in 0..3 {
            let mut request = get("/");
            // 10 + 0 + 0 + 4 = 14, 14 % 3 = 2
            request.headers_mut().insert("x-forwarded-for", HeaderValue::from_static("10.0.0.4, 172.16.0.1"));
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(body_string(response).await, "http://c:1");
        }
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let config = config(
            StrategyKind::Least,
            StickyMode::Cookie,
            &[("http://a:1", 2), ("http://b:1", 1)],
        );
        let server = HttpServer::with_forwarder(config, Arc::new(EchoForwarder::default()));
        server.registry().set_health("http://b:1", false);

        let response = server.router().oneshot(get("/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(stats["servers"]["http://a:1"], true);
        assert_eq!(stats["servers"]["http://b:1"], false);
        assert_eq!(stats["strategy"], "least");
        assert_eq!(stats["sticky"], "cookie");
        assert_eq!(stats["total_weight"], 2);
        assert_eq!(stats["backends"][0]["weight"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sticky_janitor_sweeps_and_stops() {
        let mut config = config(StrategyKind::RoundRobin, StickyMode::Cookie, &[("http://a:1", 1)]);
        config.balancer.cookie_ttl_secs = 10;
        config.balancer.sticky_sweep_secs = 5;
        let server = HttpServer::with_forwarder(config, Arc::new(EchoForwarder::default()));
        server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(server.state().dispatch.load().balancer.sticky_entries(), 1);

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(sticky_janitor(server.state().dispatch.clone(), shutdown.subscribe()));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(server.state().dispatch.load().balancer.sticky_entries(), 0);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sticky_janitor_follows_reloaded_interval() {
        let mut initial = config(StrategyKind::RoundRobin, StickyMode::None, &[("http://a:1", 1)]);
        initial.balancer.sticky_sweep_secs = 0;
        let server = HttpServer::with_forwarder(initial.clone(), Arc::new(EchoForwarder::default()));

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(sticky_janitor(server.state().dispatch.clone(), shutdown.subscribe()));

        let mut reloaded = initial;
        reloaded.balancer.sticky = StickyMode::Cookie;
        reloaded.balancer.cookie_ttl_secs = 10;
        reloaded.balancer.sticky_sweep_secs = 5;
        server.state().apply_config(&reloaded);

        server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(server.state().dispatch.load().balancer.sticky_entries(), 1);

        // One idle re-check plus a few sweep cycles.
        tokio::time::sleep(JANITOR_IDLE_RECHECK + Duration::from_secs(30)).await;
        assert_eq!(server.state().dispatch.load().balancer.sticky_entries(), 0);

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_config_reconciles_and_swaps() {
        let initial = config(
            StrategyKind::RoundRobin,
            StickyMode::None,
            &[("http://a:1", 1), ("http://b:1", 1)],
        );
        let server = HttpServer::with_forwarder(initial, Arc::new(EchoForwarder::default()));
        server.registry().set_health("http://a:1", false);

        let reloaded = config(
            StrategyKind::Least,
            StickyMode::None,
            &[("http://a:1", 1), ("http://c:1", 1)],
        );
        server.state().apply_config(&reloaded);

        assert_eq!(server.registry().addresses(), ["http://a:1", "http://c:1"]);
        assert!(!server.registry().is_healthy("http://a:1"));
        assert_eq!(server.state().dispatch.load().balancer.strategy_name(), "least");

        let response = server.router().oneshot(get("/")).await.unwrap();
        assert_eq!(body_string(response).await, "http://c:1");
    }
}
