//! HTTP load balancer library.
//!
//! The decision core (registry, strategies, health monitor, affinity) plus
//! the axum dispatcher that drives it.

pub mod affinity;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use affinity::{Balancer, Selection, StickyMode};
pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{BackendRegistry, ClientContext, StrategyKind};
