//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → client.rs (client IP, sticky cookie → ClientContext)
//!     → affinity::Balancer (pick backend) → ActiveGuard
//!     → forward.rs (rewrite URI, strip hop-by-hop, send)
//!     → response (+ Set-Cookie for new sticky bindings)
//! ```

pub mod client;
pub mod forward;
pub mod server;

pub use forward::{ForwardError, Forwarder, HyperForwarder};
pub use server::{AppState, HttpServer};
