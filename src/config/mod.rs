//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → overrides.rs (CLI/env: BACKENDS, STRATEGY, STICKY)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config, overrides re-applied
//!     → validation.rs validates
//!     → server reconciles the registry and swaps the balancer
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid reload is logged and ignored; the running config stays

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_backend_list, resolve_config, ConfigError};
pub use overrides::ConfigOverrides;
pub use schema::{
    BackendConfig, BalancerConfig, HealthCheckConfig, ListenerConfig, ObservabilityConfig,
    ProxyConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
