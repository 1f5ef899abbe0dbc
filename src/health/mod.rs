//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → registry address list (copy, no lock held afterwards)
//!     → probe.rs, every backend concurrently, each with its own timeout
//!     → registry.set_health per result
//! ```
//!
//! # Design Decisions
//! - Every registered backend is probed, healthy or not, so recovered
//!   backends are re-admitted on the next tick
//! - A single result flips the flag: no thresholds, no backoff
//! - Forwarding failures never change health; only probes do
//! - The loop stops only on the shutdown signal

pub mod active;
pub mod probe;

pub use active::HealthMonitor;
pub use probe::{HttpProbe, Probe, ProbeError};
