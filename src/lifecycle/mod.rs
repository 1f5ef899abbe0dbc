//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Ctrl-C
//!     → Shutdown::trigger
//!     → HTTP server stops accepting and drains
//!     → health monitor and sticky janitor leave their loops
//! ```

pub mod shutdown;

pub use shutdown::{wait_for_ctrl_c, Shutdown};
