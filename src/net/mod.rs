//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, HTTP/1.1 + HTTP/2 auto-detection)
//!     → Hand off to the pipeline-wrapped router
//! ```

pub mod listener;

pub use listener::{bind, serve_connections, ListenerError};
