//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Validate config → Load keys → Bind listener → Running
//!
//! Shutdown (shutdown.rs):
//!     stop() / Ctrl-C → Stop accepting → Drain connections → Stopped
//! ```
//!
//! # Design Decisions
//! - State is observable (watch channel) so callers can await transitions
//! - Shutdown has a timeout: connections are aborted after the grace period

pub mod shutdown;
pub mod state;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use state::{EngineState, Lifecycle};
