//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → shedding.rs (reject early while CPU is saturated)
//!     → timeouts.rs (deadline carried in request extensions)
//! ```
//!
//! # Design Decisions
//! - Shedding happens before any admission slot is taken
//! - Every request has a deadline unless explicitly disabled

pub mod shedding;
pub mod timeouts;

pub use shedding::{CpuSampler, LoadShedder, ProcCpuSampler};
pub use timeouts::Deadline;
