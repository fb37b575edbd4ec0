//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (admission slot, early Content-Length check)
//!     → signature.rs (X-Content-Security verification)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Limits are checked before the body is read (early rejection)
//! - Signature checks can run in report-only mode (non-strict)

pub mod limits;
pub mod signature;

pub use limits::{ConnectionLimiter, ConnectionSlot};
pub use signature::{
    KeyError, KeyProvider, KeyRing, SignatureGuard, SignatureVerifier, SignatureViolation,
    SignedContent,
};
