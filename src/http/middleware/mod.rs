//! Pipeline stages, one `from_fn_with_state` middleware per file.

pub mod cors;
pub mod deadline;
pub mod max_bytes;
pub mod max_conns;
pub mod shedding;
pub mod signature;
pub mod timing;

pub use cors::{allowed_origin, not_allowed, CorsPolicy};
pub use timing::TimingGuard;
