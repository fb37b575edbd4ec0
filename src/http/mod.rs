//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → request.rs (request id)
//!     → pipeline.rs (admission stages in middleware/)
//!     → user handler
//!     → response.rs (pipeline rejections rendered here)
//! ```

pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{Pipeline, Stage, STAGE_ORDER};
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::Rejection;
pub use server::{EngineError, ServingEngine};
