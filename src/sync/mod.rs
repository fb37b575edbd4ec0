//! Concurrency primitives shared by the serving engine and the RPC proxy.
//!
//! # Data Flow
//! ```text
//! caller A ─┐
//! caller B ─┼─▶ shared_calls.rs (one leader per key runs the operation)
//! caller C ─┘        │
//!                    └─▶ result cloned to every caller, entry removed
//! ```

pub mod shared_calls;

pub use shared_calls::SharedCalls;
