//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (timing samples, rejection and proxy counters)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric updates go through the `metrics` facade; without an installed
//!   recorder they are no-ops
//! - The timing sink is a trait so the aggregation backend stays pluggable

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSink, PrometheusSink, TimingSample};
