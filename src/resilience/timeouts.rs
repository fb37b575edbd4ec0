//! Per-request deadlines.
//!
//! The deadline middleware inserts a [`Deadline`] into request extensions so
//! handlers can size their own downstream calls to the remaining budget.

use std::time::Duration;

use tokio::time::Instant;

/// Point in time by which the response must be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}
