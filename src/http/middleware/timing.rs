//! Request timing.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::observability::{MetricsSink, TimingSample};

/// Records one sample when dropped, whatever the exit path.
pub struct TimingGuard {
    sink: Arc<dyn MetricsSink>,
    started: Instant,
}

impl TimingGuard {
    pub fn start(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            started: Instant::now(),
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        self.sink.record(TimingSample {
            duration: self.started.elapsed(),
        });
    }
}

pub async fn time_request(
    State(sink): State<Arc<dyn MetricsSink>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = TimingGuard::start(sink);
    next.run(request).await
}
