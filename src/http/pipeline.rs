//! Admission and middleware pipeline.
//!
//! # Stage Order (outermost first)
//! ```text
//! Timing → Cors → LoadShedding → ConnectionLimit → BodyLimit → Deadline → Signature
//!     → CatchPanic → handler
//! ```
//!
//! # Design Decisions
//! - The order is a constant array so it can be asserted in tests
//! - Disabled stages are omitted entirely rather than installed as no-ops
//! - Rejections short-circuit; outer guards still run their cleanup on the way out

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;

use crate::config::ServingConfig;
use crate::http::middleware::{cors, deadline, max_bytes, max_conns, shedding, signature, timing};
use crate::http::middleware::CorsPolicy;
use crate::http::response::Rejection;
use crate::observability::MetricsSink;
use crate::resilience::{CpuSampler, LoadShedder};
use crate::security::{ConnectionLimiter, SignatureGuard};

/// One interceptor in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Timing,
    Cors,
    LoadShedding,
    ConnectionLimit,
    BodyLimit,
    Deadline,
    Signature,
}

/// Every stage, outermost first.
pub const STAGE_ORDER: [Stage; 7] = [
    Stage::Timing,
    Stage::Cors,
    Stage::LoadShedding,
    Stage::ConnectionLimit,
    Stage::BodyLimit,
    Stage::Deadline,
    Stage::Signature,
];

/// Configured stages with their shared state.
#[derive(Clone)]
pub struct Pipeline {
    sink: Arc<dyn MetricsSink>,
    cors: Option<CorsPolicy>,
    shedder: Option<LoadShedder>,
    limiter: Option<ConnectionLimiter>,
    max_body: Option<usize>,
    timeout: Option<Duration>,
    signature: Option<Arc<SignatureGuard>>,
}

impl Pipeline {
    pub fn from_config(
        config: &ServingConfig,
        sink: Arc<dyn MetricsSink>,
        sampler: Arc<dyn CpuSampler>,
        signature: Option<Arc<SignatureGuard>>,
    ) -> Self {
        Self {
            sink,
            cors: config
                .cors
                .as_ref()
                .map(|cors| CorsPolicy::new(cors.origins.clone())),
            shedder: (config.cpu_threshold_per_mille > 0)
                .then(|| LoadShedder::new(config.cpu_threshold_per_mille, sampler)),
            limiter: (config.max_connections > 0)
                .then(|| ConnectionLimiter::new(config.max_connections)),
            max_body: (config.max_body_bytes > 0)
                .then(|| usize::try_from(config.max_body_bytes).unwrap_or(usize::MAX)),
            timeout: config.timeout(),
            signature,
        }
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::Timing => true,
            Stage::Cors => self.cors.is_some(),
            Stage::LoadShedding => self.shedder.is_some(),
            Stage::ConnectionLimit => self.limiter.is_some(),
            Stage::BodyLimit => self.max_body.is_some(),
            Stage::Deadline => self.timeout.is_some(),
            Stage::Signature => self.signature.is_some(),
        }
    }

    /// Enabled stages, outermost first.
    pub fn stages(&self) -> Vec<Stage> {
        STAGE_ORDER
            .into_iter()
            .filter(|stage| self.is_enabled(*stage))
            .collect()
    }

    pub fn connection_limiter(&self) -> Option<&ConnectionLimiter> {
        self.limiter.as_ref()
    }

    pub fn signature_guard(&self) -> Option<&Arc<SignatureGuard>> {
        self.signature.as_ref()
    }

    /// Wrap `router` with every enabled stage.
    pub fn apply(&self, router: Router) -> Router {
        let mut router = match &self.cors {
            Some(policy) => {
                let policy = policy.clone();
                router.fallback(move |request: Request| {
                    let policy = policy.clone();
                    async move { cors::fallback(&policy, &request) }
                })
            }
            None => router,
        };
        router = router.layer(CatchPanicLayer::custom(panic_response));

        // Layers added later wrap the earlier ones, so go innermost first.
        for stage in self.stages().into_iter().rev() {
            router = self.wrap(router, stage);
        }
        router
    }

    fn wrap(&self, router: Router, stage: Stage) -> Router {
        match stage {
            Stage::Timing => router.layer(from_fn_with_state(
                Arc::clone(&self.sink),
                timing::time_request,
            )),
            Stage::Cors => match &self.cors {
                Some(policy) => router.layer(from_fn_with_state(policy.clone(), cors::cors)),
                None => router,
            },
            Stage::LoadShedding => match &self.shedder {
                Some(shedder) => {
                    router.layer(from_fn_with_state(shedder.clone(), shedding::shed_load))
                }
                None => router,
            },
            Stage::ConnectionLimit => match &self.limiter {
                Some(limiter) => router.layer(from_fn_with_state(
                    limiter.clone(),
                    max_conns::limit_connections,
                )),
                None => router,
            },
            Stage::BodyLimit => match self.max_body {
                Some(max) => router.layer(from_fn_with_state(max, max_bytes::limit_body)),
                None => router,
            },
            Stage::Deadline => match self.timeout {
                Some(timeout) => {
                    router.layer(from_fn_with_state(timeout, deadline::enforce_deadline))
                }
                None => router,
            },
            Stage::Signature => match &self.signature {
                Some(guard) => router.layer(from_fn_with_state(
                    Arc::clone(guard),
                    signature::verify_signature,
                )),
                None => router,
            },
        }
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %message, "Handler panicked");
    Rejection::Internal.into_response()
}
