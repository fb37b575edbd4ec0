//! Serving engine.
//!
//! # Responsibilities
//! - Validate serving config and load signature keys at construction
//! - Wrap user routes with the admission pipeline and ambient layers
//! - Bind, serve and drain on stop, tracking the lifecycle state
//!
//! # Data Flow
//! ```text
//! ServingEngine::new(config)
//!     → route()/merge() user handlers
//!     → start() | serve(listener)
//!         → request-id → trace → Pipeline stages → handler
//!     → stop() → drain (bounded by shutdown_grace_millis) → Stopped
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::routing::MethodRouter;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::validation::validate_serving;
use crate::config::{ServingConfig, ValidationError};
use crate::http::pipeline::{Pipeline, Stage};
use crate::http::request::MakeRequestUuid;
use crate::lifecycle::{EngineState, Lifecycle, Shutdown};
use crate::net::{self, ListenerError};
use crate::observability::{MetricsSink, PrometheusSink};
use crate::resilience::{CpuSampler, ProcCpuSampler};
use crate::security::{KeyError, KeyProvider, SignatureGuard};

/// Errors raised while constructing or running the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {}", join(.0))]
    Config(Vec<ValidationError>),

    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("engine already started")]
    AlreadyStarted,

    #[error("serve error: {0}")]
    Io(#[from] io::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// HTTP serving engine with an admission pipeline in front of user routes.
pub struct ServingEngine {
    config: ServingConfig,
    routes: Router,
    sink: Arc<dyn MetricsSink>,
    sampler: Arc<dyn CpuSampler>,
    signature: Option<Arc<SignatureGuard>>,
    pipeline: Pipeline,
    lifecycle: Lifecycle,
    shutdown: Shutdown,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ServingEngine {
    /// Validate `config` and load signature keys.
    pub fn new(config: ServingConfig) -> Result<Self, EngineError> {
        validate_serving(&config).map_err(EngineError::Config)?;

        let signature = match &config.signature {
            Some(signature) => Some(Arc::new(SignatureGuard::from_config(signature)?)),
            None => None,
        };
        let sink: Arc<dyn MetricsSink> = Arc::new(PrometheusSink);
        let sampler: Arc<dyn CpuSampler> = Arc::new(ProcCpuSampler::new());
        let pipeline =
            Pipeline::from_config(&config, Arc::clone(&sink), Arc::clone(&sampler), signature.clone());

        Ok(Self {
            config,
            routes: Router::new(),
            sink,
            sampler,
            signature,
            pipeline,
            lifecycle: Lifecycle::new(),
            shutdown: Shutdown::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.routes = self.routes.route(path, method_router);
        self
    }

    pub fn merge(mut self, router: Router) -> Self {
        self.routes = self.routes.merge(router);
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self.rebuild_pipeline();
        self
    }

    pub fn with_cpu_sampler(mut self, sampler: Arc<dyn CpuSampler>) -> Self {
        self.sampler = sampler;
        self.rebuild_pipeline();
        self
    }

    /// Replace the key material loaded from the configured key files.
    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        if let Some(signature) = &self.config.signature {
            self.signature = Some(Arc::new(SignatureGuard::new(signature, keys)));
            self.rebuild_pipeline();
        }
        self
    }

    fn rebuild_pipeline(&mut self) {
        self.pipeline = Pipeline::from_config(
            &self.config,
            Arc::clone(&self.sink),
            Arc::clone(&self.sampler),
            self.signature.clone(),
        );
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.pipeline.stages()
    }

    /// Requests currently holding an admission slot.
    pub fn active_requests(&self) -> usize {
        self.pipeline
            .connection_limiter()
            .map_or(0, |limiter| limiter.active())
    }

    /// Signature violations seen so far (0 when signatures are off).
    pub fn signature_violations(&self) -> u64 {
        self.signature
            .as_ref()
            .map_or(0, |guard| guard.violations())
    }

    /// Address the engine is serving on, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The fully wrapped router: ambient layers, pipeline, user routes.
    pub fn router(&self) -> Router {
        let level = if self.config.verbose {
            Level::INFO
        } else {
            Level::DEBUG
        };

        self.pipeline.apply(self.routes.clone()).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(level))
                        .on_response(DefaultOnResponse::new().level(level)),
                )
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    /// Resolve once the engine is running (or has already stopped).
    pub async fn ready(&self) {
        self.lifecycle
            .wait_until(|state| matches!(state, EngineState::Running | EngineState::Stopped))
            .await;
    }

    /// Bind the configured address and serve until stopped.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.lifecycle
            .begin_start()
            .map_err(|_| EngineError::AlreadyStarted)?;

        let listener = match net::bind(&self.config.bind_address()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.lifecycle.abort_start();
                return Err(e.into());
            }
        };
        self.run(listener).await
    }

    /// Serve on an already bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), EngineError> {
        self.lifecycle
            .begin_start()
            .map_err(|_| EngineError::AlreadyStarted)?;
        self.run(listener).await
    }

    async fn run(&self, listener: TcpListener) -> Result<(), EngineError> {
        let address = match listener.local_addr() {
            Ok(address) => address,
            Err(e) => {
                self.lifecycle.abort_start();
                return Err(e.into());
            }
        };
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(address);

        let app = self.router();
        let signal = self.shutdown.subscribe();
        if self.lifecycle.mark_running() {
            tracing::info!(
                address = %address,
                stages = ?self.pipeline.stages(),
                "Serving engine running"
            );
        }

        net::serve_connections(listener, app, signal, self.config.shutdown_grace()).await;

        self.lifecycle.mark_stopped();
        tracing::info!(address = %address, "Serving engine stopped");
        Ok(())
    }

    /// Stop accepting, drain in-flight requests and wait until stopped.
    /// A no-op before start and after the first call.
    pub async fn stop(&self) {
        if self.lifecycle.begin_stop() {
            tracing::info!("Serving engine stopping");
            self.shutdown.trigger();
        }
        if self.lifecycle.state() != EngineState::Created {
            self.lifecycle
                .wait_until(|state| state == EngineState::Stopped)
                .await;
        }
    }
}

impl std::fmt::Debug for ServingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingEngine")
            .field("address", &self.config.bind_address())
            .field("state", &self.state())
            .field("stages", &self.pipeline.stages())
            .finish()
    }
}
