//! Serving core library.
//!
//! An HTTP serving engine with an ordered admission pipeline, plus a backend
//! RPC proxy that multiplexes tenant credentials over pooled HTTP/2 connections.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod rpc;

// Shared building blocks
pub mod auth;
pub mod sync;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::{Config, ServingConfig};
pub use http::{EngineError, Pipeline, ServingEngine, Stage, STAGE_ORDER};
pub use lifecycle::{EngineState, Shutdown};
pub use rpc::{RpcError, RpcProxy};
pub use sync::SharedCalls;
