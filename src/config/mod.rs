//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (range and uniqueness checks)
//!     → Config (validated, immutable)
//!     → ServingConfig owned by the engine, BackendConfig by the RPC proxy
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BackendConfig, Config, CorsConfig, ObservabilityConfig, PrivateKeyConfig, ServingConfig,
    SignatureConfig, CPU_THRESHOLD_LIMIT, MAX_BODY_BYTES_LIMIT,
};
pub use validation::ValidationError;
