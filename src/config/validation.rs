//! Configuration validation.
//!
//! # Responsibilities
//! - Range checks (`max_body_bytes`, `cpu_threshold_per_mille`)
//! - Signature key uniqueness by fingerprint
//! - Backend pool sanity
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{
    BackendConfig, Config, ServingConfig, SignatureConfig, CPU_THRESHOLD_LIMIT,
    MAX_BODY_BYTES_LIMIT,
};

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.host must not be empty")]
    EmptyHost,

    #[error("server.max_body_bytes {0} exceeds {limit}", limit = MAX_BODY_BYTES_LIMIT)]
    BodyLimitOutOfRange(u64),

    #[error("server.cpu_threshold_per_mille {0} exceeds {limit}", limit = CPU_THRESHOLD_LIMIT)]
    CpuThresholdOutOfRange(u64),

    #[error("signature.expiry_secs must be positive")]
    ZeroExpiry,

    #[error("signature key fingerprint must not be empty")]
    EmptyFingerprint,

    #[error("duplicate signature key fingerprint `{0}`")]
    DuplicateFingerprint(String),

    #[error("backend.target must not be empty")]
    EmptyBackendTarget,

    #[error("backend.pool_size must be at least 1")]
    EmptyBackendPool,

    #[error("backend.dial_timeout_millis must be positive")]
    ZeroDialTimeout,
}

/// Validate a full configuration file.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(&config.server, &mut errors);
    if let Some(backend) = &config.backend {
        check_backend(backend, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the serving section on its own.
pub fn validate_serving(config: &ServingConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(config, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_server(config: &ServingConfig, errors: &mut Vec<ValidationError>) {
    if config.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }
    if config.max_body_bytes > MAX_BODY_BYTES_LIMIT {
        errors.push(ValidationError::BodyLimitOutOfRange(config.max_body_bytes));
    }
    if config.cpu_threshold_per_mille > CPU_THRESHOLD_LIMIT {
        errors.push(ValidationError::CpuThresholdOutOfRange(
            config.cpu_threshold_per_mille,
        ));
    }
    if let Some(signature) = &config.signature {
        check_signature(signature, errors);
    }
}

fn check_signature(config: &SignatureConfig, errors: &mut Vec<ValidationError>) {
    if config.expiry_secs == 0 {
        errors.push(ValidationError::ZeroExpiry);
    }

    let mut seen = HashSet::new();
    for key in &config.private_keys {
        if key.fingerprint.is_empty() {
            errors.push(ValidationError::EmptyFingerprint);
        } else if !seen.insert(key.fingerprint.as_str()) {
            errors.push(ValidationError::DuplicateFingerprint(key.fingerprint.clone()));
        }
    }
}

fn check_backend(config: &BackendConfig, errors: &mut Vec<ValidationError>) {
    if config.target.trim().is_empty() {
        errors.push(ValidationError::EmptyBackendTarget);
    }
    if config.pool_size == 0 {
        errors.push(ValidationError::EmptyBackendPool);
    }
    if config.dial_timeout_millis == 0 {
        errors.push(ValidationError::ZeroDialTimeout);
    }
}
