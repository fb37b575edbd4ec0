//! Request signature verification.
//!
//! # Responsibilities
//! - Parse the `X-Content-Security` header (key fingerprint, timestamp, signature)
//! - Resolve key material by fingerprint
//! - Verify the signature over the canonical request content
//! - Enforce the freshness window
//!
//! # Header Format
//! ```text
//! X-Content-Security: key=<fingerprint>; timestamp=<unix seconds>; signature=<hex>
//!
//! signed payload = timestamp \n METHOD \n path \n query \n hex(sha256(body))
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{PrivateKeyConfig, SignatureConfig};
use crate::observability::metrics;

pub const SIGNATURE_HEADER: &str = "x-content-security";

/// Errors raised while loading key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key `{fingerprint}` from {path:?}: {source}")]
    Read {
        fingerprint: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("key `{0}` is empty")]
    Empty(String),
}

/// Resolves key material by fingerprint.
pub trait KeyProvider: Send + Sync + 'static {
    fn key(&self, fingerprint: &str) -> Option<Arc<[u8]>>;
}

/// In-memory key set, usually loaded from the configured key files.
#[derive(Default, Clone)]
pub struct KeyRing {
    keys: HashMap<String, Arc<[u8]>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, fingerprint: impl Into<String>, material: impl AsRef<[u8]>) -> Self {
        self.keys
            .insert(fingerprint.into(), Arc::from(material.as_ref()));
        self
    }

    /// Read every configured key file. Trailing whitespace is trimmed.
    pub fn load(configs: &[PrivateKeyConfig]) -> Result<Self, KeyError> {
        let mut ring = Self::new();
        for config in configs {
            let raw = fs::read(&config.key_file).map_err(|source| KeyError::Read {
                fingerprint: config.fingerprint.clone(),
                path: config.key_file.clone(),
                source,
            })?;
            let material = raw.trim_ascii_end();
            if material.is_empty() {
                return Err(KeyError::Empty(config.fingerprint.clone()));
            }
            ring = ring.with_key(config.fingerprint.clone(), material);
        }
        tracing::info!(keys = ring.len(), "Signature keys loaded");
        Ok(ring)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyProvider for KeyRing {
    fn key(&self, fingerprint: &str) -> Option<Arc<[u8]>> {
        self.keys.get(fingerprint).cloned()
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("fingerprints", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Pluggable signature algorithm.
pub trait SignatureVerifier: Send + Sync + 'static {
    fn verify(&self, key: &[u8], payload: &[u8], signature: &[u8]) -> bool;
}

/// HMAC-SHA256 with constant-time comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Verifier;

impl SignatureVerifier for HmacSha256Verifier {
    fn verify(&self, key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
        constant_time_eq(&hmac_sha256(key, payload), signature)
    }
}

fn hmac_sha256(secret: &[u8], message: &[u8]) -> [u8; 32] {
    const BLOCK_SIZE: usize = 64;
    let mut key_block = [0u8; BLOCK_SIZE];
    if secret.len() > BLOCK_SIZE {
        let digest = Sha256::digest(secret);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..secret.len()].copy_from_slice(secret);
    }

    let mut o_key_pad = [0u8; BLOCK_SIZE];
    let mut i_key_pad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        o_key_pad[i] = key_block[i] ^ 0x5c;
        i_key_pad[i] = key_block[i] ^ 0x36;
    }

    let mut inner = Sha256::new();
    inner.update(i_key_pad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(o_key_pad);
    outer.update(inner_hash);
    outer.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Why a request failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureViolation {
    Missing,
    Malformed,
    UnknownKey,
    Expired,
    Mismatch,
}

impl SignatureViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureViolation::Missing => "missing",
            SignatureViolation::Malformed => "malformed",
            SignatureViolation::UnknownKey => "unknown_key",
            SignatureViolation::Expired => "expired",
            SignatureViolation::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for SignatureViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a request covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedContent<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub body: &'a [u8],
}

impl SignedContent<'_> {
    fn payload(&self, timestamp: u64) -> Vec<u8> {
        let body_digest = hex::encode(Sha256::digest(self.body));
        format!(
            "{timestamp}\n{}\n{}\n{}\n{body_digest}",
            self.method, self.path, self.query
        )
        .into_bytes()
    }
}

/// Produce an `X-Content-Security` header value signing `content` with HMAC-SHA256.
pub fn sign(fingerprint: &str, key: &[u8], timestamp: u64, content: &SignedContent<'_>) -> String {
    let signature = hmac_sha256(key, &content.payload(timestamp));
    format!(
        "key={fingerprint}; timestamp={timestamp}; signature={}",
        hex::encode(signature)
    )
}

struct SignatureHeader<'a> {
    fingerprint: &'a str,
    timestamp: u64,
    signature: Vec<u8>,
}

fn parse_header(value: &str) -> Result<SignatureHeader<'_>, SignatureViolation> {
    let mut fingerprint = None;
    let mut timestamp = None;
    let mut signature = None;

    for field in value.split(';') {
        let Some((name, value)) = field.trim().split_once('=') else {
            continue;
        };
        match name.trim() {
            "key" => fingerprint = Some(value.trim()),
            "timestamp" => timestamp = value.trim().parse::<u64>().ok(),
            "signature" => signature = hex::decode(value.trim()).ok(),
            _ => {}
        }
    }

    match (fingerprint, timestamp, signature) {
        (Some(fingerprint), Some(timestamp), Some(signature)) if !fingerprint.is_empty() => {
            Ok(SignatureHeader {
                fingerprint,
                timestamp,
                signature,
            })
        }
        _ => Err(SignatureViolation::Malformed),
    }
}

/// Applies the configured signature policy to requests.
pub struct SignatureGuard {
    strict: bool,
    expiry: Duration,
    keys: Arc<dyn KeyProvider>,
    verifier: Arc<dyn SignatureVerifier>,
    violations: AtomicU64,
}

impl SignatureGuard {
    pub fn new(config: &SignatureConfig, keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            strict: config.strict,
            expiry: config.expiry(),
            keys,
            verifier: Arc::new(HmacSha256Verifier),
            violations: AtomicU64::new(0),
        }
    }

    /// Build a guard whose keys come from the configured key files.
    pub fn from_config(config: &SignatureConfig) -> Result<Self, KeyError> {
        let ring = KeyRing::load(&config.private_keys)?;
        Ok(Self::new(config, Arc::new(ring)))
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Violations observed so far, in strict and non-strict mode alike.
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Verify a request against the policy at time `now`.
    pub fn check(
        &self,
        headers: &HeaderMap,
        content: &SignedContent<'_>,
        now: SystemTime,
    ) -> Result<(), SignatureViolation> {
        let raw = headers
            .get(SIGNATURE_HEADER)
            .ok_or(SignatureViolation::Missing)?
            .to_str()
            .map_err(|_| SignatureViolation::Malformed)?;
        let header = parse_header(raw)?;

        let key = self
            .keys
            .key(header.fingerprint)
            .ok_or(SignatureViolation::UnknownKey)?;

        let now = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now.abs_diff(header.timestamp) > self.expiry.as_secs() {
            return Err(SignatureViolation::Expired);
        }

        if self
            .verifier
            .verify(&key, &content.payload(header.timestamp), &header.signature)
        {
            Ok(())
        } else {
            Err(SignatureViolation::Mismatch)
        }
    }

    /// Count and log a violation.
    pub fn record(&self, violation: SignatureViolation, path: &str) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        metrics::record_signature_violation(violation.as_str());
        tracing::warn!(
            violation = %violation,
            path = %path,
            strict = self.strict,
            "Request signature verification failed"
        );
    }
}

impl fmt::Debug for SignatureGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureGuard")
            .field("strict", &self.strict)
            .field("expiry", &self.expiry)
            .field("violations", &self.violations())
            .finish()
    }
}
