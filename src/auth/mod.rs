//! Tenant identity.
//!
//! # Data Flow
//! ```text
//! inbound headers / request parts
//!     → credential.rs (CredentialSource::credential)
//!     → Credential { app, token }   (structural cache and dedup key)
//!     → rpc proxy (client lookup) and dialed connections (attached to every call)
//! ```

pub mod credential;

pub use credential::{Credential, CredentialError, CredentialSource, APP_HEADER, TOKEN_HEADER};
