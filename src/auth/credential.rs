//! Credential extraction from call metadata.

use std::fmt;

use axum::http::{request::Parts, HeaderMap, HeaderValue};
use thiserror::Error;

/// Metadata key carrying the application id.
pub const APP_HEADER: &str = "app";
/// Metadata key carrying the application token.
pub const TOKEN_HEADER: &str = "token";

/// Errors raised while resolving a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("missing credential field `{0}`")]
    Missing(&'static str),

    #[error("credential field `{0}` is not valid header text")]
    Invalid(&'static str),
}

/// Tenant identity. Equality and hashing cover both fields, so the value
/// itself serves as the composite key for client caching and call dedup.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    app: String,
    token: String,
}

impl Credential {
    pub fn new(app: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            token: token.into(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Attach this credential to outgoing metadata, replacing any previous values.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), CredentialError> {
        let app = HeaderValue::from_str(&self.app).map_err(|_| CredentialError::Invalid(APP_HEADER))?;
        let mut token =
            HeaderValue::from_str(&self.token).map_err(|_| CredentialError::Invalid(TOKEN_HEADER))?;
        token.set_sensitive(true);

        headers.insert(APP_HEADER, app);
        headers.insert(TOKEN_HEADER, token);
        Ok(())
    }

    /// Parse a credential from metadata. Both fields must be present and non-empty.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CredentialError> {
        Ok(Self {
            app: read_field(headers, APP_HEADER)?,
            token: read_field(headers, TOKEN_HEADER)?,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app", &self.app)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn read_field(headers: &HeaderMap, name: &'static str) -> Result<String, CredentialError> {
    let value = headers.get(name).ok_or(CredentialError::Missing(name))?;
    let value = value.to_str().map_err(|_| CredentialError::Invalid(name))?;
    if value.is_empty() {
        return Err(CredentialError::Missing(name));
    }
    Ok(value.to_string())
}

/// Read-only capability yielding the caller's credential.
///
/// Passed explicitly alongside the request value rather than read from
/// ambient state.
pub trait CredentialSource {
    fn credential(&self) -> Result<Credential, CredentialError>;
}

impl CredentialSource for Credential {
    fn credential(&self) -> Result<Credential, CredentialError> {
        Ok(self.clone())
    }
}

impl CredentialSource for HeaderMap {
    fn credential(&self) -> Result<Credential, CredentialError> {
        Credential::from_headers(self)
    }
}

impl CredentialSource for Parts {
    fn credential(&self) -> Result<Credential, CredentialError> {
        Credential::from_headers(&self.headers)
    }
}

impl<B> CredentialSource for axum::http::Request<B> {
    fn credential(&self) -> Result<Credential, CredentialError> {
        Credential::from_headers(self.headers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn resolves_from_headers() {
        let cred = headers(&[("app", "billing"), ("token", "s3cr3t")])
            .credential()
            .unwrap();
        assert_eq!(cred.app(), "billing");
        assert_eq!(cred.token(), "s3cr3t");
    }

    #[test]
    fn missing_or_empty_fields_fail() {
        assert_eq!(
            headers(&[("token", "t")]).credential(),
            Err(CredentialError::Missing(APP_HEADER))
        );
        assert_eq!(
            headers(&[("app", "a"), ("token", "")]).credential(),
            Err(CredentialError::Missing(TOKEN_HEADER))
        );
    }

    #[test]
    fn key_has_no_delimiter_ambiguity() {
        // "a/b" + "c" and "a" + "b/c" collide when concatenated with '/'.
        let mut keys = HashSet::new();
        keys.insert(Credential::new("a/b", "c"));
        keys.insert(Credential::new("a", "b/c"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", Credential::new("app", "hunter2"));
        assert!(rendered.contains("app"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn apply_round_trips_through_headers() {
        let cred = Credential::new("orders", "tok");
        let mut map = HeaderMap::new();
        cred.apply(&mut map).unwrap();
        assert_eq!(Credential::from_headers(&map).unwrap(), cred);
    }
}
