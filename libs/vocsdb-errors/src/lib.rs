//! Canonical error taxonomy shared by every crate in this workspace.
//!
//! All domain-level errors eventually flow through [`DispatchError`], the
//! single enum the request dispatcher turns into a wire error envelope. Lower
//! layers (the entity store, the auth engine, the LDAP worker) define their
//! own narrow error types and convert into this one at their boundary, in
//! line with this codebase's canonical-error idiom: a small closed enum with
//! `From` impls from domain errors, never carrying transport-specific
//! baggage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The four wire error categories a client can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or malformed required field.
    Parameter,
    /// Caller not permitted, invalid credentials, or LDAP-backed password change.
    Auth,
    /// Integrity violation, backend failure, or id not found during update.
    Processing,
    /// An async request (LDAP) expired before completion.
    Timeout,
}

impl ErrorCategory {
    /// Numeric wire code for this category.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Parameter => 400,
            Self::Auth => 401,
            Self::Processing => 422,
            Self::Timeout => 504,
        }
    }
}

/// Canonical error surfaced at the dispatcher boundary.
///
/// Every lower-layer error type in this workspace converts into one of these
/// variants. `Processing` carries an optional per-attribute error map so
/// `verify`/`update` responses can echo field-level detail back to the
/// caller.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum DispatchError {
    /// A required parameter was missing or malformed.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// The caller lacks permission, or credentials were rejected.
    #[error("auth error: {0}")]
    Auth(String),

    /// An integrity or backend failure occurred, optionally per-attribute.
    #[error("processing error: {message}")]
    Processing {
        message: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
    },

    /// An async operation (LDAP bind/search) expired before completion.
    #[error("timeout: {0}")]
    Timeout(String),
}

impl DispatchError {
    /// Construct a bare processing error with no per-attribute detail.
    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Construct a processing error naming the offending attributes.
    #[must_use]
    pub fn processing_with_attributes(
        message: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            attributes,
        }
    }

    /// The wire category this error maps to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parameter(_) => ErrorCategory::Parameter,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Processing { .. } => ErrorCategory::Processing,
            Self::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    /// Numeric wire code, shorthand for `self.category().code()`.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.category().code()
    }

    /// Short human-readable description, as placed in the response envelope.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Parameter(m) | Self::Auth(m) | Self::Timeout(m) => m.clone(),
            Self::Processing { message, .. } => message.clone(),
        }
    }

    /// Per-attribute error detail, empty unless this is a `Processing` error
    /// produced by `verify_item`/`update_item`.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        match self {
            Self::Processing { attributes, .. } => attributes.clone(),
            _ => BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_are_stable() {
        assert_eq!(ErrorCategory::Parameter.code(), 400);
        assert_eq!(ErrorCategory::Auth.code(), 401);
        assert_eq!(ErrorCategory::Processing.code(), 422);
        assert_eq!(ErrorCategory::Timeout.code(), 504);
    }

    #[test]
    fn processing_with_attributes_round_trips() {
        let mut attrs = BTreeMap::new();
        attrs.insert("users".to_owned(), "id 'user11' already owned".to_owned());
        let err = DispatchError::processing_with_attributes("verify failed", attrs.clone());
        assert_eq!(err.category(), ErrorCategory::Processing);
        assert_eq!(err.attributes(), attrs);
    }

    #[test]
    fn bare_processing_has_no_attributes() {
        let err = DispatchError::processing("lock timed out");
        assert!(err.attributes().is_empty());
        assert_eq!(err.code(), 422);
    }
}
