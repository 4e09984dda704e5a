//! Error kinds surfaced by the app registry and the connection authorizer.

use crate::credentials::CredentialKind;
use crate::store::StoreError;
use serde::Serialize;

/// Result alias used by every public operation of the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A single form field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No app with that slug is owned by the requesting account.
    #[error("app not found")]
    NotFound,

    /// The presented api key (or api key + secret pair) matches no app.
    #[error("invalid api key")]
    InvalidApiKey,

    /// No active connection holds the presented access token.
    ///
    /// Never-issued and revoked tokens are reported identically.
    #[error("no such connection")]
    NoSuchConnection,

    /// The submitted app form is malformed.
    #[error("validation failed ({} field errors)", .0.len())]
    ValidationFailed(Vec<FieldError>),

    /// Every draw collided with an existing or retired credential.
    #[error("could not generate a unique {kind} after {attempts} attempts")]
    CredentialExhaustion { kind: CredentialKind, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(StoreError::Busy))
    }
}
