//! Credential issuance for apps and connections.
//!
//! Three kinds of credential are minted here:
//!
//! | Kind          | Format                               | Entropy  |
//! |---------------|--------------------------------------|----------|
//! | api key       | UUID v4, simple form (32 hex chars)  | 122 bits |
//! | secret        | 32 OS-random bytes, base64url        | 256 bits |
//! | access token  | 32 OS-random bytes, base64url        | 256 bits |
//!
//! A fresh draw is only accepted once the caller-supplied `is_taken` check
//! says no live or retired credential already holds it. Collisions are
//! retried with a new draw up to `max_attempts`, after which generation
//! fails with `CredentialExhaustion`. Hitting that limit means the random
//! source or the store is broken, not that the key space is full.
//!
//! The stores still enforce uniqueness on insert; the check here only keeps
//! a broken random source from reaching them.

use crate::error::{Error, Result};
use crate::store::StoreError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

mod encryption;


pub use encryption::{SealedSecret, SecretCipher};

/// Default bound on draws per credential.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Random bytes behind a secret or access token.
const TOKEN_BYTES: usize = 32;

/// The kinds of credential this crate issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    ApiKey,
    Secret,
    AccessToken,
}

impl CredentialKind {
    /// Stable identifier used in the retired-credential ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::ApiKey => "api_key",
            CredentialKind::Secret => "secret",
            CredentialKind::AccessToken => "access_token",
        }
    }

    fn draw(&self) -> String {
        match self {
            CredentialKind::ApiKey => Uuid::new_v4().simple().to_string(),
            CredentialKind::Secret | CredentialKind::AccessToken => random_token(),
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::ApiKey => write!(f, "api key"),
            CredentialKind::Secret => write!(f, "secret"),
            CredentialKind::AccessToken => write!(f, "access token"),
        }
    }
}

/// Mints collision-checked credentials.
#[derive(Debug, Clone)]
pub struct CredentialGenerator {
    max_attempts: u32,
}

impl CredentialGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn new_api_key<F>(&self, is_taken: F) -> Result<String>
    where
        F: FnMut(&str) -> std::result::Result<bool, StoreError>,
    {
        self.generate(CredentialKind::ApiKey, is_taken)
    }

    pub fn new_secret<F>(&self, is_taken: F) -> Result<String>
    where
        F: FnMut(&str) -> std::result::Result<bool, StoreError>,
    {
        self.generate(CredentialKind::Secret, is_taken)
    }

    pub fn new_access_token<F>(&self, is_taken: F) -> Result<String>
    where
        F: FnMut(&str) -> std::result::Result<bool, StoreError>,
    {
        self.generate(CredentialKind::AccessToken, is_taken)
    }

    fn generate<F>(&self, kind: CredentialKind, mut is_taken: F) -> Result<String>
    where
        F: FnMut(&str) -> std::result::Result<bool, StoreError>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = kind.draw();
            if !is_taken(&candidate)? {
                return Ok(candidate);
            }
            warn!(%kind, attempt, "Generated credential collided, drawing again");
        }

        Err(Error::CredentialExhaustion {
            kind,
            attempts: self.max_attempts,
        })
    }
}

impl Default for CredentialGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// SHA-256 hex digest of a secret, stored under the unique index.
pub fn secret_digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short prefix of a credential, safe to put in logs.
pub fn redact(credential: &str) -> String {
    let prefix: String = credential.chars().take(6).collect();
    format!("{}…", prefix)
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
