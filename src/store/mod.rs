//! Keyed storage for apps and connections.
//!
//! The registry and the authorizer only talk to storage through the
//! [`AppStore`] and [`ConnectionStore`] traits. Uniqueness (slug, api key,
//! secret, access token, one connection per app/account pair) is enforced
//! here with atomic insert-if-absent, never by check-then-act in the callers.

use crate::app::App;
use crate::connection::AppConnection;
use crate::credentials::CredentialKind;
use crate::AccountId;
use rusqlite::ErrorCode;
use std::fmt;
use uuid::Uuid;

mod sqlite;

pub use sqlite::SqliteStore;

/// A unique index a write can collide with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    Id,
    Slug,
    ApiKey,
    Secret,
    AccessToken,
    AppAccountPair,
}

impl UniqueKey {
    /// Maps a SQLite "UNIQUE constraint failed: ..." message to the index it names.
    fn from_constraint_message(message: &str) -> Option<Self> {
        let columns = message.strip_prefix("UNIQUE constraint failed: ")?;
        let key = match columns {
            "apps.slug" => UniqueKey::Slug,
            "apps.api_key" => UniqueKey::ApiKey,
            "apps.secret_digest" => UniqueKey::Secret,
            "app_connections.access_token" => UniqueKey::AccessToken,
            "app_connections.app_id, app_connections.account_id" => UniqueKey::AppAccountPair,
            "apps.id" | "app_connections.id" => UniqueKey::Id,
            _ => return None,
        };
        Some(key)
    }
}

impl From<CredentialKind> for UniqueKey {
    fn from(kind: CredentialKind) -> Self {
        match kind {
            CredentialKind::ApiKey => UniqueKey::ApiKey,
            CredentialKind::Secret => UniqueKey::Secret,
            CredentialKind::AccessToken => UniqueKey::AccessToken,
        }
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniqueKey::Id => "id",
            UniqueKey::Slug => "slug",
            UniqueKey::ApiKey => "api key",
            UniqueKey::Secret => "secret",
            UniqueKey::AccessToken => "access token",
            UniqueKey::AppAccountPair => "app/account connection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index (or the retired-credential ledger) already holds the value.
    #[error("duplicate {0}")]
    DuplicateKey(UniqueKey),

    /// The app a connection points at was deleted mid-insert.
    #[error("referenced app no longer exists")]
    MissingApp,

    /// The database stayed locked past the busy timeout. Retryable.
    #[error("store is busy")]
    Busy,

    #[error("store lock poisoned")]
    Poisoned,

    /// A row could not be decoded or its secret could not be opened.
    #[error("corrupt record: {0:#}")]
    Corrupt(anyhow::Error),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => return StoreError::Busy,
                ErrorCode::ConstraintViolation => {
                    let message = message.as_deref().unwrap_or_default();
                    if message.starts_with("FOREIGN KEY") {
                        return StoreError::MissingApp;
                    }
                    if let Some(key) = UniqueKey::from_constraint_message(message) {
                        return StoreError::DuplicateKey(key);
                    }
                }
                _ => {}
            }
        }
        StoreError::Sqlite(err)
    }
}

/// Outcome of an insert-if-absent on the (app, account) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionClaim {
    /// The candidate was stored.
    Inserted(AppConnection),
    /// Another connection already held the pair; it is returned unchanged.
    Existing(AppConnection),
}

impl ConnectionClaim {
    pub fn into_connection(self) -> AppConnection {
        match self {
            ConnectionClaim::Inserted(conn) | ConnectionClaim::Existing(conn) => conn,
        }
    }
}

/// Durable app records, indexed by id, (owner, slug) and api key.
pub trait AppStore: Send + Sync {
    /// Inserts a new app. Fails with `DuplicateKey` if any unique value is taken.
    fn insert_app(&self, app: &App) -> Result<(), StoreError>;

    /// Rewrites the mutable fields (slug and metadata). Returns false if the app is gone.
    fn update_app(&self, app: &App) -> Result<bool, StoreError>;

    /// Returns false if no app had that id.
    fn delete_app(&self, app_id: Uuid) -> Result<bool, StoreError>;

    fn get_app(&self, app_id: Uuid) -> Result<Option<App>, StoreError>;

    fn find_app_by_slug(&self, owner: AccountId, slug: &str) -> Result<Option<App>, StoreError>;

    fn find_app_by_api_key(&self, api_key: &str) -> Result<Option<App>, StoreError>;

    /// Apps owned by `owner`, in insertion order.
    fn list_apps(&self, owner: AccountId) -> Result<Vec<App>, StoreError>;

    /// Every slug equal to `base` or of the form `base-*`, across all owners.
    fn slugs_with_base(&self, base: &str) -> Result<Vec<String>, StoreError>;

    /// True if a live or retired app credential already holds `value`.
    fn credential_taken(&self, kind: CredentialKind, value: &str) -> Result<bool, StoreError>;
}

/// Durable connection records, indexed by id, access token and (app, account).
pub trait ConnectionStore: Send + Sync {
    fn get_connection(&self, id: Uuid) -> Result<Option<AppConnection>, StoreError>;

    fn find_connection(&self, access_token: &str) -> Result<Option<AppConnection>, StoreError>;

    fn find_connection_for(
        &self,
        app_id: Uuid,
        account_id: AccountId,
    ) -> Result<Option<AppConnection>, StoreError>;

    /// Atomically stores `candidate` unless its (app, account) pair is already connected.
    fn claim_connection(&self, candidate: &AppConnection) -> Result<ConnectionClaim, StoreError>;

    /// Atomically retires any connection for the pair and stores `candidate` in its place.
    fn replace_connection(&self, candidate: &AppConnection) -> Result<AppConnection, StoreError>;

    /// Returns false if the account held no connection with that token.
    fn delete_connection(&self, account_id: AccountId, access_token: &str)
        -> Result<bool, StoreError>;

    /// Returns the number of connections removed.
    fn delete_connections_for_app(&self, app_id: Uuid) -> Result<usize, StoreError>;

    /// Connections held by `account_id`, oldest first.
    fn list_connections(&self, account_id: AccountId) -> Result<Vec<AppConnection>, StoreError>;

    /// True if a live or retired connection already holds `access_token`.
    fn access_token_taken(&self, access_token: &str) -> Result<bool, StoreError>;
}
