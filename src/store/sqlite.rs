//! App and connection persistence using SQLite.
//!
//! One connection, guarded by a mutex, backs both store traits so that the
//! cascade from apps to their connections and the retired-credential ledger
//! live in the same database. Every multi-statement write runs inside an
//! IMMEDIATE transaction.
//!
//! # Schema
//! ```sql
//! apps (id PK, slug UNIQUE, name, description, website, callback_url,
//!       api_key UNIQUE, secret, secret_nonce, secret_digest UNIQUE,
//!       owner_account_id, created_at)
//! app_connections (id PK, app_id -> apps(id) ON DELETE CASCADE, account_id,
//!                  access_token UNIQUE, created_at, UNIQUE(app_id, account_id))
//! retired_credentials (kind, value, retired_at, PK(kind, value))
//! ```
//!
//! Secrets are sealed with AES-256-GCM before they are written; only their
//! SHA-256 digest is stored in the clear, under the unique index. Triggers
//! copy every deleted api key, secret digest and access token into
//! `retired_credentials`, so a revoked credential is never handed out again.

use super::{AppStore, ConnectionClaim, ConnectionStore, StoreError, UniqueKey};
use crate::app::App;
use crate::connection::AppConnection;
use crate::credentials::{secret_digest, CredentialKind, SealedSecret, SecretCipher};
use crate::AccountId;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Busy timeout applied when the store is opened.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS apps (
    id               TEXT PRIMARY KEY,
    slug             TEXT UNIQUE NOT NULL,
    name             TEXT NOT NULL,
    description      TEXT NOT NULL,
    website          TEXT,
    callback_url     TEXT,
    api_key          TEXT UNIQUE NOT NULL,
    secret           TEXT NOT NULL,
    secret_nonce     TEXT NOT NULL,
    secret_digest    TEXT UNIQUE NOT NULL,
    owner_account_id INTEGER NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_apps_owner ON apps(owner_account_id);

CREATE TABLE IF NOT EXISTS app_connections (
    id           TEXT PRIMARY KEY,
    app_id       TEXT NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
    account_id   INTEGER NOT NULL,
    access_token TEXT UNIQUE NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(app_id, account_id)
);

CREATE INDEX IF NOT EXISTS idx_app_connections_account ON app_connections(account_id);

CREATE TABLE IF NOT EXISTS retired_credentials (
    kind       TEXT NOT NULL,
    value      TEXT NOT NULL,
    retired_at TEXT NOT NULL,
    PRIMARY KEY (kind, value)
);

CREATE TRIGGER IF NOT EXISTS retire_app_credentials
AFTER DELETE ON apps
BEGIN
    INSERT OR IGNORE INTO retired_credentials (kind, value, retired_at)
    VALUES ('api_key', OLD.api_key, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
           ('secret', OLD.secret_digest, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS retire_access_token
AFTER DELETE ON app_connections
BEGIN
    INSERT OR IGNORE INTO retired_credentials (kind, value, retired_at)
    VALUES ('access_token', OLD.access_token, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;
"#;

const APP_COLUMNS: &str = "id, slug, name, description, website, callback_url, api_key, \
                           secret, secret_nonce, owner_account_id, created_at";

const CONNECTION_COLUMNS: &str = "id, app_id, account_id, access_token, created_at";

/// SQLite-backed [`AppStore`] and [`ConnectionStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    cipher: SecretCipher,
}

impl SqliteStore {
    /// Opens (or creates) the database and ensures the schema exists.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite file, or `:memory:`
    /// * `encryption_key` - Base64-encoded 32-byte key sealing app secrets
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> anyhow::Result<Self> {
        let cipher = SecretCipher::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path.as_ref()).with_context(|| {
            format!("Failed to open database at {}", db_path.as_ref().display())
        })?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create app tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Overrides how long a write waits on a locked database before failing with `Busy`.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        self.conn()?.busy_timeout(timeout)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn decode_app(&self, row: AppRow) -> Result<App, StoreError> {
        let secret = self
            .cipher
            .open(&row.sealed)
            .with_context(|| format!("Failed to open secret of app {}", row.id))
            .map_err(StoreError::Corrupt)?;

        Ok(App {
            id: parse_uuid(&row.id)?,
            slug: row.slug,
            name: row.name,
            description: row.description,
            website: row.website,
            callback_url: row.callback_url,
            api_key: row.api_key,
            secret,
            owner_account_id: row.owner_account_id,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }

    fn query_app(&self, filter: &str, params: impl rusqlite::Params) -> Result<Option<App>, StoreError> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {} FROM apps WHERE {}", APP_COLUMNS, filter),
                params,
                AppRow::from_row,
            )
            .optional()?
        };
        row.map(|row| self.decode_app(row)).transpose()
    }

    fn query_connection(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<AppConnection>, StoreError> {
        let conn = self.conn()?;
        select_connection(&conn, filter, params)
    }
}

/// Raw `apps` row; the secret is still sealed.
struct AppRow {
    id: String,
    slug: String,
    name: String,
    description: String,
    website: Option<String>,
    callback_url: Option<String>,
    api_key: String,
    sealed: SealedSecret,
    owner_account_id: AccountId,
    created_at: String,
}

impl AppRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            website: row.get(4)?,
            callback_url: row.get(5)?,
            api_key: row.get(6)?,
            sealed: SealedSecret {
                ciphertext: row.get(7)?,
                nonce: row.get(8)?,
            },
            owner_account_id: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, AccountId, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_connection(
    (id, app_id, account_id, access_token, created_at): (String, String, AccountId, String, String),
) -> Result<AppConnection, StoreError> {
    Ok(AppConnection {
        id: parse_uuid(&id)?,
        app_id: parse_uuid(&app_id)?,
        account_id,
        access_token,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn select_connection(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<AppConnection>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM app_connections WHERE {}", CONNECTION_COLUMNS, filter),
        params,
        connection_from_row,
    )
    .optional()?
    .map(decode_connection)
    .transpose()
}

fn insert_connection(conn: &Connection, candidate: &AppConnection) -> Result<(), StoreError> {
    ensure_not_retired(conn, CredentialKind::AccessToken, &candidate.access_token)?;
    conn.execute(
        "INSERT INTO app_connections (id, app_id, account_id, access_token, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            candidate.id.to_string(),
            candidate.app_id.to_string(),
            candidate.account_id,
            candidate.access_token,
            candidate.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Live or retired holder of a credential value.
///
/// `value` is the stored form: the digest for secrets, the raw value otherwise.
fn credential_exists(conn: &Connection, kind: CredentialKind, value: &str) -> Result<bool, StoreError> {
    let live = match kind {
        CredentialKind::ApiKey => "SELECT EXISTS(SELECT 1 FROM apps WHERE api_key = ?1)",
        CredentialKind::Secret => "SELECT EXISTS(SELECT 1 FROM apps WHERE secret_digest = ?1)",
        CredentialKind::AccessToken => {
            "SELECT EXISTS(SELECT 1 FROM app_connections WHERE access_token = ?1)"
        }
    };
    if conn.query_row(live, params![value], |row| row.get::<_, bool>(0))? {
        return Ok(true);
    }
    Ok(is_retired(conn, kind, value)?)
}

fn is_retired(conn: &Connection, kind: CredentialKind, value: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM retired_credentials WHERE kind = ?1 AND value = ?2)",
        params![kind.as_str(), value],
        |row| row.get(0),
    )
}

fn ensure_not_retired(conn: &Connection, kind: CredentialKind, value: &str) -> Result<(), StoreError> {
    if is_retired(conn, kind, value)? {
        return Err(StoreError::DuplicateKey(UniqueKey::from(kind)));
    }
    Ok(())
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value)
        .map_err(|e| StoreError::Corrupt(anyhow!("Invalid id '{}': {}", value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(anyhow!("Invalid timestamp '{}': {}", value, e)))
}

impl AppStore for SqliteStore {
    fn insert_app(&self, app: &App) -> Result<(), StoreError> {
        let sealed = self
            .cipher
            .seal(&app.secret)
            .context("Failed to seal app secret")
            .map_err(StoreError::Corrupt)?;
        let digest = secret_digest(&app.secret);

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        ensure_not_retired(&tx, CredentialKind::ApiKey, &app.api_key)?;
        ensure_not_retired(&tx, CredentialKind::Secret, &digest)?;

        tx.execute(
            "INSERT INTO apps (
                id, slug, name, description, website, callback_url,
                api_key, secret, secret_nonce, secret_digest,
                owner_account_id, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                app.id.to_string(),
                app.slug,
                app.name,
                app.description,
                app.website,
                app.callback_url,
                app.api_key,
                sealed.ciphertext,
                sealed.nonce,
                digest,
                app.owner_account_id,
                app.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn update_app(&self, app: &App) -> Result<bool, StoreError> {
        let rows = self.conn()?.execute(
            "UPDATE apps
             SET slug = ?1, name = ?2, description = ?3, website = ?4, callback_url = ?5
             WHERE id = ?6",
            params![
                app.slug,
                app.name,
                app.description,
                app.website,
                app.callback_url,
                app.id.to_string(),
            ],
        )?;
        Ok(rows > 0)
    }

    fn delete_app(&self, app_id: Uuid) -> Result<bool, StoreError> {
        let rows = self
            .conn()?
            .execute("DELETE FROM apps WHERE id = ?1", params![app_id.to_string()])?;
        Ok(rows > 0)
    }

    fn get_app(&self, app_id: Uuid) -> Result<Option<App>, StoreError> {
        self.query_app("id = ?1", params![app_id.to_string()])
    }

    fn find_app_by_slug(&self, owner: AccountId, slug: &str) -> Result<Option<App>, StoreError> {
        self.query_app("slug = ?1 AND owner_account_id = ?2", params![slug, owner])
    }

    fn find_app_by_api_key(&self, api_key: &str) -> Result<Option<App>, StoreError> {
        self.query_app("api_key = ?1", params![api_key])
    }

    fn list_apps(&self, owner: AccountId) -> Result<Vec<App>, StoreError> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM apps WHERE owner_account_id = ?1 ORDER BY rowid",
                APP_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![owner], AppRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(|row| self.decode_app(row)).collect()
    }

    fn slugs_with_base(&self, base: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}-", base);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT slug FROM apps WHERE slug = ?1 OR substr(slug, 1, ?2) = ?3",
        )?;
        let slugs = stmt
            .query_map(params![base, prefix.len() as i64, prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(slugs)
    }

    fn credential_taken(&self, kind: CredentialKind, value: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        match kind {
            CredentialKind::Secret => credential_exists(&conn, kind, &secret_digest(value)),
            _ => credential_exists(&conn, kind, value),
        }
    }
}

impl ConnectionStore for SqliteStore {
    fn get_connection(&self, id: Uuid) -> Result<Option<AppConnection>, StoreError> {
        self.query_connection("id = ?1", params![id.to_string()])
    }

    fn find_connection(&self, access_token: &str) -> Result<Option<AppConnection>, StoreError> {
        self.query_connection("access_token = ?1", params![access_token])
    }

    fn find_connection_for(
        &self,
        app_id: Uuid,
        account_id: AccountId,
    ) -> Result<Option<AppConnection>, StoreError> {
        self.query_connection(
            "app_id = ?1 AND account_id = ?2",
            params![app_id.to_string(), account_id],
        )
    }

    fn claim_connection(&self, candidate: &AppConnection) -> Result<ConnectionClaim, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = select_connection(
            &tx,
            "app_id = ?1 AND account_id = ?2",
            params![candidate.app_id.to_string(), candidate.account_id],
        )? {
            return Ok(ConnectionClaim::Existing(existing));
        }

        insert_connection(&tx, candidate)?;
        tx.commit()?;
        Ok(ConnectionClaim::Inserted(candidate.clone()))
    }

    fn replace_connection(&self, candidate: &AppConnection) -> Result<AppConnection, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Fires the retirement trigger for the old token
        tx.execute(
            "DELETE FROM app_connections WHERE app_id = ?1 AND account_id = ?2",
            params![candidate.app_id.to_string(), candidate.account_id],
        )?;
        insert_connection(&tx, candidate)?;

        tx.commit()?;
        Ok(candidate.clone())
    }

    fn delete_connection(
        &self,
        account_id: AccountId,
        access_token: &str,
    ) -> Result<bool, StoreError> {
        let rows = self.conn()?.execute(
            "DELETE FROM app_connections WHERE access_token = ?1 AND account_id = ?2",
            params![access_token, account_id],
        )?;
        Ok(rows > 0)
    }

    fn delete_connections_for_app(&self, app_id: Uuid) -> Result<usize, StoreError> {
        let rows = self.conn()?.execute(
            "DELETE FROM app_connections WHERE app_id = ?1",
            params![app_id.to_string()],
        )?;
        Ok(rows)
    }

    fn list_connections(&self, account_id: AccountId) -> Result<Vec<AppConnection>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM app_connections WHERE account_id = ?1 ORDER BY rowid",
            CONNECTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![account_id], connection_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_connection).collect()
    }

    fn access_token_taken(&self, access_token: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        credential_exists(&conn, CredentialKind::AccessToken, access_token)
    }
}
