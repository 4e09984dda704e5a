use super::{AppConnection, ReconnectPolicy};
use crate::app::find_app_by_api_key;
use crate::credentials::{redact, CredentialGenerator};
use crate::error::{Error, Result};
use crate::store::{AppStore, ConnectionClaim, ConnectionStore, StoreError};
use crate::AccountId;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Issues, resolves and revokes app connections.
pub struct ConnectionAuthorizer {
    apps: Arc<dyn AppStore>,
    connections: Arc<dyn ConnectionStore>,
    generator: CredentialGenerator,
    policy: ReconnectPolicy,
}

impl ConnectionAuthorizer {
    pub fn new(
        apps: Arc<dyn AppStore>,
        connections: Arc<dyn ConnectionStore>,
        generator: CredentialGenerator,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            apps,
            connections,
            generator,
            policy,
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Connects the member to the app holding `api_key`.
    ///
    /// Called only after the member has approved. Under
    /// [`ReconnectPolicy::Reuse`] an existing connection is returned with its
    /// token unchanged, and concurrent approvals for the same pair all see
    /// the one connection the store accepted.
    pub fn connect(&self, account_id: AccountId, api_key: &str) -> Result<AppConnection> {
        let app = find_app_by_api_key(self.apps.as_ref(), api_key)?;

        if self.policy == ReconnectPolicy::Reuse {
            if let Some(existing) = self.connections.find_connection_for(app.id, account_id)? {
                debug!(account_id, app_id = %app.id, "Reusing existing connection");
                return Ok(existing);
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let access_token = self
                .generator
                .new_access_token(|token| self.connections.access_token_taken(token))?;
            let candidate = AppConnection {
                id: Uuid::now_v7(),
                app_id: app.id,
                account_id,
                access_token,
                created_at: Utc::now(),
            };

            let stored = match self.policy {
                ReconnectPolicy::Reuse => self.connections.claim_connection(&candidate),
                ReconnectPolicy::Rotate => self
                    .connections
                    .replace_connection(&candidate)
                    .map(ConnectionClaim::Inserted),
            };

            match stored {
                Ok(ConnectionClaim::Inserted(conn)) => {
                    info!(
                        account_id,
                        app_id = %app.id,
                        access_token = %redact(&conn.access_token),
                        policy = ?self.policy,
                        "Connection issued"
                    );
                    return Ok(conn);
                }
                Ok(ConnectionClaim::Existing(conn)) => {
                    debug!(account_id, app_id = %app.id, "Concurrent approval won, reusing its connection");
                    return Ok(conn);
                }
                Err(StoreError::DuplicateKey(key)) if attempt < self.generator.max_attempts() => {
                    warn!(account_id, app_id = %app.id, %key, attempt, "Connection insert collided, retrying");
                }
                Err(StoreError::MissingApp) => {
                    debug!(account_id, app_id = %app.id, "App deleted while connecting");
                    return Err(Error::InvalidApiKey);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolves the connection behind a client-presented access token.
    pub fn find_by_access_token(&self, access_token: &str) -> Result<AppConnection> {
        self.connections
            .find_connection(access_token)?
            .ok_or(Error::NoSuchConnection)
    }

    /// Revokes the member's connection holding `access_token`.
    ///
    /// Succeeds whether or not such a connection exists. A revoked token is
    /// retired for good.
    pub fn disconnect(&self, account_id: AccountId, access_token: &str) -> Result<()> {
        if self.connections.delete_connection(account_id, access_token)? {
            info!(account_id, access_token = %redact(access_token), "Connection revoked");
        } else {
            debug!(account_id, "Disconnect for unknown connection ignored");
        }
        Ok(())
    }

    /// The member's active connections, oldest first.
    pub fn list_connections(&self, account_id: AccountId) -> Result<Vec<AppConnection>> {
        Ok(self.connections.list_connections(account_id)?)
    }
}
