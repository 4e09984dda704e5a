//! Member-to-app connections and the access tokens that key them.

use crate::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod authorizer;


pub use authorizer::ConnectionAuthorizer;

/// An authorization grant from one member account to one app.
///
/// `access_token` is the only key a client presents on resource requests.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConnection {
    pub id: Uuid,
    pub app_id: Uuid,
    pub account_id: AccountId,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for AppConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConnection")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("account_id", &self.account_id)
            .field("access_token", &crate::credentials::redact(&self.access_token))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// What `connect` does when the member is already connected to the app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Hand back the existing connection and token unchanged.
    #[default]
    Reuse,
    /// Revoke the existing token and issue a new one.
    Rotate,
}

impl std::str::FromStr for ReconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(ReconnectPolicy::Reuse),
            "rotate" => Ok(ReconnectPolicy::Rotate),
            other => Err(format!(
                "Unknown reconnect policy '{}' (expected 'reuse' or 'rotate')",
                other
            )),
        }
    }
}
