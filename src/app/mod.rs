//! Registered client apps and the forms developers edit them through.

use crate::error::{Error, FieldError, Result};
use crate::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod registry;
pub mod slug;

#[cfg(test)]
mod tests;

pub use registry::AppRegistry;
pub(crate) use registry::find_app_by_api_key;

const MAX_NAME_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_URL_LEN: usize = 255;

/// A registered client application.
///
/// `api_key` and `secret` are issued once at registration and never change.
/// `slug` only changes as a side effect of renaming.
#[derive(Clone, PartialEq)]
pub struct App {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub website: Option<String>,
    pub callback_url: Option<String>,
    pub api_key: String,
    pub secret: String,
    pub owner_account_id: AccountId,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("id", &self.id)
            .field("slug", &self.slug)
            .field("name", &self.name)
            .field("api_key", &crate::credentials::redact(&self.api_key))
            .field("owner_account_id", &self.owner_account_id)
            .finish_non_exhaustive()
    }
}

/// Listing projection of an app.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppSummary {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

impl From<&App> for AppSummary {
    fn from(app: &App) -> Self {
        Self {
            id: app.id,
            slug: app.slug.clone(),
            name: app.name.clone(),
        }
    }
}

/// What a member is shown when a client presents its api key for authorization.
///
/// Carries no credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicApp {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub website: Option<String>,
}

impl From<&App> for PublicApp {
    fn from(app: &App) -> Self {
        Self {
            slug: app.slug.clone(),
            name: app.name.clone(),
            description: app.description.clone(),
            website: app.website.clone(),
        }
    }
}

/// Mutable app fields as submitted by a developer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppForm {
    pub name: String,
    pub description: String,
    pub website: String,
    pub callback_url: String,
}

impl AppForm {
    /// Pre-fills a form from an existing app.
    pub fn from_app(app: &App) -> Self {
        Self {
            name: app.name.clone(),
            description: app.description.clone(),
            website: app.website.clone().unwrap_or_default(),
            callback_url: app.callback_url.clone().unwrap_or_default(),
        }
    }

    /// Checks every field, reporting all failures at once.
    pub fn validate(&self) -> Result<AppFields> {
        let mut errors = Vec::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(FieldError::new(
                "name",
                format!("Name must be at most {} characters", MAX_NAME_LEN),
            ));
        } else if !name.chars().any(char::is_alphanumeric) {
            errors.push(FieldError::new(
                "name",
                "Name must contain at least one letter or digit",
            ));
        }

        let description = self.description.trim();
        if description.is_empty() {
            errors.push(FieldError::new("description", "Description is required"));
        } else if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(FieldError::new(
                "description",
                format!("Description must be at most {} characters", MAX_DESCRIPTION_LEN),
            ));
        }

        let website = optional_url("website", &self.website, &mut errors);
        let callback_url = optional_url("callbackUrl", &self.callback_url, &mut errors);

        if !errors.is_empty() {
            return Err(Error::ValidationFailed(errors));
        }

        Ok(AppFields {
            name: name.to_string(),
            description: description.to_string(),
            website,
            callback_url,
        })
    }
}

/// A validated, normalized form.
#[derive(Debug, Clone, PartialEq)]
pub struct AppFields {
    pub name: String,
    pub description: String,
    pub website: Option<String>,
    pub callback_url: Option<String>,
}

/// Blank is absent; anything else must be an absolute http(s) URL.
fn optional_url(
    field: &'static str,
    value: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.len() > MAX_URL_LEN {
        errors.push(FieldError::new(
            field,
            format!("URL must be at most {} characters", MAX_URL_LEN),
        ));
        return None;
    }

    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') && !host.contains(char::is_whitespace) => {
            Some(value.to_string())
        }
        _ => {
            errors.push(FieldError::new(
                field,
                "Must be an absolute http:// or https:// URL",
            ));
            None
        }
    }
}
