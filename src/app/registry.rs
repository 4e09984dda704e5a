use super::slug::{disambiguate, slugify};
use super::{App, AppForm, AppSummary};
use crate::credentials::{redact, secret_digest, CredentialGenerator, CredentialKind};
use crate::error::{Error, Result};
use crate::store::{AppStore, ConnectionStore, StoreError};
use crate::AccountId;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registration, lookup, editing and deletion of apps.
///
/// Every developer-facing operation is scoped to the owning account: an app
/// owned by someone else is reported as `NotFound`, exactly like a missing one.
pub struct AppRegistry {
    apps: Arc<dyn AppStore>,
    connections: Arc<dyn ConnectionStore>,
    generator: CredentialGenerator,
}

impl AppRegistry {
    pub fn new(
        apps: Arc<dyn AppStore>,
        connections: Arc<dyn ConnectionStore>,
        generator: CredentialGenerator,
    ) -> Self {
        Self {
            apps,
            connections,
            generator,
        }
    }

    /// Summaries of every app the account owns, in registration order.
    pub fn list_summaries(&self, account_id: AccountId) -> Result<Vec<AppSummary>> {
        let apps = self.apps.list_apps(account_id)?;
        Ok(apps.iter().map(AppSummary::from).collect())
    }

    pub fn get_by_slug(&self, account_id: AccountId, slug: &str) -> Result<App> {
        self.apps
            .find_app_by_slug(account_id, slug)?
            .ok_or(Error::NotFound)
    }

    /// A blank registration form.
    pub fn get_new_form(&self, account_id: AccountId) -> AppForm {
        debug!(account_id, "New app form requested");
        AppForm::default()
    }

    /// A form pre-filled with the app's current metadata.
    pub fn get_form(&self, account_id: AccountId, slug: &str) -> Result<AppForm> {
        let app = self.get_by_slug(account_id, slug)?;
        Ok(AppForm::from_app(&app))
    }

    /// Registers a new app owned by `account_id` and returns its slug.
    ///
    /// The slug is derived from the name; the api key and secret are minted
    /// here. A racing registration that takes the same slug or credential
    /// makes the insert fail, and the whole derivation is retried.
    pub fn create(&self, account_id: AccountId, form: &AppForm) -> Result<String> {
        let fields = form.validate()?;
        let base = slugify(&fields.name);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let taken = self.apps.slugs_with_base(&base)?;
            let slug = disambiguate(&base, &taken, None);
            let api_key = self
                .generator
                .new_api_key(|key| self.apps.credential_taken(CredentialKind::ApiKey, key))?;
            let secret = self
                .generator
                .new_secret(|secret| self.apps.credential_taken(CredentialKind::Secret, secret))?;

            let app = App {
                id: Uuid::now_v7(),
                slug,
                name: fields.name.clone(),
                description: fields.description.clone(),
                website: fields.website.clone(),
                callback_url: fields.callback_url.clone(),
                api_key,
                secret,
                owner_account_id: account_id,
                created_at: Utc::now(),
            };

            match self.apps.insert_app(&app) {
                Ok(()) => {
                    info!(
                        account_id,
                        app_id = %app.id,
                        slug = %app.slug,
                        api_key = %redact(&app.api_key),
                        "App registered"
                    );
                    return Ok(app.slug);
                }
                Err(StoreError::DuplicateKey(key)) if attempt < self.generator.max_attempts() => {
                    warn!(account_id, %key, attempt, "App registration collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Applies the form to the app and returns its (possibly new) slug.
    ///
    /// Renaming re-derives the slug; the old slug stops resolving. The api
    /// key and secret are never touched.
    pub fn update(&self, account_id: AccountId, slug: &str, form: &AppForm) -> Result<String> {
        let mut app = self.get_by_slug(account_id, slug)?;
        let fields = form.validate()?;
        let renamed = fields.name != app.name;

        app.name = fields.name;
        app.description = fields.description;
        app.website = fields.website;
        app.callback_url = fields.callback_url;

        let mut attempt = 0;
        loop {
            attempt += 1;

            if renamed {
                let base = slugify(&app.name);
                app.slug = if base == slug {
                    slug.to_string()
                } else {
                    let taken = self.apps.slugs_with_base(&base)?;
                    disambiguate(&base, &taken, Some(slug))
                };
            }

            match self.apps.update_app(&app) {
                Ok(true) => {
                    if app.slug != slug {
                        info!(account_id, app_id = %app.id, old_slug = %slug, new_slug = %app.slug, "App renamed");
                    } else {
                        info!(account_id, app_id = %app.id, slug = %app.slug, "App updated");
                    }
                    return Ok(app.slug);
                }
                // Deleted between lookup and write
                Ok(false) => return Err(Error::NotFound),
                Err(StoreError::DuplicateKey(key)) if attempt < self.generator.max_attempts() => {
                    warn!(account_id, %key, attempt, "App rename collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Deletes the app and revokes every connection to it.
    pub fn delete(&self, account_id: AccountId, slug: &str) -> Result<()> {
        let app = self.get_by_slug(account_id, slug)?;

        let revoked = self.connections.delete_connections_for_app(app.id)?;
        // Connections racing in after the sweep go with the app's cascade
        if !self.apps.delete_app(app.id)? {
            debug!(account_id, app_id = %app.id, "App deleted concurrently");
            return Err(Error::NotFound);
        }

        info!(account_id, app_id = %app.id, slug = %app.slug, revoked, "App deleted");
        Ok(())
    }

    /// Resolves the app a client identifies itself with. No ownership check.
    pub fn find_by_api_key(&self, api_key: &str) -> Result<App> {
        find_app_by_api_key(self.apps.as_ref(), api_key)
    }

    /// Verifies an api key and secret pair.
    ///
    /// An unknown key and a wrong secret fail the same way.
    pub fn authenticate(&self, api_key: &str, secret: &str) -> Result<App> {
        let app = self.find_by_api_key(api_key)?;
        if secret_digest(secret) != secret_digest(&app.secret) {
            debug!(api_key = %redact(api_key), "App secret mismatch");
            return Err(Error::InvalidApiKey);
        }
        Ok(app)
    }
}

pub(crate) fn find_app_by_api_key(apps: &dyn AppStore, api_key: &str) -> Result<App> {
    apps.find_app_by_api_key(api_key)?.ok_or_else(|| {
        debug!(api_key = %redact(api_key), "Unknown api key presented");
        Error::InvalidApiKey
    })
}
