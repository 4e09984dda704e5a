use super::*;
use crate::connection::{ConnectionAuthorizer, ReconnectPolicy};
use crate::credentials::{CredentialGenerator, CredentialKind};
use crate::store::{AppStore, SqliteStore, StoreError, UniqueKey};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

type StoreResult<T> = std::result::Result<T, StoreError>;

fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(":memory:", &BASE64.encode([0u8; 32])).unwrap())
}

fn registry(store: &Arc<SqliteStore>) -> AppRegistry {
    AppRegistry::new(store.clone(), store.clone(), CredentialGenerator::default())
}

fn form(name: &str) -> AppForm {
    AppForm {
        name: name.to_string(),
        description: "Syncs your reading list".to_string(),
        website: "https://example.com".to_string(),
        callback_url: String::new(),
    }
}

/// Makes the next `failures` app writes fail with a slug collision.
///
/// With `lose_delete_race` set, another request deletes the app just before
/// this store's own delete runs.
struct CollidingStore {
    inner: Arc<SqliteStore>,
    failures: AtomicU32,
    lose_delete_race: AtomicBool,
}

impl CollidingStore {
    fn new(inner: Arc<SqliteStore>, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            lose_delete_race: AtomicBool::new(false),
        }
    }

    fn collide(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl AppStore for CollidingStore {
    fn insert_app(&self, app: &App) -> StoreResult<()> {
        if self.collide() {
            return Err(StoreError::DuplicateKey(UniqueKey::Slug));
        }
        self.inner.insert_app(app)
    }

    fn update_app(&self, app: &App) -> StoreResult<bool> {
        if self.collide() {
            return Err(StoreError::DuplicateKey(UniqueKey::Slug));
        }
        self.inner.update_app(app)
    }

    fn delete_app(&self, app_id: Uuid) -> StoreResult<bool> {
        if self.lose_delete_race.load(Ordering::SeqCst) {
            self.inner.delete_app(app_id)?;
        }
        self.inner.delete_app(app_id)
    }

    fn get_app(&self, app_id: Uuid) -> StoreResult<Option<App>> {
        self.inner.get_app(app_id)
    }

    fn find_app_by_slug(&self, owner: AccountId, slug: &str) -> StoreResult<Option<App>> {
        self.inner.find_app_by_slug(owner, slug)
    }

    fn find_app_by_api_key(&self, api_key: &str) -> StoreResult<Option<App>> {
        self.inner.find_app_by_api_key(api_key)
    }

    fn list_apps(&self, owner: AccountId) -> StoreResult<Vec<App>> {
        self.inner.list_apps(owner)
    }

    fn slugs_with_base(&self, base: &str) -> StoreResult<Vec<String>> {
        self.inner.slugs_with_base(base)
    }

    fn credential_taken(&self, kind: CredentialKind, value: &str) -> StoreResult<bool> {
        self.inner.credential_taken(kind, value)
    }
}

#[test]
fn test_create_issues_distinct_credentials() {
    let store = store();
    let registry = registry(&store);

    let slug = registry.create(1, &form("My App")).unwrap();
    assert_eq!(slug, "my-app");

    let app = registry.get_by_slug(1, &slug).unwrap();
    assert_eq!(app.name, "My App");
    assert_eq!(app.owner_account_id, 1);
    assert!(!app.api_key.is_empty());
    assert!(!app.secret.is_empty());
    assert_ne!(app.api_key, app.secret);
    assert_eq!(app.website.as_deref(), Some("https://example.com"));
    assert_eq!(app.callback_url, None);
}

#[test]
fn test_same_name_gets_distinct_slugs() {
    let store = store();
    let registry = registry(&store);

    let first = registry.create(1, &form("My App")).unwrap();
    let second = registry.create(2, &form("My App")).unwrap();
    let third = registry.create(1, &form("my   app!")).unwrap();

    assert_eq!(first, "my-app");
    assert_eq!(second, "my-app-2");
    assert_eq!(third, "my-app-3");

    let a = registry.get_by_slug(1, &first).unwrap();
    let b = registry.get_by_slug(2, &second).unwrap();
    assert_ne!(a.api_key, b.api_key);
    assert_ne!(a.secret, b.secret);
}

#[test]
fn test_other_accounts_apps_are_not_found() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Private")).unwrap();

    assert!(matches!(registry.get_by_slug(2, &slug), Err(Error::NotFound)));
    assert!(matches!(registry.get_form(2, &slug), Err(Error::NotFound)));
    assert!(matches!(
        registry.update(2, &slug, &form("Hijacked")),
        Err(Error::NotFound)
    ));
    assert!(matches!(registry.delete(2, &slug), Err(Error::NotFound)));

    // Still intact for the owner
    assert_eq!(registry.get_by_slug(1, &slug).unwrap().name, "Private");
}

#[test]
fn test_list_summaries_scoped_and_ordered() {
    let store = store();
    let registry = registry(&store);
    registry.create(1, &form("Alpha")).unwrap();
    registry.create(2, &form("Other")).unwrap();
    registry.create(1, &form("Beta")).unwrap();

    let names: Vec<String> = registry
        .list_summaries(1)
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
    assert!(registry.list_summaries(3).unwrap().is_empty());
}

#[test]
fn test_create_rejects_invalid_form() {
    let store = store();
    let registry = registry(&store);

    let bad = AppForm {
        name: "   ".to_string(),
        description: String::new(),
        website: "ftp://example.com".to_string(),
        callback_url: "not a url".to_string(),
    };

    match registry.create(1, &bad) {
        Err(Error::ValidationFailed(errors)) => {
            let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
            assert_eq!(fields, vec!["name", "description", "website", "callbackUrl"]);
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(registry.list_summaries(1).unwrap().is_empty());
}

#[test]
fn test_validate_limits() {
    let mut long_name = form("x");
    long_name.name = "a".repeat(51);
    assert!(matches!(long_name.validate(), Err(Error::ValidationFailed(_))));

    let mut symbols_only = form("x");
    symbols_only.name = "!!!".to_string();
    assert!(matches!(symbols_only.validate(), Err(Error::ValidationFailed(_))));

    let mut long_description = form("x");
    long_description.description = "d".repeat(1001);
    assert!(matches!(long_description.validate(), Err(Error::ValidationFailed(_))));

    let mut ok = form("  Trimmed  ");
    ok.website = "  ".to_string();
    ok.callback_url = "http://localhost:3000/cb".to_string();
    let fields = ok.validate().unwrap();
    assert_eq!(fields.name, "Trimmed");
    assert_eq!(fields.website, None);
    assert_eq!(fields.callback_url.as_deref(), Some("http://localhost:3000/cb"));
}

#[test]
fn test_update_rename_changes_slug_keeps_credentials() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Old Name")).unwrap();
    let before = registry.get_by_slug(1, &slug).unwrap();

    let new_slug = registry.update(1, &slug, &form("New Name")).unwrap();
    assert_eq!(new_slug, "new-name");

    assert!(matches!(registry.get_by_slug(1, &slug), Err(Error::NotFound)));
    let after = registry.get_by_slug(1, &new_slug).unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.api_key, before.api_key);
    assert_eq!(after.secret, before.secret);
    assert_eq!(after.name, "New Name");
}

#[test]
fn test_update_without_rename_keeps_slug() {
    let store = store();
    let registry = registry(&store);
    registry.create(1, &form("Shared")).unwrap();
    let slug = registry.create(1, &form("Shared")).unwrap();
    assert_eq!(slug, "shared-2");

    let mut edited = form("Shared");
    edited.description = "Now with more sync".to_string();
    let kept = registry.update(1, &slug, &edited).unwrap();
    assert_eq!(kept, "shared-2");
    assert_eq!(
        registry.get_by_slug(1, &kept).unwrap().description,
        "Now with more sync"
    );
}

#[test]
fn test_update_rename_to_taken_base_disambiguates() {
    let store = store();
    let registry = registry(&store);
    registry.create(2, &form("Target")).unwrap();
    let slug = registry.create(1, &form("Mine")).unwrap();

    let renamed = registry.update(1, &slug, &form("Target")).unwrap();
    assert_eq!(renamed, "target-2");
}

#[test]
fn test_update_rejects_invalid_form() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Valid")).unwrap();

    let mut bad = form("Valid");
    bad.description = String::new();
    assert!(matches!(
        registry.update(1, &slug, &bad),
        Err(Error::ValidationFailed(_))
    ));
    assert_eq!(
        registry.get_by_slug(1, &slug).unwrap().description,
        "Syncs your reading list"
    );
}

#[test]
fn test_delete_revokes_connections() {
    let store = store();
    let registry = registry(&store);
    let authorizer = ConnectionAuthorizer::new(
        store.clone(),
        store.clone(),
        CredentialGenerator::default(),
        ReconnectPolicy::Reuse,
    );

    let slug = registry.create(1, &form("Doomed")).unwrap();
    let app = registry.get_by_slug(1, &slug).unwrap();
    let conn = authorizer.connect(7, &app.api_key).unwrap();

    registry.delete(1, &slug).unwrap();

    assert!(matches!(registry.get_by_slug(1, &slug), Err(Error::NotFound)));
    assert!(matches!(
        authorizer.find_by_access_token(&conn.access_token),
        Err(Error::NoSuchConnection)
    ));
    assert!(matches!(
        registry.find_by_api_key(&app.api_key),
        Err(Error::InvalidApiKey)
    ));
    assert!(authorizer.list_connections(7).unwrap().is_empty());
}

#[test]
fn test_deleted_credentials_are_never_reissued() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Gone")).unwrap();
    let app = registry.get_by_slug(1, &slug).unwrap();
    registry.delete(1, &slug).unwrap();

    assert!(store
        .credential_taken(CredentialKind::ApiKey, &app.api_key)
        .unwrap());
    assert!(store
        .credential_taken(CredentialKind::Secret, &app.secret)
        .unwrap());
}

#[test]
fn test_find_by_api_key() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Lookup")).unwrap();
    let app = registry.get_by_slug(1, &slug).unwrap();

    let found = registry.find_by_api_key(&app.api_key).unwrap();
    assert_eq!(found.id, app.id);

    let public = PublicApp::from(&found);
    assert_eq!(public.name, "Lookup");
    assert_eq!(public.slug, "lookup");

    assert!(matches!(
        registry.find_by_api_key("no-such-key"),
        Err(Error::InvalidApiKey)
    ));
}

#[test]
fn test_authenticate() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Client")).unwrap();
    let app = registry.get_by_slug(1, &slug).unwrap();

    assert_eq!(registry.authenticate(&app.api_key, &app.secret).unwrap().id, app.id);
    assert!(matches!(
        registry.authenticate(&app.api_key, "wrong-secret"),
        Err(Error::InvalidApiKey)
    ));
    assert!(matches!(
        registry.authenticate("unknown", &app.secret),
        Err(Error::InvalidApiKey)
    ));
}

#[test]
fn test_forms() {
    let store = store();
    let registry = registry(&store);

    assert_eq!(registry.get_new_form(1), AppForm::default());

    let mut submitted = form("Prefilled");
    submitted.callback_url = "https://example.com/oauth".to_string();
    let slug = registry.create(1, &submitted).unwrap();

    let prefilled = registry.get_form(1, &slug).unwrap();
    assert_eq!(prefilled, submitted);
    assert!(matches!(registry.get_form(1, "missing"), Err(Error::NotFound)));
}

#[test]
fn test_debug_redacts_credentials() {
    let store = store();
    let registry = registry(&store);
    let slug = registry.create(1, &form("Quiet")).unwrap();
    let app = registry.get_by_slug(1, &slug).unwrap();

    let debug = format!("{:?}", app);
    assert!(!debug.contains(&app.secret));
    assert!(!debug.contains(&app.api_key));
}

#[test]
fn test_create_retries_on_collision() {
    let inner = store();
    let apps = Arc::new(CollidingStore::new(inner.clone(), 2));
    let registry = AppRegistry::new(apps, inner.clone(), CredentialGenerator::new(3));

    let slug = registry.create(1, &form("Racy")).unwrap();
    assert_eq!(slug, "racy");
    assert_eq!(inner.list_apps(1).unwrap().len(), 1);
}

#[test]
fn test_create_gives_up_after_max_attempts() {
    let inner = store();
    let apps = Arc::new(CollidingStore::new(inner.clone(), 3));
    let registry = AppRegistry::new(apps, inner.clone(), CredentialGenerator::new(3));

    assert!(matches!(
        registry.create(1, &form("Unlucky")),
        Err(Error::Store(StoreError::DuplicateKey(UniqueKey::Slug)))
    ));
    assert!(inner.list_apps(1).unwrap().is_empty());
}

#[test]
fn test_update_retries_on_collision() {
    let inner = store();
    let slug = registry(&inner).create(1, &form("Before")).unwrap();

    let apps = Arc::new(CollidingStore::new(inner.clone(), 1));
    let registry = AppRegistry::new(apps, inner.clone(), CredentialGenerator::new(3));

    let renamed = registry.update(1, &slug, &form("After")).unwrap();
    assert_eq!(renamed, "after");
}

#[test]
fn test_delete_reports_app_removed_concurrently() {
    let inner = store();
    let slug = registry(&inner).create(1, &form("Contested")).unwrap();

    let apps = Arc::new(CollidingStore::new(inner.clone(), 0));
    apps.lose_delete_race.store(true, Ordering::SeqCst);
    let registry = AppRegistry::new(apps, inner.clone(), CredentialGenerator::default());

    assert!(matches!(registry.delete(1, &slug), Err(Error::NotFound)));
    assert!(inner.list_apps(1).unwrap().is_empty());
}
