use anyhow::{Context, Result};
use appconnect::api::{create_router, ApiState};
use appconnect::app::AppRegistry;
use appconnect::config::{load_config, AppConnectConfig};
use appconnect::connection::ConnectionAuthorizer;
use appconnect::credentials::CredentialGenerator;
use appconnect::store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appconnect=info,tower_http=info".into()),
        )
        .init();

    info!("appconnect starting...");

    let mut config = match std::env::var("APPCONNECT_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration file");
            load_config(&path)?
        }
        Err(_) => AppConnectConfig::default(),
    };
    config.apply_env();
    info!(?config, "Configuration loaded");

    let encryption_key = config
        .credentials
        .encryption_key
        .as_deref()
        .context("No encryption key configured (set APPCONNECT_ENCRYPTION_KEY)")?;

    let store = Arc::new(SqliteStore::new(&config.store.path, encryption_key)?);
    store
        .set_busy_timeout(Duration::from_millis(config.store.busy_timeout_ms))
        .context("Failed to set store busy timeout")?;
    info!(path = %config.store.path.display(), "Store opened");

    let generator = CredentialGenerator::new(config.credentials.max_attempts);
    let registry = Arc::new(AppRegistry::new(
        store.clone(),
        store.clone(),
        generator.clone(),
    ));
    let authorizer = Arc::new(ConnectionAuthorizer::new(
        store.clone(),
        store,
        generator,
        config.connections.reconnect_policy,
    ));

    let app = create_router(ApiState {
        registry,
        authorizer,
    })
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(
        addr = %config.server.bind_addr,
        policy = ?config.connections.reconnect_policy,
        "HTTP server listening"
    );

    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
