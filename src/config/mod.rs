use crate::connection::ReconnectPolicy;
use crate::credentials::DEFAULT_MAX_ATTEMPTS;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Complete appconnect configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConnectConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// SQLite store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How long a write waits on a locked database before failing as retryable
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("appconnect.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Credential issuance configuration
#[derive(Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Draws per credential before generation gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base64-encoded 32-byte key sealing app secrets at rest
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            encryption_key: None,
        }
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("max_attempts", &self.max_attempts)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Connection issuance configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default)]
    pub reconnect_policy: ReconnectPolicy,
}

impl AppConnectConfig {
    /// Overlay `APPCONNECT_*` environment variables onto this config.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay variables from `lookup`, ignoring (with a warning) values that do not parse.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("APPCONNECT_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("APPCONNECT_DB_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("APPCONNECT_ENCRYPTION_KEY") {
            self.credentials.encryption_key = Some(v);
        }
        if let Some(v) = lookup("APPCONNECT_MAX_CREDENTIAL_ATTEMPTS") {
            match v.parse::<u32>() {
                Ok(n) => self.credentials.max_attempts = n,
                Err(_) => warn!(value = %v, "Ignoring invalid APPCONNECT_MAX_CREDENTIAL_ATTEMPTS"),
            }
        }
        if let Some(v) = lookup("APPCONNECT_RECONNECT_POLICY") {
            match v.parse::<ReconnectPolicy>() {
                Ok(policy) => self.connections.reconnect_policy = policy,
                Err(e) => warn!(error = %e, "Ignoring invalid APPCONNECT_RECONNECT_POLICY"),
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConnectConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConnectConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.store.path, PathBuf::from("appconnect.db"));
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert_eq!(config.credentials.max_attempts, 5);
        assert!(config.credentials.encryption_key.is_none());
        assert_eq!(config.connections.reconnect_policy, ReconnectPolicy::Reuse);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:9000"

            [store]
            path = "/var/lib/appconnect/apps.db"
            busy_timeout_ms = 250

            [credentials]
            max_attempts = 8
            encryption_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

            [connections]
            reconnect_policy = "rotate"
        "#;

        let config: AppConnectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.store.path, PathBuf::from("/var/lib/appconnect/apps.db"));
        assert_eq!(config.store.busy_timeout_ms, 250);
        assert_eq!(config.credentials.max_attempts, 8);
        assert!(config.credentials.encryption_key.is_some());
        assert_eq!(config.connections.reconnect_policy, ReconnectPolicy::Rotate);
    }

    #[test]
    fn test_partial_config() {
        // Missing sections fall back to defaults
        let toml = r#"
            [credentials]
            max_attempts = 3
        "#;

        let config: AppConnectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.credentials.max_attempts, 3);
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.connections.reconnect_policy, ReconnectPolicy::Reuse);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let toml = r#"
            [connections]
            reconnect_policy = "sometimes"
        "#;
        assert!(toml::from_str::<AppConnectConfig>(toml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("APPCONNECT_BIND_ADDR", "127.0.0.1:7000"),
            ("APPCONNECT_DB_PATH", "/tmp/apps.db"),
            ("APPCONNECT_ENCRYPTION_KEY", "a2V5"),
            ("APPCONNECT_MAX_CREDENTIAL_ATTEMPTS", "2"),
            ("APPCONNECT_RECONNECT_POLICY", "Rotate"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConnectConfig::default();
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.bind_addr, "127.0.0.1:7000");
        assert_eq!(config.store.path, PathBuf::from("/tmp/apps.db"));
        assert_eq!(config.credentials.encryption_key.as_deref(), Some("a2V5"));
        assert_eq!(config.credentials.max_attempts, 2);
        assert_eq!(config.connections.reconnect_policy, ReconnectPolicy::Rotate);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = AppConnectConfig::default();
        config.apply_env_from(|name| match name {
            "APPCONNECT_MAX_CREDENTIAL_ATTEMPTS" => Some("many".to_string()),
            "APPCONNECT_RECONNECT_POLICY" => Some("sometimes".to_string()),
            _ => None,
        });

        assert_eq!(config.credentials.max_attempts, 5);
        assert_eq!(config.connections.reconnect_policy, ReconnectPolicy::Reuse);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appconnect.toml");
        std::fs::write(&path, "[server]\nbind_addr = \"127.0.0.1:1234\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:1234");

        assert!(load_config(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_debug_redacts_encryption_key() {
        let mut config = AppConnectConfig::default();
        config.credentials.encryption_key = Some("super-secret-key".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("<redacted>"));
    }
}
