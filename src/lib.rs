// Member account identifiers, owned by the surrounding platform
pub type AccountId = i64;

// Error kinds returned by every public operation
pub mod error;

// Credential generation and secret encryption
pub mod credentials;

// App registration, slugs and forms
pub mod app;

// Member-to-app connections and access tokens
pub mod connection;

// SQLite-backed app and connection storage
pub mod store;

// Credential header extraction
pub mod auth;

// HTTP API
pub mod api;

// Configuration loading
pub mod config;

pub use error::{Error, FieldError, Result};
