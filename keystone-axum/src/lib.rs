//! keystone-axum: HTTP surface for upload staging and gallery editing.
//!
//! Exposes the staging protocol of `keystone-staging` (open a session,
//! upload, commit, clean up) and the gallery entries that reference the
//! uploaded files.

pub mod app;
pub mod config;
mod error;
pub mod routes;
pub mod state;

pub use app::KeystoneApp;
pub use config::{ServerConfig, StorageBackend};
pub use error::{ApiAxumError, ApiError, ErrorKind};
pub use state::{AppState, SessionRegistry, SharedSession};

/// Build the application from configuration
pub async fn build(config: ServerConfig) -> anyhow::Result<KeystoneApp> {
    let state = AppState::from_config(config).await?;
    Ok(KeystoneApp::new(state))
}
