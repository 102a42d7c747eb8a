//! # Server configuration
//!
//! A flat string key/value store, read once at startup:
//!
//! ```rust
//! use keystone_axum::ServerConfig;
//!
//! let mut config = ServerConfig::defaults();
//! config.set("uploads.max_files", "5");
//!
//! assert_eq!(config.get_usize("uploads.max_files"), Some(5));
//! assert_eq!(config.get("http.port"), Some("3040"));
//! ```
//!
//! ## Environment overrides
//!
//! Variables starting with `KEYSTONE__` override keys, `__` separating the
//! sections:
//!
//! ```bash
//! export KEYSTONE__UPLOADS__MAX_FILE_BYTES=5242880   # uploads.max_file_bytes
//! export KEYSTONE__STORAGE__BACKEND=s3               # storage.backend
//! ```

use std::collections::HashMap;

use keystone_staging::{StagingConfig, UploadConstraints};

pub const ENV_PREFIX: &str = "KEYSTONE__";

/// Where staged files are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    S3,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    values: HashMap<String, String>,
}

impl ServerConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults for every key the server reads
    pub fn defaults() -> Self {
        let mut config = Self::new();
        config.set("http.host", "127.0.0.1");
        config.set("http.port", "3040");
        config.set("uploads.max_files", "20");
        config.set("uploads.max_file_bytes", (10 * 1024 * 1024).to_string());
        config.set("uploads.accepted_types", "image/*");
        config.set("uploads.concurrency", "4");
        config.set("storage.backend", "memory");
        config.set("storage.public_url", "memory://uploads");
        config
    }

    /// Defaults overridden by `KEYSTONE__*` variables
    pub fn from_env() -> Self {
        let mut config = Self::defaults();
        config.load_env(ENV_PREFIX);
        config
    }

    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(std::env::vars(), prefix);
    }

    /// Apply `PREFIX__A__B=value` pairs as `a.b = value`
    pub fn load_vars<I>(&mut self, vars: I, prefix: &str)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        let host = self.get("http.host").unwrap_or("127.0.0.1");
        let port = self.get("http.port").unwrap_or("3040");
        format!("{host}:{port}")
    }

    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.get("storage.backend").unwrap_or("memory").trim() {
            "memory" => Ok(StorageBackend::Memory),
            "s3" => Ok(StorageBackend::S3),
            other => anyhow::bail!("unknown storage.backend '{other}' (expected memory or s3)"),
        }
    }

    /// Upload limits from the `uploads.*` keys
    pub fn upload_constraints(&self) -> UploadConstraints {
        let mut constraints = UploadConstraints::new();
        if let Some(max) = self.get_usize("uploads.max_files") {
            constraints = constraints.with_max_files(max);
        }
        if let Some(max) = self.get_u64("uploads.max_file_bytes") {
            constraints = constraints.with_max_file_bytes(max);
        }
        for pattern in self
            .get("uploads.accepted_types")
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            constraints = constraints.accept(pattern);
        }
        constraints
    }

    pub fn staging_config(&self) -> StagingConfig {
        StagingConfig::new()
            .with_max_concurrent_uploads(self.get_usize("uploads.concurrency").unwrap_or(4))
            .with_default_constraints(self.upload_constraints())
    }

    /// Request body cap: a full batch plus room for multipart framing
    pub fn body_limit(&self) -> usize {
        let files = self.get_usize("uploads.max_files").unwrap_or(20).max(1);
        let bytes = self.get_usize("uploads.max_file_bytes").unwrap_or(10 * 1024 * 1024);
        files.saturating_mul(bytes).saturating_add(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_override_dotted_keys() {
        let mut config = ServerConfig::defaults();
        config.load_vars(
            vec![
                ("KEYSTONE__UPLOADS__MAX_FILES".to_string(), "3".to_string()),
                ("KEYSTONE__HTTP__PORT".to_string(), "8080".to_string()),
                ("OTHER__HTTP__PORT".to_string(), "1".to_string()),
            ],
            ENV_PREFIX,
        );

        assert_eq!(config.get_usize("uploads.max_files"), Some(3));
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn upload_keys_build_constraints() {
        let mut config = ServerConfig::defaults();
        config.set("uploads.accepted_types", "image/png, image/webp");
        config.set("uploads.max_files", "2");

        let constraints = config.upload_constraints();
        assert_eq!(constraints.max_files, Some(2));
        assert_eq!(constraints.accepted_types, vec!["image/png".to_string(), "image/webp".to_string()]);
        assert_eq!(constraints.max_file_bytes, Some(10 * 1024 * 1024));
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut config = ServerConfig::defaults();
        assert_eq!(config.storage_backend().unwrap(), StorageBackend::Memory);
        config.set("storage.backend", "ftp");
        assert!(config.storage_backend().is_err());
    }
}
