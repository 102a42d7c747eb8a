use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use uuid::Uuid;

use crate::{FileUpload, SessionId, StagingResult};

/// Per-file progress callback, called with a percentage in 0..=100
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// A progress callback that ignores every report
pub fn no_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// The external service that turns raw files into durable URLs.
///
/// Implementations must be safe to call concurrently; the coordinator
/// transfers several files of one batch at once.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Store one file durably and return where it lives
    async fn upload(
        &self,
        session_id: &SessionId,
        file: FileUpload,
        progress: ProgressFn,
    ) -> StagingResult<TransportReceipt>;

    /// Remove a previously returned URL from durable storage
    async fn delete(&self, url: &str) -> StagingResult<()>;

    /// Get transport capabilities
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::basic()
    }
}

/// What the transport returns for an accepted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    pub url: String,
    pub name: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

/// Transport capabilities
#[derive(Debug, Clone, Default)]
pub struct TransportCapabilities {
    pub max_file_bytes: Option<u64>,
}

impl TransportCapabilities {
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = Some(bytes);
        self
    }
}

/// Strategy for naming stored objects
pub trait UploadKeyStrategy: Send + Sync {
    /// Generate a storage key for a staged file
    fn object_key(&self, session_id: &SessionId, file_name: &str) -> String;
}

/// Default key strategy: uploads/year/month/session/uuid-name
#[derive(Debug, Clone)]
pub struct DefaultKeyStrategy;

impl UploadKeyStrategy for DefaultKeyStrategy {
    fn object_key(&self, session_id: &SessionId, file_name: &str) -> String {
        let now = chrono::Utc::now();
        format!(
            "uploads/{:04}/{:02}/{}/{}-{}",
            now.year(),
            now.month(),
            sanitize_key_segment(session_id.as_str()),
            Uuid::new_v4().simple(),
            sanitize_file_name(file_name)
        )
    }
}

/// Keep names URL and key safe: ascii alphanumerics, `.`, `-`, `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reduce an arbitrary token to one path segment: ascii alphanumerics, `-`
/// and `_`, never empty.
pub fn sanitize_key_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a public base URL and a storage key
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
