use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Longest id accepted from outside
    pub const MAX_LEN: usize = 64;

    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(format!("ses_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string (e.g. an id the client kept across re-renders)
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 1 to `MAX_LEN` ascii alphanumerics, `-` or `_`. Generated ids always are;
    /// ids adopted from outside should be checked before use.
    pub fn is_well_formed(&self) -> bool {
        (1..=Self::MAX_LEN).contains(&self.0.len())
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw file handed to the coordinator for upload
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FileUpload {
    pub fn new<S: Into<String>>(name: S, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where a staged file is in its lifecycle.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum FileState {
    Pending,
    #[serde(rename_all = "camelCase")]
    Committed { committed_at: i64 },
    #[serde(rename_all = "camelCase")]
    Deleted { deleted_at: i64 },
}

impl FileState {
    pub fn is_pending(&self) -> bool {
        matches!(self, FileState::Pending)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, FileState::Committed { .. })
    }
}

/// A file that reached durable storage under some session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileReference {
    pub url: String,
    pub name: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub state: FileState,
    pub uploaded_at: i64,
}

impl UploadedFileReference {
    pub fn is_committed(&self) -> bool {
        self.state.is_committed()
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }
}

/// Files staged during one editing interaction.
///
/// The session is a plain owned value: whoever runs the editing interaction
/// holds it and lends it mutably to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: SessionId,
    pub created_at: i64,
    pub files: Vec<UploadedFileReference>,
}

impl UploadSession {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            created_at: chrono::Utc::now().timestamp(),
            files: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.session_id
    }

    /// Pending files in upload order
    pub fn pending_files(&self) -> impl Iterator<Item = &UploadedFileReference> {
        self.files.iter().filter(|f| f.is_pending())
    }

    pub fn pending_urls(&self) -> Vec<String> {
        self.pending_files().map(|f| f.url.clone()).collect()
    }

    pub fn committed_urls(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.is_committed())
            .map(|f| f.url.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_files().count()
    }

    /// True once nothing is left to commit or clean up
    pub fn is_settled(&self) -> bool {
        self.pending_count() == 0
    }

    pub fn get(&self, url: &str) -> Option<&UploadedFileReference> {
        self.files.iter().find(|f| f.url == url)
    }

    pub(crate) fn get_mut(&mut self, url: &str) -> Option<&mut UploadedFileReference> {
        self.files.iter_mut().find(|f| f.url == url)
    }

    pub(crate) fn track(&mut self, file: UploadedFileReference) {
        self.files.push(file);
    }

    pub(crate) fn forget(&mut self, url: &str) -> Option<UploadedFileReference> {
        let idx = self.files.iter().position(|f| f.url == url)?;
        Some(self.files.remove(idx))
    }
}
