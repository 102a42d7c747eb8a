use crate::mime;
use crate::FileUpload;

/// Configuration for the staging coordinator
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// How many files of one batch may transfer (or be deleted) at once
    pub max_concurrent_uploads: usize,

    /// Constraints applied when the caller does not pass its own
    pub default_constraints: UploadConstraints,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 4,
            default_constraints: UploadConstraints::gallery_images(),
        }
    }
}

impl StagingConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-batch concurrency bound (at least 1)
    pub fn with_max_concurrent_uploads(mut self, n: usize) -> Self {
        self.max_concurrent_uploads = n.max(1);
        self
    }

    /// Set default constraints
    pub fn with_default_constraints(mut self, constraints: UploadConstraints) -> Self {
        self.default_constraints = constraints;
        self
    }
}

/// Limits checked before any file is handed to the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadConstraints {
    /// Max number of pending files a session may hold after the batch
    pub max_files: Option<usize>,

    /// Accepted MIME types; `image/*` style wildcards allowed. Empty = all.
    pub accepted_types: Vec<String>,

    /// Max size of a single file
    pub max_file_bytes: Option<u64>,
}

/// Why a single file was refused before transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    UnsupportedType { content_type: Option<String> },
    TooLarge { size_bytes: u64, max_bytes: u64 },
    Empty,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::UnsupportedType { content_type: Some(ct) } => {
                write!(f, "file type {} is not accepted", ct)
            }
            RejectReason::UnsupportedType { content_type: None } => {
                write!(f, "file type could not be determined")
            }
            RejectReason::TooLarge { size_bytes, max_bytes } => {
                write!(f, "file is {} bytes, limit is {}", size_bytes, max_bytes)
            }
            RejectReason::Empty => write!(f, "file is empty"),
        }
    }
}

impl UploadConstraints {
    /// No limits at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Images up to 10 MiB, at most 20 pending files
    pub fn gallery_images() -> Self {
        Self::new()
            .with_max_files(20)
            .accept("image/*")
            .with_max_file_bytes(10 * 1024 * 1024)
    }

    /// Set max pending files
    pub fn with_max_files(mut self, max: usize) -> Self {
        self.max_files = Some(max);
        self
    }

    /// Accept a MIME type or wildcard
    pub fn accept<S: Into<String>>(mut self, content_type: S) -> Self {
        self.accepted_types.push(content_type.into().to_ascii_lowercase());
        self
    }

    /// Set max size per file
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = Some(bytes);
        self
    }

    /// Check the batch size against `max_files`, counting what the session
    /// already holds.
    pub fn check_count(&self, already_pending: usize, incoming: usize) -> Result<(), String> {
        match self.max_files {
            Some(max) if already_pending + incoming > max => Err(format!(
                "{} files selected but only {} more allowed (limit {})",
                incoming,
                max.saturating_sub(already_pending),
                max
            )),
            _ => Ok(()),
        }
    }

    /// Check one file against type and size limits
    pub fn check_file(&self, file: &FileUpload) -> Result<(), RejectReason> {
        if file.data.is_empty() {
            return Err(RejectReason::Empty);
        }

        if let Some(max) = self.max_file_bytes {
            if file.size_bytes() > max {
                return Err(RejectReason::TooLarge {
                    size_bytes: file.size_bytes(),
                    max_bytes: max,
                });
            }
        }

        if !self.accepted_types.is_empty() {
            let content_type = mime::resolve(file.content_type.as_deref(), &file.name);
            let accepted = content_type
                .as_deref()
                .map_or(false, |ct| self.accepted_types.iter().any(|pattern| mime::matches(pattern, ct)));
            if !accepted {
                return Err(RejectReason::UnsupportedType { content_type });
            }
        }

        Ok(())
    }
}
