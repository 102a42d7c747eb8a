use serde::Serialize;

use crate::{RejectReason, UploadedFileReference};

/// What happened to each file of an upload batch, in input order
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pub outcomes: Vec<FileOutcome>,
}

/// Result for a single file of a batch
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// Stored durably and tracked as pending in the session
    Accepted(UploadedFileReference),
    /// Refused by the constraints; never sent to the transport
    Rejected { name: String, reason: RejectReason },
    /// The transport refused or failed
    Failed { name: String, error: String },
    /// Cancelled before the transfer finished
    Cancelled { name: String },
}

impl FileOutcome {
    pub fn name(&self) -> &str {
        match self {
            FileOutcome::Accepted(file) => &file.name,
            FileOutcome::Rejected { name, .. }
            | FileOutcome::Failed { name, .. }
            | FileOutcome::Cancelled { name } => name,
        }
    }
}

impl UploadBatch {
    pub fn accepted(&self) -> Vec<&UploadedFileReference> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                FileOutcome::Accepted(file) => Some(file),
                _ => None,
            })
            .collect()
    }

    pub fn accepted_urls(&self) -> Vec<String> {
        self.accepted().into_iter().map(|f| f.url.clone()).collect()
    }

    pub fn rejected_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Rejected { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Failed { .. }))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Cancelled { .. }))
            .count()
    }
}

/// Progress of a whole batch, weighted by file size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub file_name: String,
    pub file_percent: u8,
    pub batch_percent: u8,
}

/// Result of a commit call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// URLs now in the committed state
    pub committed: Vec<String>,
    /// Requested URLs this session never produced
    pub unknown: Vec<String>,
    /// Set when the commit ledger failed; the files stay pending
    pub ledger_error: Option<String>,
}

impl CommitOutcome {
    pub fn is_ok(&self) -> bool {
        self.ledger_error.is_none()
    }
}

/// A deletion the transport refused during cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub url: String,
    pub error: String,
}

/// Result of a cleanup call
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// References removed from storage, in the `Deleted` state
    pub deleted: Vec<UploadedFileReference>,
    /// Session files left alone (committed or on the preserve list)
    pub preserved: Vec<String>,
    /// Deletions that failed; those files stay pending
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn deleted_urls(&self) -> Vec<String> {
        self.deleted.iter().map(|f| f.url.clone()).collect()
    }

    pub fn counts(&self) -> CleanupCounts {
        CleanupCounts {
            deleted_count: self.deleted.len(),
            preserved_count: self.preserved.len(),
            failed_count: self.failed.len(),
        }
    }
}

/// Wire summary of a cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCounts {
    pub deleted_count: usize,
    pub preserved_count: usize,
    pub failed_count: usize,
}
