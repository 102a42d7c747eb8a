//! # keystone-staging: upload staging for gallery media
//!
//! Images for blog posts, projects and services are uploaded to durable
//! storage *before* the record that uses them is saved. Until that record is
//! saved the upload is provisional. `keystone-staging` keeps that window
//! explicit with a two-phase protocol:
//!
//! 1. **Stage**: upload files into an [`UploadSession`]; each becomes a
//!    [`UploadedFileReference`] in the `Pending` state.
//! 2. **Finalize or discard**: after the record write succeeds, **commit** the
//!    files it references; on close, unmount or any failure, **clean up**
//!    everything pending that is not on the [`PreserveList`].
//!
//! ```text
//!              commit
//!   Pending ──────────▶ Committed   (safe, never deleted)
//!      │
//!      │ cleanup (not preserved)
//!      ▼
//!   Deleted                         (reclaimed from storage)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use keystone_staging::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> StagingResult<()> {
//! let transport = MemoryTransport::new();
//! let coordinator = StagingCoordinator::new(transport.clone(), StagingConfig::default());
//! let gallery = MemoryGalleryApi::new();
//! let project = ParentRef::project("harbour-bridge");
//!
//! // 1. Stage two photos
//! let mut session = coordinator.begin();
//! let batch = coordinator
//!     .upload(
//!         &mut session,
//!         vec![
//!             FileUpload::new("pour.jpg", vec![1u8; 64]),
//!             FileUpload::new("crane.jpg", vec![2u8; 64]),
//!         ],
//!         UploadOptions::new(),
//!     )
//!     .await?;
//! let urls = batch.accepted_urls();
//!
//! // 2. Save a record for the first one, then commit it
//! gallery.create(&project, NewGalleryEntry::new(urls[0].clone())).await?;
//! coordinator.commit(&mut session, Some(&urls[..1])).await;
//!
//! // 3. Leaving the editor: everything not in use is reclaimed
//! let preserve = PreserveList::for_parent(&gallery, &project).await?;
//! let report = coordinator.cleanup(&mut session, &preserve).await;
//! assert_eq!(report.deleted_urls(), vec![urls[1].clone()]);
//! assert!(transport.contains(&urls[0]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   GalleryEditor      │  ← upload → create entry → commit, cleanup on close
//! ├──────────────────────┤
//! │  StagingCoordinator  │  ← stage / commit / cleanup over an owned session
//! ├──────────┬───────────┤
//! │ Transport│  Ledger   │  ← durable storage, commit bookkeeping
//! └──────────┴───────────┘
//! ```
//!
//! Cleanup can only be as safe as its preserve list: the coordinator cannot
//! know which URLs other saved records use. Build the list with
//! [`PreserveList::for_parent`], which reads the live gallery.

mod config;
mod coordinator;
mod editor;
mod error;
pub mod gallery;
mod ledger;
mod memory;
pub mod mime;
mod preserve;
mod report;
mod s3;
pub mod transport;
mod types;

pub use config::{RejectReason, StagingConfig, UploadConstraints};
pub use coordinator::{BatchProgressFn, StagingCoordinator, UploadOptions};
pub use editor::{AddImagesReport, CloseError, GalleryEditor, GalleryImage, RecordFailure};
pub use error::{StagingError, StagingResult};
pub use gallery::{
    GalleryApi, GalleryEntry, GalleryEntryPatch, MemoryGalleryApi, NewGalleryEntry, ParentKind,
    ParentRef, RemovedEntry,
};
pub use ledger::{CommitLedger, MemoryCommitLedger};
pub use memory::{MemoryTransport, StoredObject};
pub use preserve::PreserveList;
pub use report::{
    BatchProgress, CleanupCounts, CleanupFailure, CleanupReport, CommitOutcome, FileOutcome,
    UploadBatch,
};
pub use s3::{S3Config, S3Transport};
pub use transport::{
    DefaultKeyStrategy, ProgressFn, TransportCapabilities, TransportReceipt, UploadKeyStrategy,
    UploadTransport,
};
pub use types::{FileState, FileUpload, SessionId, UploadSession, UploadedFileReference};

/// Cancellation handle accepted by [`UploadOptions::with_cancel`]
pub use tokio_util::sync::CancellationToken;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        FileUpload, GalleryApi, GalleryEditor, MemoryGalleryApi, MemoryTransport, NewGalleryEntry,
        ParentRef, PreserveList, StagingConfig, StagingCoordinator, StagingError, StagingResult,
        UploadOptions, UploadSession, UploadTransport,
    };
}
