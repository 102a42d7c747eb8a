use tracing::{info, warn};

use crate::gallery::{self, GalleryApi, GalleryEntry, NewGalleryEntry, ParentRef, RemovedEntry};
use crate::{
    CleanupReport, CommitOutcome, FileOutcome, FileUpload, PreserveList, StagingCoordinator,
    StagingError, StagingResult, UploadBatch, UploadOptions, UploadSession,
};

/// An image to add to a gallery
#[derive(Debug, Clone)]
pub struct GalleryImage {
    pub file: FileUpload,
    pub caption: Option<String>,
}

impl GalleryImage {
    pub fn new(file: FileUpload) -> Self {
        Self { file, caption: None }
    }

    pub fn with_caption<S: Into<String>>(mut self, caption: S) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// A staged file whose gallery entry could not be saved
#[derive(Debug, Clone)]
pub struct RecordFailure {
    pub url: String,
    pub error: String,
}

/// Everything that happened during [`GalleryEditor::add_images`]
#[derive(Debug, Clone)]
pub struct AddImagesReport {
    pub batch: UploadBatch,
    pub created: Vec<GalleryEntry>,
    pub record_failures: Vec<RecordFailure>,
    pub commit: Option<CommitOutcome>,
    /// Present when orphans had to be reclaimed
    pub cleanup: Option<CleanupReport>,
    /// Set when orphans could not be reclaimed because the live gallery
    /// could not be read
    pub cleanup_error: Option<String>,
}

/// One gallery editing interaction: a parent record plus the upload session
/// opened for it.
///
/// Runs upload, record creation and commit strictly in that order, and
/// reclaims orphans with a preserve list read from the live gallery.
pub struct GalleryEditor<'a> {
    coordinator: &'a StagingCoordinator,
    gallery: &'a dyn GalleryApi,
    parent: ParentRef,
    session: UploadSession,
}

impl<'a> GalleryEditor<'a> {
    pub fn open(coordinator: &'a StagingCoordinator, gallery: &'a dyn GalleryApi, parent: ParentRef) -> Self {
        let session = coordinator.begin();
        Self {
            coordinator,
            gallery,
            parent,
            session,
        }
    }

    /// Continue with an existing session
    pub fn with_session(
        coordinator: &'a StagingCoordinator,
        gallery: &'a dyn GalleryApi,
        parent: ParentRef,
        session: UploadSession,
    ) -> Self {
        Self {
            coordinator,
            gallery,
            parent,
            session,
        }
    }

    pub fn parent(&self) -> &ParentRef {
        &self.parent
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// The live in-use set of this gallery
    pub async fn preserve_list(&self) -> StagingResult<PreserveList> {
        PreserveList::for_parent(self.gallery, &self.parent).await
    }

    /// Upload images and append them to the gallery.
    ///
    /// Only files whose entry was created are committed. Files whose entry
    /// could not be created are deleted again right away. The first image of
    /// an empty gallery becomes its feature.
    ///
    /// If the gallery cannot be read after the upload, no entry is created and
    /// every staged file is reported as a record failure. Those files stay
    /// pending until [`close`](Self::close) reclaims them.
    pub async fn add_images(
        &mut self,
        images: Vec<GalleryImage>,
        options: UploadOptions,
    ) -> StagingResult<AddImagesReport> {
        let captions: Vec<Option<String>> = images.iter().map(|i| i.caption.clone()).collect();
        let files: Vec<FileUpload> = images.into_iter().map(|i| i.file).collect();

        let batch = self.coordinator.upload(&mut self.session, files, options).await?;

        let existing = match self.gallery.list(&self.parent).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(parent = %self.parent, error = %e, "could not read gallery; staged files left pending");
                let error = e.to_string();
                let record_failures = batch
                    .accepted()
                    .into_iter()
                    .map(|file| RecordFailure {
                        url: file.url.clone(),
                        error: error.clone(),
                    })
                    .collect();
                return Ok(AddImagesReport {
                    batch,
                    created: Vec::new(),
                    record_failures,
                    commit: None,
                    cleanup: None,
                    cleanup_error: Some(error),
                });
            }
        };
        let mut next_order = existing.iter().map(|e| e.display_order + 1).max().unwrap_or(0);
        let mut needs_feature = !existing.iter().any(|e| e.is_feature);

        let mut created = Vec::new();
        let mut record_failures = Vec::new();
        for (outcome, caption) in batch.outcomes.iter().zip(captions) {
            let FileOutcome::Accepted(file) = outcome else {
                continue;
            };

            let mut entry = NewGalleryEntry::new(file.url.clone()).with_display_order(next_order);
            entry.caption = caption;
            entry.is_feature = needs_feature;

            match self.gallery.create(&self.parent, entry).await {
                Ok(saved) => {
                    next_order += 1;
                    needs_feature = false;
                    created.push(saved);
                }
                Err(e) => {
                    warn!(parent = %self.parent, url = %file.url, error = %e, "gallery entry not saved; file is orphaned");
                    record_failures.push(RecordFailure {
                        url: file.url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let commit = if created.is_empty() {
            None
        } else {
            let urls: Vec<String> = created.iter().map(|e| e.image_url.clone()).collect();
            Some(self.coordinator.commit(&mut self.session, Some(urls.as_slice())).await)
        };

        let (cleanup, cleanup_error) = if record_failures.is_empty() {
            (None, None)
        } else {
            match self.preserve_list().await {
                Ok(preserve) => (Some(self.coordinator.cleanup(&mut self.session, &preserve).await), None),
                Err(e) => {
                    warn!(parent = %self.parent, error = %e, "could not read gallery; orphans left for a later cleanup");
                    (None, Some(e.to_string()))
                }
            }
        };

        info!(parent = %self.parent, created = created.len(), orphaned = record_failures.len(), "gallery images added");

        Ok(AddImagesReport {
            batch,
            created,
            record_failures,
            commit,
            cleanup,
            cleanup_error,
        })
    }

    /// Remove an entry; the feature flag moves on if needed
    pub async fn remove(&self, id: &str) -> StagingResult<RemovedEntry> {
        gallery::remove_entry(self.gallery, &self.parent, id).await
    }

    /// Make an entry the gallery's only feature
    pub async fn set_feature(&self, id: &str) -> StagingResult<GalleryEntry> {
        gallery::set_feature(self.gallery, &self.parent, id).await
    }

    /// Finish the interaction: reclaim everything staged but not in use.
    ///
    /// If the live gallery cannot be read nothing is deleted and the session
    /// is handed back with the error so the caller can retry.
    pub async fn close(mut self) -> Result<CleanupReport, CloseError> {
        match self.preserve_list().await {
            Ok(preserve) => Ok(self.coordinator.cleanup(&mut self.session, &preserve).await),
            Err(error) => Err(CloseError {
                error,
                session: self.session,
            }),
        }
    }
}

/// [`GalleryEditor::close`] could not build a preserve list
#[derive(Debug)]
pub struct CloseError {
    pub error: StagingError,
    /// The untouched session, for a later retry
    pub session: UploadSession,
}

impl std::fmt::Display for CloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cleanup of {} skipped: {}", self.session.session_id, self.error)
    }
}

impl std::error::Error for CloseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
