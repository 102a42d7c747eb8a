//! Stage / commit / cleanup behaviour against in-memory backends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keystone_staging::prelude::*;
use keystone_staging::{
    CancellationToken, FileOutcome, FileState, GalleryEntry, GalleryEntryPatch, GalleryImage,
    MemoryCommitLedger, ProgressFn, SessionId, TransportReceipt,
};
use parking_lot::Mutex;

/// Wraps a memory transport and fails chosen uploads and deletions.
#[derive(Clone, Default)]
struct FlakyTransport {
    inner: MemoryTransport,
    failing_uploads: Arc<Mutex<HashSet<String>>>,
    failing_deletes: Arc<Mutex<HashSet<String>>>,
    uploads: Arc<AtomicUsize>,
}

impl FlakyTransport {
    fn fail_upload_of(&self, name: &str) {
        self.failing_uploads.lock().insert(name.to_string());
    }

    fn fail_delete_of(&self, url: &str) {
        self.failing_deletes.lock().insert(url.to_string());
    }

    fn heal(&self) {
        self.failing_uploads.lock().clear();
        self.failing_deletes.lock().clear();
    }

    fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadTransport for FlakyTransport {
    async fn upload(
        &self,
        session_id: &SessionId,
        file: FileUpload,
        progress: ProgressFn,
    ) -> StagingResult<TransportReceipt> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if file.name.starts_with("slow") {
            // never finishes unless the caller gives up
            std::future::pending::<()>().await;
        }
        if self.failing_uploads.lock().contains(&file.name) {
            return Err(StagingError::transport(format!("connection reset while sending {}", file.name)));
        }
        self.inner.upload(session_id, file, progress).await
    }

    async fn delete(&self, url: &str) -> StagingResult<()> {
        if self.failing_deletes.lock().contains(url) {
            return Err(StagingError::transport("storage unavailable"));
        }
        self.inner.delete(url).await
    }
}

/// A gallery whose `create` fails for chosen URLs, and whose `list` can be
/// switched off.
#[derive(Default)]
struct PickyGallery {
    inner: MemoryGalleryApi,
    refuse: Mutex<HashSet<String>>,
    unreadable: AtomicBool,
}

#[async_trait]
impl GalleryApi for PickyGallery {
    async fn list(&self, parent: &ParentRef) -> StagingResult<Vec<GalleryEntry>> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(StagingError::transport("content API timed out"));
        }
        self.inner.list(parent).await
    }

    async fn create(&self, parent: &ParentRef, entry: NewGalleryEntry) -> StagingResult<GalleryEntry> {
        if self.refuse.lock().iter().any(|name| entry.image_url.ends_with(name.as_str())) {
            return Err(StagingError::transport("content API returned 503"));
        }
        self.inner.create(parent, entry).await
    }

    async fn update(&self, id: &str, patch: GalleryEntryPatch) -> StagingResult<GalleryEntry> {
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> StagingResult<()> {
        self.inner.delete(id).await
    }
}

fn photo(name: &str) -> FileUpload {
    FileUpload::new(name, vec![9u8; 128]).with_content_type("image/jpeg")
}

fn coordinator_over(transport: FlakyTransport) -> StagingCoordinator {
    StagingCoordinator::new(transport, StagingConfig::default())
}

/// Committed files survive any cleanup, whatever the preserve list says.
#[tokio::test]
async fn committed_files_survive_cleanup() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let mut session = coordinator.begin();

    let batch = coordinator
        .upload(&mut session, vec![photo("a.jpg"), photo("b.jpg")], UploadOptions::new())
        .await
        .unwrap();
    let urls = batch.accepted_urls();
    coordinator.commit(&mut session, Some(urls.as_slice())).await;

    let report = coordinator.cleanup(&mut session, &PreserveList::new()).await;

    assert!(report.deleted.is_empty());
    assert_eq!(report.counts().preserved_count, 2);
    assert!(urls.iter().all(|u| transport.inner.contains(u)));
}

/// Upload two, save a record for the first, commit only that one and clean
/// up with nothing preserved: the commit alone keeps the first file.
#[tokio::test]
async fn commit_alone_protects_the_saved_file() {
    let transport = FlakyTransport::default();
    let ledger = MemoryCommitLedger::new();
    let coordinator = coordinator_over(transport.clone()).with_ledger(ledger.clone());
    let gallery = MemoryGalleryApi::new();
    let parent = ParentRef::project("harbor-bridge");
    let mut session = coordinator.begin();

    let batch = coordinator
        .upload(&mut session, vec![photo("1.jpg"), photo("2.jpg")], UploadOptions::new())
        .await
        .unwrap();
    let urls = batch.accepted_urls();
    assert_eq!(urls.len(), 2);
    let (kept, dropped) = (&urls[0], &urls[1]);

    gallery.create(&parent, NewGalleryEntry::new(kept.clone())).await.unwrap();
    let outcome = coordinator
        .commit(&mut session, Some(std::slice::from_ref(kept)))
        .await;
    assert_eq!(&outcome.committed, std::slice::from_ref(kept));
    assert!(ledger.is_committed(kept));

    let report = coordinator.cleanup(&mut session, &PreserveList::new()).await;

    assert_eq!(report.deleted_urls(), vec![dropped.clone()]);
    assert_eq!(report.preserved, vec![kept.clone()]);
    assert!(report.failed.is_empty());
    assert!(transport.inner.contains(kept));
    assert!(!transport.inner.contains(dropped));
    assert!(matches!(session.get(kept).map(|f| &f.state), Some(FileState::Committed { .. })));
    assert!(matches!(report.deleted[0].state, FileState::Deleted { .. }));
    assert!(session.get(dropped).is_none());
    assert!(session.is_settled());
}

/// A second cleanup finds nothing left to delete.
#[tokio::test]
async fn cleanup_is_idempotent() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let mut session = coordinator.begin();
    coordinator
        .upload(&mut session, vec![photo("a.jpg"), photo("b.jpg")], UploadOptions::new())
        .await
        .unwrap();

    let first = coordinator.cleanup(&mut session, &PreserveList::new()).await;
    let second = coordinator.cleanup(&mut session, &PreserveList::new()).await;

    assert_eq!(first.counts().deleted_count, 2);
    assert_eq!(second.counts().deleted_count, 0);
    assert_eq!(second.counts().failed_count, 0);
    assert!(transport.inner.is_empty());
    assert!(session.is_settled());
}

/// A deletion that fails is retried by the next cleanup.
#[tokio::test]
async fn failed_deletions_stay_pending_until_retried() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let mut session = coordinator.begin();
    let urls = coordinator
        .upload(&mut session, vec![photo("a.jpg"), photo("b.jpg")], UploadOptions::new())
        .await
        .unwrap()
        .accepted_urls();
    transport.fail_delete_of(&urls[1]);

    let first = coordinator.cleanup(&mut session, &PreserveList::new()).await;
    assert_eq!(first.deleted_urls(), vec![urls[0].clone()]);
    assert_eq!(first.failed.len(), 1);
    assert_eq!(first.failed[0].url, urls[1]);
    assert_eq!(session.pending_urls(), vec![urls[1].clone()]);

    transport.heal();
    let second = coordinator.cleanup(&mut session, &PreserveList::new()).await;
    assert_eq!(second.deleted_urls(), vec![urls[1].clone()]);
    assert!(transport.inner.is_empty());
}

/// One failing transfer does not sink the rest of the batch.
#[tokio::test]
async fn partial_batch_failure_is_isolated() {
    let transport = FlakyTransport::default();
    transport.fail_upload_of("b.jpg");
    let coordinator = coordinator_over(transport.clone());
    let mut session = coordinator.begin();

    let batch = coordinator
        .upload(
            &mut session,
            vec![photo("a.jpg"), photo("b.jpg"), photo("c.jpg")],
            UploadOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(batch.outcomes.len(), 3);
    assert!(matches!(batch.outcomes[0], FileOutcome::Accepted(_)));
    assert!(matches!(&batch.outcomes[1], FileOutcome::Failed { name, error } if name == "b.jpg" && error.contains("connection reset")));
    assert!(matches!(batch.outcomes[2], FileOutcome::Accepted(_)));
    assert_eq!(session.pending_count(), 2);
    assert_eq!(transport.inner.len(), 2);
}

/// URLs used by saved records are preserved even though this session
/// never committed them.
#[tokio::test]
async fn preserve_list_protects_externally_used_files() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let gallery = MemoryGalleryApi::new();
    let service = ParentRef::service("foundation-repair");
    let mut session = coordinator.begin();

    let urls = coordinator
        .upload(&mut session, vec![photo("a.jpg"), photo("b.jpg")], UploadOptions::new())
        .await
        .unwrap()
        .accepted_urls();
    // saved elsewhere, commit never happened
    gallery.create(&service, NewGalleryEntry::new(urls[0].clone())).await.unwrap();

    let preserve = PreserveList::for_parent(&gallery, &service).await.unwrap();
    let report = coordinator.cleanup(&mut session, &preserve).await;

    assert_eq!(report.deleted_urls(), vec![urls[1].clone()]);
    assert_eq!(report.preserved, vec![urls[0].clone()]);
    assert!(transport.inner.contains(&urls[0]));
}

/// Validation failures never reach the transport.
#[tokio::test]
async fn validation_runs_before_any_transfer() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let mut session = coordinator.begin();

    let too_many: Vec<FileUpload> = (0..21).map(|i| photo(&format!("{i}.jpg"))).collect();
    let result = coordinator.upload(&mut session, too_many, UploadOptions::new()).await;
    assert!(matches!(result, Err(StagingError::Validation { .. })));

    let batch = coordinator
        .upload(
            &mut session,
            vec![FileUpload::new("notes.txt", "hello"), FileUpload::new("blank.jpg", Vec::<u8>::new())],
            UploadOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(batch.rejected_count(), 2);
    assert_eq!(transport.upload_calls(), 0);
}

/// Cancelled transfers are reported and leave nothing behind in the session.
#[tokio::test]
async fn cancellation_stops_unfinished_transfers() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let mut session = coordinator.begin();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let batch = coordinator
        .upload(
            &mut session,
            vec![photo("fast.jpg"), photo("slow.jpg")],
            UploadOptions::new().with_cancel(cancel),
        )
        .await
        .unwrap();

    assert!(matches!(batch.outcomes[0], FileOutcome::Accepted(_)));
    assert!(matches!(&batch.outcomes[1], FileOutcome::Cancelled { name } if name == "slow.jpg"));
    assert_eq!(session.pending_count(), 1);

    // already cancelled: nothing is attempted
    let before = transport.upload_calls();
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let batch = coordinator
        .upload(&mut session, vec![photo("late.jpg")], UploadOptions::new().with_cancel(cancelled))
        .await
        .unwrap();
    assert_eq!(batch.cancelled_count(), 1);
    assert_eq!(transport.upload_calls(), before);
}

/// Sessions are independent of each other.
#[tokio::test]
async fn sessions_do_not_share_files() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let mut first = coordinator.begin();
    let mut second = coordinator.begin();
    assert_ne!(first.id(), second.id());

    let url = coordinator
        .upload(&mut first, vec![photo("a.jpg")], UploadOptions::new())
        .await
        .unwrap()
        .accepted_urls()
        .remove(0);

    let outcome = coordinator.commit(&mut second, Some(std::slice::from_ref(&url))).await;
    assert!(outcome.committed.is_empty());
    assert_eq!(outcome.unknown, vec![url.clone()]);

    let report = coordinator.cleanup(&mut second, &PreserveList::new()).await;
    assert!(report.deleted.is_empty());
    assert!(transport.inner.contains(&url));
}

/// Editor flow: add three images, remove the feature, close the editor.
#[tokio::test]
async fn gallery_editor_end_to_end() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let gallery = MemoryGalleryApi::new();
    let project = ParentRef::project("riverside-lofts");

    let mut editor = GalleryEditor::open(&coordinator, &gallery, project.clone());
    let report = editor
        .add_images(
            vec![
                GalleryImage::new(photo("facade.jpg")).with_caption("Street facade"),
                GalleryImage::new(photo("lobby.jpg")),
                GalleryImage::new(photo("roof.jpg")),
            ],
            UploadOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.created.len(), 3);
    assert!(report.created[0].is_feature);
    assert_eq!(report.created[0].caption.as_deref(), Some("Street facade"));
    assert_eq!(
        report.created.iter().map(|e| e.display_order).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(report.commit.as_ref().map(|c| c.committed.len()), Some(3));
    assert!(editor.session().is_settled());

    let removed = editor.remove(&report.created[0].id).await.unwrap();
    let promoted = removed.promoted.unwrap();
    assert_eq!(promoted.id, report.created[1].id);
    assert!(promoted.is_feature);

    let roof = editor.set_feature(&report.created[2].id).await.unwrap();
    assert!(roof.is_feature);
    let entries = gallery.list(&project).await.unwrap();
    assert_eq!(entries.iter().filter(|e| e.is_feature).count(), 1);

    let closed = editor.close().await.unwrap();
    assert!(closed.deleted.is_empty());
    assert_eq!(transport.inner.len(), 3);
}

/// Files whose gallery entry could not be saved are reclaimed right away.
#[tokio::test]
async fn editor_reclaims_files_without_records() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let gallery = PickyGallery::default();
    gallery.refuse.lock().insert("lobby.jpg".to_string());
    let blog = ParentRef::blog("spring-open-house");

    let mut editor = GalleryEditor::open(&coordinator, &gallery, blog.clone());
    let report = editor
        .add_images(
            vec![GalleryImage::new(photo("facade.jpg")), GalleryImage::new(photo("lobby.jpg"))],
            UploadOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.record_failures.len(), 1);
    let cleanup = report.cleanup.unwrap();
    assert_eq!(cleanup.deleted_urls(), vec![report.record_failures[0].url.clone()]);
    assert_eq!(transport.inner.len(), 1);
    assert!(transport.inner.contains(&report.created[0].image_url));
    assert_eq!(gallery.list(&blog).await.unwrap().len(), 1);
}

/// An unreadable gallery after upload still reports every staged file, and
/// closing once it recovers reclaims them.
#[tokio::test]
async fn unreadable_gallery_keeps_the_batch_and_files_pending() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let gallery = PickyGallery::default();
    gallery.unreadable.store(true, Ordering::SeqCst);
    let service = ParentRef::service("roof-repair");

    let mut editor = GalleryEditor::open(&coordinator, &gallery, service.clone());
    let report = editor
        .add_images(
            vec![GalleryImage::new(photo("before.jpg")), GalleryImage::new(photo("after.jpg"))],
            UploadOptions::new(),
        )
        .await
        .unwrap();

    let staged = report.batch.accepted_urls();
    assert_eq!(staged.len(), 2);
    assert!(report.created.is_empty());
    assert!(report.commit.is_none());
    assert_eq!(
        report.record_failures.iter().map(|f| f.url.clone()).collect::<Vec<_>>(),
        staged
    );
    assert!(report.cleanup_error.unwrap().contains("timed out"));
    assert_eq!(editor.session().pending_count(), 2);
    assert_eq!(transport.inner.len(), 2);

    gallery.unreadable.store(false, Ordering::SeqCst);
    let cleanup = editor.close().await.unwrap();
    assert_eq!(cleanup.deleted_urls(), staged);
    assert!(transport.inner.is_empty());
    assert!(gallery.list(&service).await.unwrap().is_empty());
}

/// Closing an editor with staged but unused files deletes them.
#[tokio::test]
async fn closing_editor_discards_unsaved_uploads() {
    let transport = FlakyTransport::default();
    let coordinator = coordinator_over(transport.clone());
    let gallery = MemoryGalleryApi::new();
    let project = ParentRef::project("harbour-bridge");

    let mut session = coordinator.begin();
    let staged = coordinator
        .upload(&mut session, vec![photo("draft.jpg")], UploadOptions::new())
        .await
        .unwrap()
        .accepted_urls();

    let editor = GalleryEditor::with_session(&coordinator, &gallery, project, session);
    let report = editor.close().await.unwrap();

    assert_eq!(report.deleted_urls(), staged);
    assert!(transport.inner.is_empty());
}
