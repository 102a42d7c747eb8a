use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    BatchProgress, CleanupFailure, CleanupReport, CommitLedger, CommitOutcome, FileOutcome,
    FileState, FileUpload, PreserveList, ProgressFn, SessionId, StagingConfig, StagingError,
    StagingResult, UploadBatch, UploadConstraints, UploadSession, UploadTransport,
    UploadedFileReference,
};

/// Batch progress callback
pub type BatchProgressFn = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Per-call knobs for [`StagingCoordinator::upload`]
#[derive(Clone, Default)]
pub struct UploadOptions {
    pub constraints: Option<UploadConstraints>,
    pub progress: Option<BatchProgressFn>,
    pub cancel: CancellationToken,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraints(mut self, constraints: UploadConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Mediates between "a file reached durable storage" and "a saved record
/// references the file".
///
/// The coordinator holds no sessions. Every operation takes the
/// [`UploadSession`] it works on, so one coordinator can serve any number of
/// concurrent editors.
pub struct StagingCoordinator {
    transport: Arc<dyn UploadTransport>,
    ledger: Option<Arc<dyn CommitLedger>>,
    config: StagingConfig,
}

impl StagingCoordinator {
    pub fn new<T: UploadTransport + 'static>(transport: T, config: StagingConfig) -> Self {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Create from an already shared transport
    pub fn with_transport(transport: Arc<dyn UploadTransport>, config: StagingConfig) -> Self {
        Self {
            transport,
            ledger: None,
            config,
        }
    }

    /// Report commits to a ledger before marking files committed
    pub fn with_ledger<L: CommitLedger + 'static>(self, ledger: L) -> Self {
        self.with_shared_ledger(Arc::new(ledger))
    }

    pub fn with_shared_ledger(mut self, ledger: Arc<dyn CommitLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn UploadTransport> {
        &self.transport
    }

    /// Open a new session with a fresh random id
    pub fn begin(&self) -> UploadSession {
        let session = UploadSession::new(SessionId::new());
        info!(session = %session.session_id, "upload session opened");
        session
    }

    /// Open a session under an id the caller already holds
    pub fn resume(&self, session_id: SessionId) -> UploadSession {
        debug!(session = %session_id, "upload session adopted");
        UploadSession::new(session_id)
    }

    /// Upload a batch of files into `session`.
    ///
    /// A batch that would exceed the file-count limit fails as a whole before
    /// anything is transferred. Files that break the type or size limits are
    /// reported as rejected and never reach the transport. Everything else is
    /// transferred concurrently; each file succeeds or fails on its own.
    #[instrument(skip_all, fields(session = %session.session_id, files = files.len()))]
    pub async fn upload(
        &self,
        session: &mut UploadSession,
        files: Vec<FileUpload>,
        options: UploadOptions,
    ) -> StagingResult<UploadBatch> {
        let mut constraints = options
            .constraints
            .clone()
            .unwrap_or_else(|| self.config.default_constraints.clone());
        if let Some(limit) = self.transport.capabilities().max_file_bytes {
            constraints.max_file_bytes = Some(constraints.max_file_bytes.map_or(limit, |own| own.min(limit)));
        }

        constraints
            .check_count(session.pending_count(), files.len())
            .map_err(StagingError::validation)?;

        let mut slots: Vec<Option<FileOutcome>> = Vec::with_capacity(files.len());
        let mut jobs = Vec::new();
        for (idx, file) in files.into_iter().enumerate() {
            match constraints.check_file(&file) {
                Ok(()) => {
                    slots.push(None);
                    jobs.push((idx, file));
                }
                Err(reason) => {
                    debug!(file = %file.name, %reason, "file rejected before upload");
                    slots.push(Some(FileOutcome::Rejected {
                        name: file.name,
                        reason,
                    }));
                }
            }
        }

        let tracker = options
            .progress
            .clone()
            .map(|callback| Arc::new(ProgressTracker::new(&jobs, callback)));

        let session_id = session.session_id.clone();
        let cancel = options.cancel.clone();
        let transfers = stream::iter(jobs.into_iter().enumerate())
            .map(|(slot, (idx, file))| {
                let transport = Arc::clone(&self.transport);
                let session_id = session_id.clone();
                let cancel = cancel.clone();
                let progress = match &tracker {
                    Some(tracker) => tracker.file_progress(slot),
                    None => crate::transport::no_progress(),
                };
                async move {
                    let name = file.name.clone();
                    let content_type = file.content_type.clone();
                    if cancel.is_cancelled() {
                        return (idx, name, content_type, Err(StagingError::Cancelled));
                    }
                    // a finished transfer wins over a cancellation racing it
                    let result = tokio::select! {
                        biased;
                        res = transport.upload(&session_id, file, progress) => res,
                        _ = cancel.cancelled() => Err(StagingError::Cancelled),
                    };
                    (idx, name, content_type, result)
                }
            })
            .buffered(self.config.max_concurrent_uploads.max(1))
            .collect::<Vec<_>>()
            .await;

        let now = chrono::Utc::now().timestamp();
        for (idx, name, content_type, result) in transfers {
            let outcome = match result {
                Ok(receipt) => {
                    let file = UploadedFileReference {
                        url: receipt.url,
                        name: receipt.name,
                        size_bytes: receipt.size_bytes,
                        content_type: receipt.content_type.or(content_type),
                        session_id: session.session_id.clone(),
                        state: FileState::Pending,
                        uploaded_at: now,
                    };
                    debug!(file = %file.name, url = %file.url, "file staged");
                    session.track(file.clone());
                    FileOutcome::Accepted(file)
                }
                Err(StagingError::Cancelled) => FileOutcome::Cancelled { name },
                Err(e) => {
                    warn!(file = %name, error = %e, "file upload failed");
                    FileOutcome::Failed {
                        name,
                        error: e.to_string(),
                    }
                }
            };
            slots[idx] = Some(outcome);
        }

        let batch = UploadBatch {
            outcomes: slots.into_iter().flatten().collect(),
        };
        info!(
            accepted = batch.accepted().len(),
            rejected = batch.rejected_count(),
            failed = batch.failed_count(),
            cancelled = batch.cancelled_count(),
            "upload batch finished"
        );
        Ok(batch)
    }

    /// Mark staged files as committed.
    ///
    /// Call only after the content record referencing the files was saved.
    /// `None` commits every pending file of the session. A ledger failure does
    /// not fail the call: the files stay pending and the error is returned in
    /// the outcome.
    #[instrument(skip_all, fields(session = %session.session_id))]
    pub async fn commit(&self, session: &mut UploadSession, urls: Option<&[String]>) -> CommitOutcome {
        let requested: Vec<String> = match urls {
            Some(urls) => urls.to_vec(),
            None => session.pending_urls(),
        };

        let mut outcome = CommitOutcome::default();
        let mut known = Vec::new();
        for url in requested {
            if session.get(&url).is_some() {
                if !known.contains(&url) {
                    known.push(url);
                }
            } else {
                debug!(%url, "commit requested for a file outside the session");
                outcome.unknown.push(url);
            }
        }

        let to_commit: Vec<String> = known
            .iter()
            .filter(|url| session.get(url).map_or(false, |f| f.is_pending()))
            .cloned()
            .collect();

        let confirmed = match (&self.ledger, to_commit.is_empty()) {
            (_, true) => Vec::new(),
            (None, false) => to_commit,
            (Some(ledger), false) => match ledger.commit(&session.session_id, &to_commit).await {
                Ok(confirmed) => confirmed
                    .into_iter()
                    .filter(|url| to_commit.contains(url))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, files = to_commit.len(), "commit ledger failed; files stay pending");
                    outcome.ledger_error = Some(e.to_string());
                    Vec::new()
                }
            },
        };

        let now = chrono::Utc::now().timestamp();
        for url in &confirmed {
            if let Some(file) = session.get_mut(url) {
                file.state = FileState::Committed { committed_at: now };
            }
        }

        outcome.committed = known
            .into_iter()
            .filter(|url| session.get(url).map_or(false, |f| f.is_committed()))
            .collect();

        info!(
            committed = outcome.committed.len(),
            unknown = outcome.unknown.len(),
            "upload session committed"
        );
        outcome
    }

    /// Delete every pending file of the session that is not on the preserve
    /// list.
    ///
    /// Committed files are never touched. A failed deletion leaves its file
    /// pending, so calling cleanup again retries it; once everything is gone
    /// further calls delete nothing.
    #[instrument(skip_all, fields(session = %session.session_id, preserve = preserve.len()))]
    pub async fn cleanup(&self, session: &mut UploadSession, preserve: &PreserveList) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut doomed = Vec::new();

        for file in &session.files {
            if file.is_committed() || preserve.contains(&file.url) {
                report.preserved.push(file.url.clone());
            } else if file.is_pending() {
                doomed.push(file.url.clone());
            }
        }

        let results = stream::iter(doomed)
            .map(|url| {
                let transport = Arc::clone(&self.transport);
                async move {
                    let result = transport.delete(&url).await;
                    (url, result)
                }
            })
            .buffered(self.config.max_concurrent_uploads.max(1))
            .collect::<Vec<_>>()
            .await;

        let now = chrono::Utc::now().timestamp();
        for (url, result) in results {
            match result {
                // already gone remotely counts as reclaimed
                Ok(()) | Err(StagingError::NotFound { .. }) => {
                    if let Some(mut file) = session.forget(&url) {
                        file.state = FileState::Deleted { deleted_at: now };
                        report.deleted.push(file);
                    }
                }
                Err(e) => {
                    warn!(%url, error = %e, "failed to delete staged file");
                    report.failed.push(CleanupFailure {
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        let counts = report.counts();
        info!(
            deleted = counts.deleted_count,
            preserved = counts.preserved_count,
            failed = counts.failed_count,
            "upload session cleaned up"
        );
        report
    }
}

/// Turns per-file percentages into a size-weighted batch percentage
struct ProgressTracker {
    names: Vec<String>,
    sizes: Vec<u64>,
    total: u64,
    percents: Mutex<Vec<u8>>,
    callback: BatchProgressFn,
}

impl ProgressTracker {
    fn new(jobs: &[(usize, FileUpload)], callback: BatchProgressFn) -> Self {
        let sizes: Vec<u64> = jobs.iter().map(|(_, f)| f.size_bytes().max(1)).collect();
        Self {
            names: jobs.iter().map(|(_, f)| f.name.clone()).collect(),
            total: sizes.iter().sum(),
            percents: Mutex::new(vec![0; sizes.len()]),
            sizes,
            callback,
        }
    }

    fn file_progress(self: &Arc<Self>, slot: usize) -> ProgressFn {
        let tracker = Arc::clone(self);
        Arc::new(move |percent| tracker.report(slot, percent))
    }

    fn report(&self, slot: usize, percent: u8) {
        let percent = percent.min(100);
        let batch_percent = {
            let mut percents = self.percents.lock();
            percents[slot] = percent;
            let done: u64 = percents
                .iter()
                .zip(&self.sizes)
                .map(|(p, size)| u64::from(*p) * size)
                .sum();
            (done / self.total.max(1)) as u8
        };
        (self.callback)(BatchProgress {
            file_name: self.names[slot].clone(),
            file_percent: percent,
            batch_percent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryCommitLedger, MemoryTransport};
    use async_trait::async_trait;
    use tracing_test::traced_test;

    struct OfflineLedger;

    #[async_trait]
    impl CommitLedger for OfflineLedger {
        async fn commit(&self, _session_id: &SessionId, _urls: &[String]) -> StagingResult<Vec<String>> {
            Err(StagingError::transport("ledger offline"))
        }
    }

    fn photo(name: &str) -> FileUpload {
        FileUpload::new(name, vec![7u8; 32]).with_content_type("image/jpeg")
    }

    async fn staged(coordinator: &StagingCoordinator, names: &[&str]) -> (UploadSession, Vec<String>) {
        let mut session = coordinator.begin();
        let files = names.iter().map(|n| photo(n)).collect();
        let batch = coordinator
            .upload(&mut session, files, UploadOptions::new())
            .await
            .unwrap();
        let urls = batch.accepted_urls();
        (session, urls)
    }

    #[tokio::test]
    async fn commit_without_urls_commits_all_pending() {
        let coordinator = StagingCoordinator::new(MemoryTransport::new(), StagingConfig::default());
        let (mut session, urls) = staged(&coordinator, &["a.jpg", "b.jpg"]).await;

        let outcome = coordinator.commit(&mut session, None).await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.committed, urls);
        assert!(session.is_settled());
        assert_eq!(session.committed_urls(), urls);
    }

    #[tokio::test]
    async fn commit_reports_foreign_urls_and_is_repeatable() {
        let ledger = MemoryCommitLedger::new();
        let coordinator = StagingCoordinator::new(MemoryTransport::new(), StagingConfig::default())
            .with_ledger(ledger.clone());
        let (mut session, urls) = staged(&coordinator, &["a.jpg"]).await;

        let request = vec![urls[0].clone(), "https://elsewhere/x.jpg".to_string()];
        let first = coordinator.commit(&mut session, Some(request.as_slice())).await;
        let second = coordinator.commit(&mut session, Some(request.as_slice())).await;

        assert_eq!(first.committed, vec![urls[0].clone()]);
        assert_eq!(first.unknown, vec!["https://elsewhere/x.jpg".to_string()]);
        assert_eq!(second.committed, first.committed);
        assert!(ledger.is_committed(&urls[0]));
    }

    #[tokio::test]
    #[traced_test]
    async fn ledger_failure_is_logged_and_leaves_files_pending() {
        let coordinator = StagingCoordinator::new(MemoryTransport::new(), StagingConfig::default())
            .with_ledger(OfflineLedger);
        let (mut session, urls) = staged(&coordinator, &["a.jpg"]).await;

        let outcome = coordinator.commit(&mut session, Some(urls.as_slice())).await;

        assert!(!outcome.is_ok());
        assert!(outcome.committed.is_empty());
        assert!(outcome.ledger_error.unwrap().contains("ledger offline"));
        assert_eq!(session.pending_urls(), urls);
        assert!(logs_contain("commit ledger failed"));
    }

    #[tokio::test]
    async fn stale_commit_is_still_protected_by_a_live_preserve_list() {
        let transport = MemoryTransport::new();
        let coordinator = StagingCoordinator::new(transport.clone(), StagingConfig::default())
            .with_ledger(OfflineLedger);
        let (mut session, urls) = staged(&coordinator, &["a.jpg"]).await;
        coordinator.commit(&mut session, Some(urls.as_slice())).await;

        // the record referencing the file exists even though the commit failed
        let preserve = PreserveList::from_urls(urls.clone());
        let report = coordinator.cleanup(&mut session, &preserve).await;

        assert!(report.deleted.is_empty());
        assert!(transport.contains(&urls[0]));
    }

    #[tokio::test]
    async fn count_limit_rejects_whole_batch_before_transfer() {
        let transport = MemoryTransport::new();
        let coordinator = StagingCoordinator::new(transport.clone(), StagingConfig::default());
        let mut session = coordinator.begin();
        let options = UploadOptions::new().with_constraints(UploadConstraints::new().with_max_files(1));

        let result = coordinator
            .upload(&mut session, vec![photo("a.jpg"), photo("b.jpg")], options)
            .await;

        assert!(matches!(result, Err(StagingError::Validation { .. })));
        assert!(transport.is_empty());
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn bad_files_are_rejected_without_blocking_the_rest() {
        let transport = MemoryTransport::new();
        let coordinator = StagingCoordinator::new(transport.clone(), StagingConfig::default());
        let mut session = coordinator.begin();

        let batch = coordinator
            .upload(
                &mut session,
                vec![
                    FileUpload::new("spec.pdf", vec![1u8; 8]),
                    photo("ok.jpg"),
                    FileUpload::new("huge.png", vec![0u8; 11 * 1024 * 1024]),
                ],
                UploadOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(batch.rejected_count(), 2);
        assert_eq!(batch.accepted().len(), 1);
        assert_eq!(batch.outcomes[1].name(), "ok.jpg");
        assert_eq!(transport.len(), 1);
    }

    struct SmallFilesOnly(MemoryTransport);

    #[async_trait]
    impl UploadTransport for SmallFilesOnly {
        async fn upload(
            &self,
            session_id: &SessionId,
            file: FileUpload,
            progress: ProgressFn,
        ) -> StagingResult<crate::TransportReceipt> {
            self.0.upload(session_id, file, progress).await
        }

        async fn delete(&self, url: &str) -> StagingResult<()> {
            self.0.delete(url).await
        }

        fn capabilities(&self) -> crate::TransportCapabilities {
            crate::TransportCapabilities::basic().with_max_file_bytes(16)
        }
    }

    #[tokio::test]
    async fn transport_size_limit_tightens_constraints() {
        let coordinator = StagingCoordinator::new(SmallFilesOnly(MemoryTransport::new()), StagingConfig::default());
        let mut session = coordinator.begin();

        let batch = coordinator
            .upload(
                &mut session,
                vec![photo("big.jpg"), FileUpload::new("tiny.jpg", vec![1u8; 8])],
                UploadOptions::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            &batch.outcomes[0],
            FileOutcome::Rejected { reason: crate::RejectReason::TooLarge { max_bytes: 16, .. }, .. }
        ));
        assert!(matches!(batch.outcomes[1], FileOutcome::Accepted(_)));
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred_percent() {
        let coordinator = StagingCoordinator::new(MemoryTransport::new(), StagingConfig::default());
        let mut session = coordinator.begin();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = UploadOptions::new().with_progress(move |p: BatchProgress| sink.lock().push(p.batch_percent));

        coordinator
            .upload(&mut session, vec![photo("a.jpg"), photo("b.jpg")], options)
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last().copied(), Some(100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn cleanup_counts_committed_files_as_preserved() {
        let transport = MemoryTransport::new();
        let coordinator = StagingCoordinator::new(transport.clone(), StagingConfig::default());
        let (mut session, urls) = staged(&coordinator, &["a.jpg", "b.jpg", "c.jpg"]).await;
        coordinator.commit(&mut session, Some(&urls[..1])).await;

        let report = coordinator
            .cleanup(&mut session, &PreserveList::new().with(urls[1].clone()))
            .await;

        let counts = report.counts();
        assert_eq!(counts.deleted_count, 1);
        assert_eq!(counts.preserved_count, 2);
        assert_eq!(counts.failed_count, 0);
        assert_eq!(report.deleted[0].url, urls[2]);
        assert!(matches!(report.deleted[0].state, FileState::Deleted { .. }));
        assert!(session.get(&urls[2]).is_none());
        assert_eq!(transport.len(), 2);
    }
}
