use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{SessionId, StagingResult};

/// Remote bookkeeping of which staged URLs were committed.
///
/// This is the commit endpoint the coordinator reports to after a content
/// record referencing the files has been saved.
#[async_trait]
pub trait CommitLedger: Send + Sync {
    /// Record `urls` as committed for `session_id`; returns the URLs the
    /// ledger confirmed.
    async fn commit(&self, session_id: &SessionId, urls: &[String]) -> StagingResult<Vec<String>>;
}

/// In-memory commit ledger
#[derive(Clone, Default)]
pub struct MemoryCommitLedger {
    committed: Arc<Mutex<HashMap<SessionId, BTreeSet<String>>>>,
}

impl MemoryCommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is `url` committed under any session?
    pub fn is_committed(&self, url: &str) -> bool {
        self.committed.lock().values().any(|urls| urls.contains(url))
    }
}

#[async_trait]
impl CommitLedger for MemoryCommitLedger {
    async fn commit(&self, session_id: &SessionId, urls: &[String]) -> StagingResult<Vec<String>> {
        let mut committed = self.committed.lock();
        let entry = committed.entry(session_id.clone()).or_default();
        entry.extend(urls.iter().cloned());
        Ok(urls.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commits_confirm_every_requested_url() {
        let ledger = MemoryCommitLedger::new();
        let a = SessionId::new();
        let b = SessionId::new();

        ledger.commit(&a, &["u1".to_string()]).await.unwrap();
        let confirmed = ledger
            .commit(&b, &["u2".to_string(), "u1".to_string()])
            .await
            .unwrap();

        assert_eq!(confirmed, vec!["u2", "u1"]);
        assert!(ledger.is_committed("u1"));
        assert!(ledger.is_committed("u2"));
        assert!(!ledger.is_committed("u3"));
    }
}
