use std::collections::HashMap;
use std::sync::Arc;

use keystone_staging::{
    GalleryApi, MemoryCommitLedger, MemoryGalleryApi, MemoryTransport, S3Transport, SessionId,
    StagingCoordinator, StagingError, StagingResult, UploadSession,
};
use parking_lot::Mutex;
use tracing::info;

use crate::config::{ServerConfig, StorageBackend};

/// A session shared between requests. Requests for one session run one at a
/// time; different sessions never wait on each other.
pub type SharedSession = Arc<tokio::sync::Mutex<UploadSession>>;

/// Open upload sessions, keyed by id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; an id already in use is rejected
    pub fn open(&self, session: UploadSession) -> StagingResult<SharedSession> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session.session_id) {
            return Err(StagingError::invalid(format!(
                "session {} is already open",
                session.session_id
            )));
        }
        let id = session.session_id.clone();
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        sessions.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    pub fn get(&self, id: &SessionId) -> StagingResult<SharedSession> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StagingError::not_found(id.as_str()))
    }

    /// Forget a session once nothing in it needs cleanup any more
    pub fn retire(&self, id: &SessionId) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Everything a handler needs, cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<StagingCoordinator>,
    pub gallery: Arc<dyn GalleryApi>,
    pub sessions: SessionRegistry,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        coordinator: StagingCoordinator,
        gallery: Arc<dyn GalleryApi>,
        config: ServerConfig,
    ) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            gallery,
            sessions: SessionRegistry::new(),
            config: Arc::new(config),
        }
    }

    /// In-memory storage, gallery and ledger
    pub fn in_memory(config: ServerConfig) -> Self {
        let transport = match config.get("storage.public_url") {
            Some(url) => MemoryTransport::with_base_url(url),
            None => MemoryTransport::new(),
        };
        let coordinator = StagingCoordinator::new(transport, config.staging_config())
            .with_ledger(MemoryCommitLedger::new());
        Self::new(coordinator, Arc::new(MemoryGalleryApi::new()), config)
    }

    /// Pick the storage backend named by `storage.backend`
    pub async fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        match config.storage_backend()? {
            StorageBackend::Memory => {
                info!("using in-memory upload storage");
                Ok(Self::in_memory(config))
            }
            StorageBackend::S3 => {
                let transport = S3Transport::from_env().await?;
                info!("using S3 upload storage");
                let coordinator = StagingCoordinator::new(transport, config.staging_config())
                    .with_ledger(MemoryCommitLedger::new());
                Ok(Self::new(coordinator, Arc::new(MemoryGalleryApi::new()), config))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_duplicate_ids_and_retires() {
        let registry = SessionRegistry::new();
        let id = SessionId::from_string("ses_fixed".to_string());

        registry.open(UploadSession::new(id.clone())).unwrap();
        assert!(registry.open(UploadSession::new(id.clone())).is_err());
        assert!(registry.get(&id).is_ok());

        assert!(registry.retire(&id));
        assert!(matches!(registry.get(&id), Err(StagingError::NotFound { .. })));
        assert!(registry.is_empty());
    }
}
