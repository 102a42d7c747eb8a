use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::transport::join_url;
use crate::{
    DefaultKeyStrategy, FileUpload, ProgressFn, SessionId, StagingError, StagingResult,
    TransportReceipt, UploadKeyStrategy, UploadTransport,
};

/// An object held by [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// In-process transport: durable for the lifetime of the process.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct MemoryTransport {
    base_url: String,
    keys: Arc<dyn UploadKeyStrategy>,
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_base_url("memory://uploads")
    }

    pub fn with_base_url<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            keys: Arc::new(DefaultKeyStrategy),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Is this URL currently stored?
    pub fn contains(&self, url: &str) -> bool {
        self.objects.lock().contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<StoredObject> {
        self.objects.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// All stored URLs, sorted
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.objects.lock().keys().cloned().collect();
        urls.sort();
        urls
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadTransport for MemoryTransport {
    async fn upload(
        &self,
        session_id: &SessionId,
        file: FileUpload,
        progress: ProgressFn,
    ) -> StagingResult<TransportReceipt> {
        progress(0);

        let key = self.keys.object_key(session_id, &file.name);
        let url = join_url(&self.base_url, &key);
        let size_bytes = file.size_bytes();
        let content_type = crate::mime::resolve(file.content_type.as_deref(), &file.name);

        self.objects.lock().insert(
            url.clone(),
            StoredObject {
                key,
                name: file.name.clone(),
                content_type: content_type.clone(),
                data: file.data,
            },
        );

        progress(100);

        Ok(TransportReceipt {
            url,
            name: file.name,
            size_bytes,
            content_type,
        })
    }

    async fn delete(&self, url: &str) -> StagingResult<()> {
        self.objects
            .lock()
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| StagingError::not_found(url))
    }
}
