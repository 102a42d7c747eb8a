//! Gallery entries of blog posts, projects and services, and the content
//! record API that persists them.
//!
//! The storage behind [`GalleryApi`] does not enforce the single-feature rule;
//! [`remove_entry`] and [`set_feature`] keep it.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{StagingError, StagingResult};

/// Kind of record that owns a gallery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentKind {
    Blog,
    Project,
    Service,
}

impl ParentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Blog => "blog",
            ParentKind::Project => "project",
            ParentKind::Service => "service",
        }
    }
}

impl FromStr for ParentKind {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blog" | "blogs" | "posts" => Ok(ParentKind::Blog),
            "project" | "projects" => Ok(ParentKind::Project),
            "service" | "services" => Ok(ParentKind::Service),
            other => Err(StagingError::invalid(format!("unknown gallery owner kind: {}", other))),
        }
    }
}

impl std::fmt::Display for ParentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record a gallery belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ParentKind,
    pub id: String,
}

impl ParentRef {
    pub fn new<S: Into<String>>(kind: ParentKind, id: S) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn blog<S: Into<String>>(id: S) -> Self {
        Self::new(ParentKind::Blog, id)
    }

    pub fn project<S: Into<String>>(id: S) -> Self {
        Self::new(ParentKind::Project, id)
    }

    pub fn service<S: Into<String>>(id: S) -> Self {
        Self::new(ParentKind::Service, id)
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A persisted gallery image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub id: String,
    pub parent: ParentRef,
    pub image_url: String,
    pub caption: Option<String>,
    pub display_order: i32,
    pub is_feature: bool,
}

/// Fields for creating a gallery entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGalleryEntry {
    #[serde(alias = "url")]
    pub image_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub is_feature: bool,
}

impl NewGalleryEntry {
    pub fn new<S: Into<String>>(image_url: S) -> Self {
        Self {
            image_url: image_url.into(),
            ..Self::default()
        }
    }

    pub fn with_caption<S: Into<String>>(mut self, caption: S) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_display_order(mut self, order: i32) -> Self {
        self.display_order = order;
        self
    }

    pub fn as_feature(mut self) -> Self {
        self.is_feature = true;
        self
    }
}

/// Partial update of a gallery entry; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntryPatch {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub display_order: Option<i32>,
    #[serde(default)]
    pub is_feature: Option<bool>,
}

impl GalleryEntryPatch {
    pub fn feature(is_feature: bool) -> Self {
        Self {
            is_feature: Some(is_feature),
            ..Self::default()
        }
    }
}

/// CRUD access to gallery entries (the content record API)
#[async_trait]
pub trait GalleryApi: Send + Sync {
    /// Entries of a parent, ordered by display order
    async fn list(&self, parent: &ParentRef) -> StagingResult<Vec<GalleryEntry>>;

    async fn create(&self, parent: &ParentRef, entry: NewGalleryEntry) -> StagingResult<GalleryEntry>;

    async fn update(&self, id: &str, patch: GalleryEntryPatch) -> StagingResult<GalleryEntry>;

    async fn delete(&self, id: &str) -> StagingResult<()>;
}

#[async_trait]
impl<T: GalleryApi + ?Sized> GalleryApi for Arc<T> {
    async fn list(&self, parent: &ParentRef) -> StagingResult<Vec<GalleryEntry>> {
        (**self).list(parent).await
    }

    async fn create(&self, parent: &ParentRef, entry: NewGalleryEntry) -> StagingResult<GalleryEntry> {
        (**self).create(parent, entry).await
    }

    async fn update(&self, id: &str, patch: GalleryEntryPatch) -> StagingResult<GalleryEntry> {
        (**self).update(id, patch).await
    }

    async fn delete(&self, id: &str) -> StagingResult<()> {
        (**self).delete(id).await
    }
}

/// In-memory gallery store. Entries keep insertion order, so equal display
/// orders list in the order they were created.
#[derive(Clone, Default)]
pub struct MemoryGalleryApi {
    entries: Arc<Mutex<Vec<GalleryEntry>>>,
}

impl MemoryGalleryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl GalleryApi for MemoryGalleryApi {
    async fn list(&self, parent: &ParentRef) -> StagingResult<Vec<GalleryEntry>> {
        let mut entries: Vec<GalleryEntry> = self
            .entries
            .lock()
            .iter()
            .filter(|e| &e.parent == parent)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.display_order);
        Ok(entries)
    }

    async fn create(&self, parent: &ParentRef, entry: NewGalleryEntry) -> StagingResult<GalleryEntry> {
        if entry.image_url.trim().is_empty() {
            return Err(StagingError::invalid("gallery entry needs an image url"));
        }

        let created = GalleryEntry {
            id: format!("gal_{}", Uuid::new_v4().simple()),
            parent: parent.clone(),
            image_url: entry.image_url,
            caption: entry.caption,
            display_order: entry.display_order,
            is_feature: entry.is_feature,
        };
        self.entries.lock().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, patch: GalleryEntryPatch) -> StagingResult<GalleryEntry> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StagingError::not_found(id))?;

        if let Some(caption) = patch.caption {
            entry.caption = Some(caption);
        }
        if let Some(order) = patch.display_order {
            entry.display_order = order;
        }
        if let Some(is_feature) = patch.is_feature {
            entry.is_feature = is_feature;
        }
        Ok(entry.clone())
    }

    async fn delete(&self, id: &str) -> StagingResult<()> {
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StagingError::not_found(id))?;
        entries.remove(idx);
        Ok(())
    }
}

/// Outcome of [`remove_entry`]
#[derive(Debug, Clone)]
pub struct RemovedEntry {
    pub removed: GalleryEntry,
    /// The entry that took over the feature flag, if any
    pub promoted: Option<GalleryEntry>,
}

/// Which remaining entry should become the feature after `removed` goes.
///
/// Only a removed feature entry triggers a promotion, and only when no other
/// entry already carries the flag. The pick is the first entry by display
/// order; equal orders fall back to the smaller id.
pub fn feature_successor<'a>(entries: &'a [GalleryEntry], removed: &GalleryEntry) -> Option<&'a GalleryEntry> {
    if !removed.is_feature {
        return None;
    }
    let remaining = entries.iter().filter(|e| e.id != removed.id);
    if remaining.clone().any(|e| e.is_feature) {
        return None;
    }
    remaining.min_by(|a, b| (a.display_order, &a.id).cmp(&(b.display_order, &b.id)))
}

/// Delete a gallery entry, passing the feature flag on when the feature
/// entry goes.
pub async fn remove_entry(
    api: &dyn GalleryApi,
    parent: &ParentRef,
    id: &str,
) -> StagingResult<RemovedEntry> {
    let entries = api.list(parent).await?;
    let removed = entries
        .iter()
        .find(|e| e.id == id)
        .cloned()
        .ok_or_else(|| StagingError::not_found(id))?;

    let successor = feature_successor(&entries, &removed).map(|e| e.id.clone());

    api.delete(id).await?;

    let promoted = match successor {
        Some(next) => {
            debug!(parent = %parent, entry = %next, "promoting gallery entry to feature");
            Some(api.update(&next, GalleryEntryPatch::feature(true)).await?)
        }
        None => None,
    };

    Ok(RemovedEntry { removed, promoted })
}

/// Make `id` the only feature entry of its gallery
pub async fn set_feature(api: &dyn GalleryApi, parent: &ParentRef, id: &str) -> StagingResult<GalleryEntry> {
    let entries = api.list(parent).await?;
    if !entries.iter().any(|e| e.id == id) {
        return Err(StagingError::not_found(id));
    }

    for other in entries.iter().filter(|e| e.is_feature && e.id != id) {
        api.update(&other.id, GalleryEntryPatch::feature(false)).await?;
    }
    api.update(id, GalleryEntryPatch::feature(true)).await
}

/// Display order for an entry appended to the gallery
pub async fn next_display_order(api: &dyn GalleryApi, parent: &ParentRef) -> StagingResult<i32> {
    let entries = api.list(parent).await?;
    Ok(entries.iter().map(|e| e.display_order + 1).max().unwrap_or(0))
}
