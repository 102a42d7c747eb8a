use std::collections::BTreeSet;

use crate::gallery::{GalleryApi, GalleryEntry, ParentRef};
use crate::StagingResult;

/// URLs that cleanup must leave alone because a persisted record uses them.
///
/// Build it from the live state of the parent record ([`PreserveList::for_parent`])
/// rather than from session bookkeeping: a commit that failed to reach the
/// ledger still leaves the file in use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreserveList {
    urls: BTreeSet<String>,
}

impl PreserveList {
    /// Preserve nothing
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Every image URL of the given gallery entries
    pub fn from_entries(entries: &[GalleryEntry]) -> Self {
        Self::from_urls(entries.iter().map(|e| e.image_url.clone()))
    }

    /// The current in-use set of a parent record, read from the content API
    pub async fn for_parent(api: &dyn GalleryApi, parent: &ParentRef) -> StagingResult<Self> {
        let entries = api.list(parent).await?;
        Ok(Self::from_entries(&entries))
    }

    /// Union of the in-use sets of several parents
    pub async fn for_parents(api: &dyn GalleryApi, parents: &[ParentRef]) -> StagingResult<Self> {
        let mut list = Self::new();
        for parent in parents {
            list.merge(Self::for_parent(api, parent).await?);
        }
        Ok(list)
    }

    pub fn insert<S: Into<String>>(&mut self, url: S) {
        self.urls.insert(url.into());
    }

    pub fn with<S: Into<String>>(mut self, url: S) -> Self {
        self.insert(url);
        self
    }

    pub fn merge(&mut self, other: PreserveList) {
        self.urls.extend(other.urls);
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.urls.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for PreserveList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_urls(iter)
    }
}
