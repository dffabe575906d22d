//! Candidate sources of a stream
//!
//! Tracks every registered publisher of a stream and which one is the default.
//! The most recently registered source always becomes the default; removing
//! the default fails over to any remaining source.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::{FrameSource, SourceId};
use crate::media::Metadata;

#[derive(Default)]
struct Sources {
    sources: HashMap<SourceId, Arc<dyn FrameSource>>,
    /// Always a key of `sources`, `None` iff `sources` is empty
    default: Option<SourceId>,
}

/// Per-stream registry of candidate sources
#[derive(Default)]
pub struct SourceManager {
    inner: RwLock<Sources>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source and make it the default
    ///
    /// Returns `false` without changing anything if a source with the same id
    /// is already registered.
    pub fn add_if_not_exist(&self, source: Arc<dyn FrameSource>) -> bool {
        let mut inner = self.inner.write();
        let id = source.id();
        if inner.sources.contains_key(&id) {
            return false;
        }

        inner.sources.insert(id, source);
        inner.default = Some(id);
        true
    }

    /// Remove a source, failing over if it was the default
    pub fn remove_source(&self, id: SourceId) -> Option<Arc<dyn FrameSource>> {
        let mut inner = self.inner.write();
        let removed = inner.sources.remove(&id)?;

        if inner.default == Some(id) {
            inner.default = inner.sources.keys().next().copied();
            tracing::debug!(removed = %id, default = ?inner.default, "Default source failed over");
        }
        Some(removed)
    }

    /// Currently preferred source; `None` means no publisher yet
    pub fn default_source(&self) -> Option<Arc<dyn FrameSource>> {
        let inner = self.inner.read();
        inner.default.and_then(|id| inner.sources.get(&id).cloned())
    }

    pub fn default_source_id(&self) -> Option<SourceId> {
        self.inner.read().default
    }

    /// Union of every registered source's metadata
    ///
    /// The default source wins for kinds that several sources carry.
    pub fn metadata(&self) -> Metadata {
        let inner = self.inner.read();
        let default = inner.default.and_then(|id| inner.sources.get(&id));

        let mut metadata = default.map(|s| s.metadata()).unwrap_or_default();
        for (id, source) in &inner.sources {
            if Some(*id) != inner.default {
                metadata = metadata.union(&source.metadata());
            }
        }
        metadata
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<dyn FrameSource>> {
        self.inner.read().sources.get(&id).cloned()
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.inner.read().sources.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.inner.read().sources.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sources.is_empty()
    }
}

impl fmt::Debug for SourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SourceManager")
            .field("sources", &inner.sources.keys().collect::<Vec<_>>())
            .field("default", &inner.default)
            .finish()
    }
}
