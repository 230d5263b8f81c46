use super::StageFn;
use super::types::{StageId, StageKind};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A registered stage: the function to invoke plus its scheduling class.
pub struct StageEntry<S> {
    pub func: StageFn<S>,
    pub kind: StageKind,
    /// Source stages create new item chains and are admission-controlled by
    /// the token pool. Stage 0 of every run must be a source.
    pub is_source: bool,
}

impl<S> Clone for StageEntry<S> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            kind: self.kind,
            is_source: self.is_source,
        }
    }
}

/// Maps stage ids to registered stage functions.
///
/// Ids are handed out in registration order, which pipeline translation
/// relies on: the successor of a chain stage is always the next id. The
/// registry is per-run state and is cleared when the graph drains.
pub struct StageRegistry<S> {
    stages: DashMap<StageId, StageEntry<S>>,
    next_id: AtomicUsize,
}

impl<S> StageRegistry<S> {
    pub fn new() -> Self {
        Self {
            stages: DashMap::new(),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, func: StageFn<S>, kind: StageKind, is_source: bool) -> StageId {
        let id = StageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.stages.insert(
            id,
            StageEntry {
                func,
                kind,
                is_source,
            },
        );
        tracing::debug!(
            "registered {:?} stage {} (source: {})",
            kind,
            id.0,
            is_source
        );
        id
    }

    pub fn get(&self, id: StageId) -> Option<StageEntry<S>> {
        self.stages.get(&id).map(|entry| entry.value().clone())
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Drops all registrations and restarts id assignment. Called between
    /// runs so consecutive compositions never share stage ids.
    pub fn clear(&self) {
        self.stages.clear();
        self.next_id.store(0, Ordering::SeqCst);
    }
}

impl<S> Default for StageRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
