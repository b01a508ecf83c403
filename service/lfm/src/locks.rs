use crate::validate::Tag;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Holding a TagGuard grants exclusive use of `<data root>/<tag>` until it is dropped.
pub type TagGuard = OwnedMutexGuard<()>;

/// TagLocks hands out one async lock per tag. Every operation that creates, fills, moves or
/// removes a tag directory holds the lock of that tag for its whole duration, so two builds of
/// the same image (or an upload racing a rename) can never interleave on disk.
///
/// Locks are created on first use and forgotten once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct TagLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl TagLocks {
    pub fn new() -> TagLocks {
        TagLocks::default()
    }

    pub async fn lock(&self, tag: &Tag) -> TagGuard {
        self.entry(tag).lock_owned().await
    }

    /// Locks two tags at once. They are always taken in the same (sorted) order, so that a
    /// rename of A to B and a rename of B to A cannot deadlock one another.
    pub async fn lock_both(&self, a: &Tag, b: &Tag) -> Vec<TagGuard> {
        if a == b {
            return vec![self.lock(a).await];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        vec![first, second]
    }

    fn entry(&self, tag: &Tag) -> Arc<AsyncMutex<()>> {
        // Nothing is ever left half-updated under this mutex, so a poisoned map is still sound.
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(tag.as_str().to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// How many callers hold or wait for the lock of a tag.
    #[cfg(test)]
    pub(crate) fn contenders(&self, tag: &Tag) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(tag.as_str())
            .map_or(0, |lock| Arc::strong_count(lock) - 1)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
