//! # Durable Deduplicated Work Queue
//!
//! The queue survives invocations by living entirely in the key-value store,
//! as two independently keyed JSON blobs:
//!
//! - `queue_state` — the full ordered item list, rewritten wholesale on every
//!   mutation (the store has no partial update).
//! - `queue_member_ids` — the membership index, a set of every queued id.
//!
//! ## Why a Separate Membership Index?
//!
//! Duplicate detection runs on every enqueue, and deserializing the whole
//! queue blob just to answer "is this id already here?" is O(n) in queue size
//! and in serialization cost. The id set is a fraction of the blob, so the
//! duplicate check stays O(1)-ish regardless of how fat the items are. The
//! price is a consistency obligation: every path that adds or removes items
//! must update the index in the same logical transaction.
//!
//! ## Ordering and Dedup Policy
//!
//! Reads always return items sorted ascending by timestamp; same-millisecond
//! ties keep their original enqueue order (stable sort over an append-ordered
//! list). A duplicate id on enqueue is a **no-op** — the first write wins and
//! the stored payload is never overwritten. This is what makes client retries
//! under at-least-once delivery safe.
//!
//! ## Transaction Shape
//!
//! Every public mutation is one load, an in-memory edit, and one commit per
//! touched blob. There are no incremental read-modify-write chains inside a
//! single operation, which both minimizes redundant serialization and keeps
//! the race window (two invocations racing on the same key, last writer wins)
//! as small as this storage model allows. The surrounding
//! [`RequestLock`](crate::lock::RequestLock) exists to bound that window; the
//! queue itself does not retake it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::kv::PersistentKv;
use crate::types::{now_unix_ms, ItemId, QueueItem};

/// Key holding the serialized queue body.
pub const QUEUE_STATE_KEY: &str = "queue_state";

/// Key holding the serialized membership index.
pub const QUEUE_MEMBER_KEY: &str = "queue_member_ids";

/// The persisted, timestamp-ordered, id-deduplicated work queue.
#[derive(Clone)]
pub struct DurableQueue {
    kv: Arc<dyn PersistentKv>,
}

impl DurableQueue {
    /// Creates a queue over the shared key-value store.
    pub fn new(kv: Arc<dyn PersistentKv>) -> Self {
        Self { kv }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Enqueues one item. Returns `false` (and changes nothing) when the
    /// item's id is already registered.
    ///
    /// An item arriving without a timestamp is stamped with the current time
    /// before it is persisted.
    pub fn enqueue(&self, item: QueueItem) -> Result<bool> {
        let mut ids = self.load_ids()?;
        if ids.contains(item.id.as_str()) {
            debug!(id = %item.id, "duplicate enqueue ignored");
            return Ok(false);
        }

        let mut item = item;
        if item.timestamp_ms.is_none() {
            item.timestamp_ms = Some(now_unix_ms());
        }

        let mut items = self.load_items()?;
        ids.insert(item.id.as_str().to_string());
        items.push(item);

        self.commit_items(items)?;
        self.commit_ids(&ids)?;
        Ok(true)
    }

    /// Enqueues a batch with per-item dedup semantics and a single persisted
    /// write of the queue body at the end. Returns how many items were
    /// actually accepted.
    pub fn enqueue_many(&self, batch: Vec<QueueItem>) -> Result<usize> {
        let mut ids = self.load_ids()?;
        let mut items = self.load_items()?;
        let mut accepted = 0;

        for mut item in batch {
            if ids.contains(item.id.as_str()) {
                debug!(id = %item.id, "duplicate enqueue ignored");
                continue;
            }
            if item.timestamp_ms.is_none() {
                item.timestamp_ms = Some(now_unix_ms());
            }
            ids.insert(item.id.as_str().to_string());
            items.push(item);
            accepted += 1;
        }

        self.commit_items(items)?;
        self.commit_ids(&ids)?;
        Ok(accepted)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Full queue contents, sorted ascending by timestamp. Idempotent read,
    /// no mutation.
    pub fn snapshot(&self) -> Result<Vec<QueueItem>> {
        let mut items = self.load_items()?;
        sort_and_dedupe(&mut items);
        Ok(items)
    }

    /// Queued items of one operation kind, sorted ascending by timestamp.
    pub fn by_kind(&self, kind: &str) -> Result<Vec<QueueItem>> {
        let mut items = self.snapshot()?;
        items.retain(|item| item.kind == kind);
        Ok(items)
    }

    /// Number of queued items.
    pub fn size(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }

    /// Whether `id` is currently registered in the membership index.
    pub fn contains(&self, id: &ItemId) -> Result<bool> {
        Ok(self.load_ids()?.contains(id.as_str()))
    }

    /// Every registered id, in sorted order.
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self.load_ids()?.into_iter().collect())
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes exactly the items whose ids appear in `ids`, preserving the
    /// relative order of everything else, and deregisters the removed ids.
    /// Returns the number of items removed.
    pub fn remove_many(&self, ids: &[ItemId]) -> Result<usize> {
        let mut registered = self.load_ids()?;
        let mut items = self.load_items()?;

        let before = items.len();
        items.retain(|item| !ids.contains(&item.id));
        let removed = before - items.len();

        for id in ids {
            registered.remove(id.as_str());
        }

        self.commit_items(items)?;
        self.commit_ids(&registered)?;
        debug!(removed, "items removed from queue");
        Ok(removed)
    }

    /// Drops the entire queue body and membership index.
    pub fn clear(&self) -> Result<()> {
        self.kv.delete(QUEUE_STATE_KEY)?;
        self.kv.delete(QUEUE_MEMBER_KEY)?;
        Ok(())
    }

    // =========================================================================
    // Blob I/O
    // =========================================================================

    fn load_items(&self) -> Result<Vec<QueueItem>> {
        match self.kv.get(QUEUE_STATE_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Persists the full queue body, sorted and deduplicated. Wholesale
    /// overwrite; the previous blob is gone after this returns.
    fn commit_items(&self, mut items: Vec<QueueItem>) -> Result<()> {
        sort_and_dedupe(&mut items);
        self.kv
            .set(QUEUE_STATE_KEY, &serde_json::to_string(&items)?)
    }

    fn load_ids(&self) -> Result<BTreeSet<String>> {
        match self.kv.get(QUEUE_MEMBER_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn commit_ids(&self, ids: &BTreeSet<String>) -> Result<()> {
        self.kv
            .set(QUEUE_MEMBER_KEY, &serde_json::to_string(ids)?)
    }
}

/// Sorts ascending by timestamp (stable, so ties keep enqueue order) and
/// drops any duplicate ids, keeping the first occurrence. Runs on every
/// commit, so a blob that picked up a duplicate through a racing writer
/// heals on the next write.
fn sort_and_dedupe(items: &mut Vec<QueueItem>) {
    let mut seen = BTreeSet::new();
    items.retain(|item| seen.insert(item.id.as_str().to_string()));
    items.sort_by_key(QueueItem::sort_key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::types::Row;

    fn queue() -> DurableQueue {
        DurableQueue::new(Arc::new(MemoryKv::new()))
    }

    fn item(id: &str, ts: u64) -> QueueItem {
        QueueItem::new(id, "insertRow", Row::new()).with_timestamp(ts)
    }

    #[test]
    fn enqueue_assigns_missing_timestamps() {
        let q = queue();
        q.enqueue(QueueItem::new("a", "insertRow", Row::new()))
            .unwrap();
        let items = q.snapshot().unwrap();
        assert!(items[0].timestamp_ms.is_some());
    }

    #[test]
    fn ties_keep_enqueue_order() {
        let q = queue();
        q.enqueue(item("first", 500)).unwrap();
        q.enqueue(item("second", 500)).unwrap();
        q.enqueue(item("third", 500)).unwrap();
        let ids: Vec<_> = q
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|i| i.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn membership_index_tracks_contents() {
        let q = queue();
        q.enqueue(item("a", 1)).unwrap();
        q.enqueue(item("b", 2)).unwrap();
        assert!(q.contains(&ItemId::new("a")).unwrap());

        q.remove_many(&[ItemId::new("a")]).unwrap();
        assert!(!q.contains(&ItemId::new("a")).unwrap());
        assert!(q.contains(&ItemId::new("b")).unwrap());

        q.clear().unwrap();
        assert!(!q.contains(&ItemId::new("b")).unwrap());
        assert_eq!(q.size().unwrap(), 0);
    }

    #[test]
    fn by_kind_filters_and_sorts() {
        let q = queue();
        q.enqueue(item("a", 30)).unwrap();
        q.enqueue(QueueItem::new("b", "other", Row::new()).with_timestamp(10))
            .unwrap();
        q.enqueue(item("c", 20)).unwrap();

        let rows = q.by_kind("insertRow").unwrap();
        let ids: Vec<_> = rows.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }
}
