//! # Batch Processor
//!
//! Drains the durable queue into the external tabular store. The whole point
//! of queueing writes instead of applying them inline is this module: many
//! small inbound requests become one container lookup, one table lookup, and
//! one batched append per destination.
//!
//! ## Drain Pipeline
//!
//! ```text
//! snapshot ──► allow-list filter ──► group by (container, table)
//!                                         │
//!                    ┌────────────────────┴──── per group ────┐
//!                    │ ensure container (HandleCache, folder) │
//!                    │ ensure table     (configured schema)   │
//!                    │ one batched append of all group rows   │
//!                    │ remove exactly this group's ids        │
//!                    └─────────────────────────────────────────┘
//! ```
//!
//! ## Failure Isolation
//!
//! A failing step aborts only its own group; the group's items stay queued
//! and the drain moves on to the next group. Failures are logged and
//! swallowed — the remediation path is the next scheduled drain, not backoff
//! or alerting.
//!
//! ## Delivery Semantics
//!
//! At-least-once, not exactly-once. If the append succeeds but the removal
//! fails to persist, the next drain re-appends those rows. That window is
//! documented, not prevented; consumers that cannot tolerate duplicate rows
//! must deduplicate downstream.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::cache::HandleCache;
use crate::error::Result;
use crate::lock::RequestLock;
use crate::queue::DurableQueue;
use crate::types::{ItemId, QueueItem};

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for one drain run.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Operation kinds the processor recognizes; everything else is left
    /// queued untouched.
    pub kinds: Vec<String>,
    /// Header schema used when a destination table has to be created.
    pub columns: Vec<String>,
    /// Folder newly created containers are placed under.
    pub folder_name: String,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            kinds: vec!["insertRow".to_string(), "insertRowMany".to_string()],
            columns: Vec::new(),
            folder_name: "data".to_string(),
        }
    }
}

/// What one drain run accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Destination groups whose append and removal both succeeded.
    pub groups_written: usize,
    /// Destination groups that failed and were left queued.
    pub groups_failed: usize,
    /// Rows appended across all successful groups.
    pub rows_written: usize,
    /// Items removed from the queue.
    pub items_removed: usize,
}

// =============================================================================
// Processor
// =============================================================================

/// Drains the queue into the tabular store through the handle cache.
#[derive(Clone)]
pub struct BatchProcessor {
    queue: DurableQueue,
    cache: HandleCache,
}

impl BatchProcessor {
    /// Creates a processor over the shared queue and cache.
    pub fn new(queue: DurableQueue, cache: HandleCache) -> Self {
        Self { queue, cache }
    }

    /// Runs one drain pass.
    ///
    /// Per-group errors are logged and counted in the report, never
    /// propagated; the failed group's items remain queued for the next run.
    /// Only a snapshot failure (the queue blob itself unreadable) surfaces as
    /// an `Err`.
    pub fn drain(&self, config: &DrainConfig) -> Result<DrainReport> {
        let snapshot = self.queue.snapshot()?;
        let mut report = DrainReport::default();
        if snapshot.is_empty() {
            return Ok(report);
        }

        let default_name = date_name();
        let groups = group_by_destination(snapshot, config, &default_name);

        for ((container, table), items) in groups {
            match self.write_group(config, &container, &table, &items) {
                Ok(()) => {
                    let ids: Vec<ItemId> = items.iter().map(|item| item.id.clone()).collect();
                    match self.queue.remove_many(&ids) {
                        Ok(removed) => {
                            report.groups_written += 1;
                            report.rows_written += items.len();
                            report.items_removed += removed;
                            debug!(container, table, rows = items.len(), "group drained");
                        }
                        Err(err) => {
                            // Rows are already appended; the items will be
                            // re-appended next run. At-least-once in action.
                            report.groups_failed += 1;
                            warn!(container, table, %err, "group removal failed after append");
                        }
                    }
                }
                Err(err) => {
                    report.groups_failed += 1;
                    warn!(container, table, %err, "group write failed, items left queued");
                }
            }
        }

        Ok(report)
    }

    /// The scheduled entry point: takes the request lock with a fresh owner
    /// id, drains, and releases.
    ///
    /// A busy lock skips the run (`Ok(None)`) instead of erroring — the next
    /// trigger fires soon enough, and blocking a scheduled run behind a live
    /// request defeats the purpose of queueing.
    pub async fn run_scheduled(
        &self,
        lock: &RequestLock,
        config: &DrainConfig,
    ) -> Result<Option<DrainReport>> {
        let owner = format!("trigger_{}", uuid::Uuid::new_v4());
        match lock.acquire(&owner).await {
            Ok(()) => {}
            Err(crate::error::Error::LockTimeout { .. }) => {
                debug!("scheduled drain skipped, lock busy");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let outcome = self.drain(config);
        lock.release(&owner)?;
        outcome.map(Some)
    }

    fn write_group(
        &self,
        config: &DrainConfig,
        container: &str,
        table: &str,
        items: &[QueueItem],
    ) -> Result<()> {
        self.cache
            .resolve_or_create_container(container, Some(&config.folder_name))?;
        self.cache
            .resolve_or_create_table(container, table, &config.columns)?;
        let rows: Vec<_> = items.iter().map(|item| item.payload.clone()).collect();
        self.cache.append_rows(container, table, &rows)
    }
}

/// Applies the allow-list and groups items by resolved destination.
///
/// `BTreeMap` keeps group iteration deterministic; within a group, items stay
/// in snapshot (timestamp) order, so rows are appended oldest first.
fn group_by_destination(
    snapshot: Vec<QueueItem>,
    config: &DrainConfig,
    default_name: &str,
) -> BTreeMap<(String, String), Vec<QueueItem>> {
    let mut groups: BTreeMap<(String, String), Vec<QueueItem>> = BTreeMap::new();
    for item in snapshot {
        if !config.kinds.iter().any(|kind| *kind == item.kind) {
            continue;
        }
        let container = item
            .destination
            .container_name
            .clone()
            .unwrap_or_else(|| default_name.to_string());
        let table = item
            .destination
            .table_name
            .clone()
            .unwrap_or_else(|| default_name.to_string());
        groups.entry((container, table)).or_default().push(item);
    }
    groups
}

/// Default destination name: today's date as `YYYY-MM-DD`.
fn date_name() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
