//! # Domain Types for sheetq
//!
//! This module defines the core types used throughout sheetq: queue items,
//! destinations, lock records, and the opaque handles returned by the external
//! stores.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! Opaque external identifiers are wrapped in single-field structs rather than
//! passed around as bare strings. A [`ContainerHandle`] cannot be confused
//! with a [`FolderHandle`] or with a logical container *name*, even though all
//! three are strings on the wire.
//!
//! ## Persisted Types
//!
//! [`QueueItem`] and [`LockRecord`] are persisted as JSON in the key-value
//! store, so they derive `Serialize`/`Deserialize`. Their wire field names use
//! camelCase to stay compatible with the JSON bodies clients already send.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A row as a column-name → value map.
///
/// Rows travel as JSON objects end to end: inbound request payloads, queued
/// item payloads, and the batched append into the tabular store all use this
/// shape. Column order is decided by the destination table's header, not by
/// the map.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A grid of cell values, header row first, as returned by range reads.
pub type Grid = Vec<Vec<serde_json::Value>>;

/// Milliseconds since the Unix epoch.
///
/// All queue ordering and lock expiry math uses this clock. Wall-clock
/// regressions are not defended against; the host environment is assumed to
/// have a monotonic-enough clock at millisecond granularity.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Identifiers and Handles
// =============================================================================

/// Unique identifier of a queued item.
///
/// Enqueue is idempotent on this id: a second enqueue with an id already in
/// the membership index is a no-op. Clients may supply their own ids for
/// at-least-once retry safety; otherwise a fresh UUID is assigned per item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an item id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random item id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the string representation of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one inbound request, echoed back in every response.
///
/// Also doubles as the lock owner id for the request's critical section, so
/// the format is stable: `req_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a fresh request id.
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4()))
    }

    /// Returns the string representation of this request id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of an external container (a spreadsheet-like grouping of
/// tables). Only the external store can mint these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Wraps a handle string minted by the external store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of an external folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderHandle(String);

impl FolderHandle {
    /// Wraps a handle string minted by the external store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Queue Items
// =============================================================================

/// Where a queued item wants its rows written.
///
/// Both parts are optional; the batch processor substitutes a date-derived
/// default (`YYYY-MM-DD`) for whichever part is missing at drain time, so
/// items with no destination land in "today's" container and table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Logical container name, if the client picked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Table name within the container, if the client picked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

impl Destination {
    /// A destination naming both parts explicitly.
    pub fn new(container_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            container_name: Some(container_name.into()),
            table_name: Some(table_name.into()),
        }
    }
}

/// One unit of queued work.
///
/// Persisted as JSON inside the queue-state blob. `timestamp_ms` is `None`
/// only transiently: [`DurableQueue::enqueue`](crate::queue::DurableQueue::enqueue)
/// assigns the current time to items that arrive without one, so every item
/// read back from the queue carries a concrete timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Unique item id; duplicate ids are dropped on enqueue.
    pub id: ItemId,
    /// Operation kind, matched against the drain allow-list.
    #[serde(rename = "type")]
    pub kind: String,
    /// Target container/table, defaulted at drain time when absent.
    #[serde(default)]
    pub destination: Destination,
    /// The row to append, as column-name → value.
    pub payload: Row,
    /// Enqueue timestamp in Unix milliseconds; assigned on enqueue if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

impl QueueItem {
    /// Creates an item with no explicit timestamp (enqueue assigns one).
    pub fn new(id: impl Into<ItemId>, kind: impl Into<String>, payload: Row) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            destination: Destination::default(),
            payload,
            timestamp_ms: None,
        }
    }

    /// Sets an explicit destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Sets an explicit timestamp (Unix milliseconds).
    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// The ordering key used everywhere the queue sorts.
    pub(crate) fn sort_key(&self) -> u64 {
        self.timestamp_ms.unwrap_or(0)
    }
}

// =============================================================================
// Lock Records
// =============================================================================

/// The singleton lock record stored under the lock key.
///
/// At most one *unexpired* record exists at any instant; a record older than
/// the lock timeout is dead weight that any acquirer may delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// The owner that wrote this record.
    pub owner_id: String,
    /// When the record was written, Unix milliseconds.
    pub acquired_at_ms: u64,
}

impl LockRecord {
    /// Age of this record relative to `now_ms`, saturating at zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.acquired_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_item_round_trips_through_json() {
        let mut payload = Row::new();
        payload.insert("dni".to_string(), serde_json::json!("88888888"));

        let item = QueueItem::new("item-1", "insertRow", payload)
            .with_destination(Destination::new("ops", "rows"))
            .with_timestamp(1234);

        let json = serde_json::to_string(&item).unwrap();
        // Wire names stay camelCase and "type" for client compatibility.
        assert!(json.contains("\"type\":\"insertRow\""));
        assert!(json.contains("\"containerName\":\"ops\""));

        let back: QueueItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn destination_omits_absent_parts() {
        let item = QueueItem::new("item-2", "insertRow", Row::new());
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("containerName"));
        assert!(!json.contains("timestampMs"));
    }

    #[test]
    fn lock_record_age_saturates() {
        let record = LockRecord {
            owner_id: "req_a".to_string(),
            acquired_at_ms: 1000,
        };
        assert_eq!(record.age_ms(4000), 3000);
        // A record "from the future" reads as age zero, not an underflow.
        assert_eq!(record.age_ms(500), 0);
    }

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert!(a.as_str().starts_with("req_"));
        assert_ne!(a, b);
    }
}
