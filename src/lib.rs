//! # sheetq - Batching Write Queue for Slow Tabular Stores
//!
//! sheetq sits between bursty write traffic and a slow, rate-limited tabular
//! backing store (think: a spreadsheet service). It provides:
//!
//! - **Mutual exclusion** between overlapping invocations, built over a
//!   key-value store with no atomic primitives
//! - **Idempotent enqueue**: duplicate ids are no-ops, safe under
//!   at-least-once delivery
//! - **Batched drains**: one container lookup, one table lookup, and one
//!   batched append per destination, no matter how many requests queued
//! - **Handle caching**: logical-name → handle memoization plus lazy column
//!   indexes to avoid repeated linear scans
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Api (request path)                     │
//! │        parse → validate → lock → enqueue → release           │
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │                         ┌────────────────────┐
//!                 ▼                         │   TriggerManager   │
//! ┌──────────────────────────────┐          │  (interval tasks)  │
//! │         DurableQueue         │          └─────────┬──────────┘
//! │  queue blob + member index   │                    │
//! └───────────────┬──────────────┘                    ▼
//!                 │                  ┌───────────────────────────┐
//!                 └─────────────────►│      BatchProcessor       │
//!                                    │ snapshot → group → append │
//!                                    └─────────────┬─────────────┘
//!                                                  │
//!            ┌─────────────────────────────────────┤
//!            ▼                                     ▼
//! ┌──────────────────────┐          ┌──────────────────────────┐
//! │     HandleCache      │─────────►│ TabularStore / FileStore │
//! │ name→handle, indexes │          │   (external, opaque)     │
//! └──────────┬───────────┘          └──────────────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │     PersistentKv     │   lock record, queue blobs, caches
//! │ (shared, no CAS/TTL) │
//! └──────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Single unexpired lock record**: at most one lock record younger than
//!    the timeout exists at any instant
//! 2. **Idempotent enqueue**: an id already in the membership index is never
//!    enqueued again, and its stored payload is never overwritten
//! 3. **Timestamp ordering**: queue reads are sorted ascending by timestamp,
//!    ties in enqueue order
//! 4. **Index/queue consistency**: the membership index mirrors queue
//!    contents after every mutation
//! 5. **Group-scoped drains**: a failing destination group never blocks the
//!    others, and only a group whose append succeeded loses its items
//!
//! ## Delivery Semantics
//!
//! At-least-once. The append-then-remove sequence has a failure
//! window where rows land twice; the queue's id dedup protects the *enqueue*
//! side, not the destination table.

pub mod api;
pub mod cache;
pub mod error;
pub mod kv;
pub mod lock;
pub mod processor;
pub mod queue;
pub mod store;
pub mod trigger;
pub mod types;

pub use api::{Api, Operation, Response, DISPATCH_ORDER};
pub use cache::{HandleCache, IndexEntry};
pub use error::{Error, Result};
pub use kv::{KvQuotas, MemoryKv, PersistentKv, SqliteKv};
pub use lock::{LockConfig, RequestLock};
pub use processor::{BatchProcessor, DrainConfig, DrainReport};
pub use queue::DurableQueue;
pub use store::{FileStore, MemoryDrive, MemoryTabular, TabularStore};
pub use trigger::TriggerManager;
pub use types::{
    ContainerHandle, Destination, FolderHandle, Grid, ItemId, LockRecord, QueueItem, RequestId,
    Row,
};
