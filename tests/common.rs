#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sheetq::{
    BatchProcessor, DrainConfig, DurableQueue, HandleCache, LockConfig, MemoryDrive, MemoryKv,
    MemoryTabular, PersistentKv, QueueItem, RequestLock, Row,
};

/// Everything wired over one shared in-memory key-value store.
pub struct Harness {
    pub kv: Arc<dyn PersistentKv>,
    pub tabular: Arc<MemoryTabular>,
    pub drive: Arc<MemoryDrive>,
    pub lock: RequestLock,
    pub queue: DurableQueue,
    pub cache: HandleCache,
    pub processor: BatchProcessor,
}

pub fn harness() -> Harness {
    let kv: Arc<dyn PersistentKv> = Arc::new(MemoryKv::new());
    let tabular = Arc::new(MemoryTabular::new());
    let drive = Arc::new(MemoryDrive::new());
    let lock = RequestLock::with_config(kv.clone(), fast_lock_config());
    let queue = DurableQueue::new(kv.clone());
    let cache = HandleCache::new(kv.clone(), tabular.clone(), drive.clone());
    let processor = BatchProcessor::new(queue.clone(), cache.clone());
    Harness {
        kv,
        tabular,
        drive,
        lock,
        queue,
        cache,
        processor,
    }
}

/// Lock timings scaled down so timeout paths finish in milliseconds.
pub fn fast_lock_config() -> LockConfig {
    LockConfig {
        timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(5),
        verify_pause: Duration::from_millis(2),
        ..LockConfig::default()
    }
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    let mut row = Row::new();
    for (key, value) in pairs {
        row.insert(key.to_string(), value.clone());
    }
    row
}

pub fn insert_item(id: &str, ts: u64) -> QueueItem {
    QueueItem::new(id, "insertRow", row(&[("v", serde_json::json!(id))])).with_timestamp(ts)
}

pub fn drain_config(columns: &[&str]) -> DrainConfig {
    DrainConfig {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        ..DrainConfig::default()
    }
}

pub fn ids(items: &[QueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.id.as_str().to_string())
        .collect()
}
