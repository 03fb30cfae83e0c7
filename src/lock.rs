//! # Distributed Request Lock
//!
//! This module implements mutual exclusion between overlapping invocations
//! that share nothing but the key-value store. The store offers no atomic
//! compare-and-swap and no blocking-wait primitive, so the lock is built from
//! the only tools available: plain reads, whole-value writes, and time.
//!
//! ## Protocol
//!
//! ```text
//! loop (until timeout):
//!   read lock key
//!   ├─ absent ────────► write {owner, now}     (candidate record)
//!   │                   wait VERIFY_PAUSE
//!   │                   re-read
//!   │                   ├─ still ours ──► Locked, return Ok
//!   │                   └─ overwritten ─► fall through to poll wait
//!   ├─ expired ───────► delete record, retry immediately (reclaim)
//!   └─ held by other ─► wait POLL_INTERVAL, retry
//! ```
//!
//! ## The Verify Step Is a Heuristic
//!
//! Two acquirers can both observe "absent", both write, and the later write
//! wins. The pause-then-re-read step catches the common interleavings (the
//! loser sees the winner's record and backs off) but cannot close the window
//! completely without a CAS the store does not have. The residual race is
//! accepted and bounded by the expiry-based reclamation: a stuck or doubly
//! granted lock ages out after [`LockConfig::timeout`].
//!
//! ## Waiting
//!
//! All waits are `tokio::time::sleep` awaits, so an acquire loop suspends its
//! task instead of pinning a thread, and dropping the future abandons the
//! attempt cleanly. Defaults: 30 s timeout, 100 ms poll, 10 ms verify pause.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::kv::PersistentKv;
use crate::types::{now_unix_ms, LockRecord};

/// Key under which the singleton lock record lives.
pub const LOCK_KEY: &str = "request_lock";

/// Default total time an acquire attempt may spend polling.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait between polls of a held lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default pause between writing a candidate record and re-reading it.
pub const DEFAULT_VERIFY_PAUSE: Duration = Duration::from_millis(10);

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for the lock protocol.
///
/// The timeout does double duty: it bounds how long an acquirer polls, and it
/// is the age past which a held record counts as expired and reclaimable.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Key-value key holding the lock record.
    pub key: String,
    /// Acquire deadline and record expiry age.
    pub timeout: Duration,
    /// Wait between polls while another owner holds the lock.
    pub poll_interval: Duration,
    /// Pause before the read-after-write verification.
    pub verify_pause: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: LOCK_KEY.to_string(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            verify_pause: DEFAULT_VERIFY_PAUSE,
        }
    }
}

// =============================================================================
// Lock
// =============================================================================

/// The polling-based distributed lock.
///
/// Cloning is cheap; clones share the same store and configuration. The lock
/// itself holds no in-memory state — ownership lives entirely in the store,
/// which is what lets unrelated invocations coordinate through it.
#[derive(Clone)]
pub struct RequestLock {
    kv: Arc<dyn PersistentKv>,
    config: LockConfig,
}

impl RequestLock {
    /// Creates a lock over `kv` with default timing.
    pub fn new(kv: Arc<dyn PersistentKv>) -> Self {
        Self::with_config(kv, LockConfig::default())
    }

    /// Creates a lock with explicit configuration.
    pub fn with_config(kv: Arc<dyn PersistentKv>, config: LockConfig) -> Self {
        Self { kv, config }
    }

    /// Acquires the lock for `owner_id`, polling until success or timeout.
    ///
    /// Returns `Err(Error::LockTimeout)` when the window elapses without an
    /// acquisition. Nothing is mutated on failure beyond candidate records
    /// that lost their verification, which the winner's record has already
    /// overwritten.
    pub async fn acquire(&self, owner_id: &str) -> Result<()> {
        let start = Instant::now();

        while start.elapsed() < self.config.timeout {
            match self.read_record()? {
                None => {
                    // Candidate write, then verify after a short pause. If the
                    // re-read still shows us, the slot is ours.
                    self.write_record(owner_id)?;
                    tokio::time::sleep(self.config.verify_pause).await;

                    if let Some(record) = self.read_record()? {
                        if record.owner_id == owner_id {
                            debug!(owner_id, "lock acquired");
                            return Ok(());
                        }
                    }
                    // Lost the verify race; fall through to the poll wait.
                }
                Some(record) => {
                    let age = record.age_ms(now_unix_ms());
                    if age > self.config.timeout.as_millis() as u64 {
                        warn!(
                            stale_owner = %record.owner_id,
                            age_ms = age,
                            "reclaiming expired lock"
                        );
                        self.kv.delete(&self.config.key)?;
                        // Retry immediately: the slot just opened up.
                        continue;
                    }
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(Error::LockTimeout {
            owner_id: owner_id.to_string(),
            waited_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Releases the lock, but only if `owner_id` still holds it.
    ///
    /// The ownership check matters after an expiry reclaim: a slow invocation
    /// whose lock aged out must not delete the record of whoever took over.
    pub fn release(&self, owner_id: &str) -> Result<()> {
        if let Some(record) = self.read_record()? {
            if record.owner_id == owner_id {
                self.kv.delete(&self.config.key)?;
                debug!(owner_id, "lock released");
            }
        }
        Ok(())
    }

    /// Deletes the lock record if it has outlived the timeout.
    ///
    /// Safe to call from anywhere at any time; a fresh record is left alone.
    pub fn reclaim_expired(&self) -> Result<()> {
        if let Some(record) = self.read_record()? {
            let age = record.age_ms(now_unix_ms());
            if age > self.config.timeout.as_millis() as u64 {
                warn!(
                    stale_owner = %record.owner_id,
                    age_ms = age,
                    "clearing expired lock"
                );
                self.kv.delete(&self.config.key)?;
            }
        }
        Ok(())
    }

    /// Current lock record, if any. Primarily for diagnostics and tests.
    pub fn holder(&self) -> Result<Option<LockRecord>> {
        self.read_record()
    }

    fn read_record(&self) -> Result<Option<LockRecord>> {
        match self.kv.get(&self.config.key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_record(&self, owner_id: &str) -> Result<()> {
        let record = LockRecord {
            owner_id: owner_id.to_string(),
            acquired_at_ms: now_unix_ms(),
        };
        self.kv.set(&self.config.key, &serde_json::to_string(&record)?)
    }
}
