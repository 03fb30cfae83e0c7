//! # Error Handling for sheetq
//!
//! This module defines the error types used throughout sheetq. We use a single
//! error enum ([`Error`]) to represent all possible failure modes, which keeps
//! function signatures simple and lets callers handle errors uniformly.
//!
//! ## Error Categories
//!
//! | Category  | Examples                              | Typical Response            |
//! |-----------|---------------------------------------|-----------------------------|
//! | Lock      | Acquire exceeded the timeout window   | Return failure to caller    |
//! | Not found | Container/table/folder absent         | Abort the current group     |
//! | Request   | Unparsable body, unknown operation    | Reject before any mutation  |
//! | Quota     | Key-value or store write over budget  | Abort invocation, no retry  |
//! | Internal  | SQLite error, serialization error     | Log and investigate         |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in sheetq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The lock could not be acquired within the configured timeout window.
    ///
    /// The acquire loop polled for the full window and the lock was held by
    /// another owner the whole time. No state was mutated; the caller should
    /// report an explicit failure rather than retry.
    #[error("lock acquisition timed out for owner '{owner_id}' after {waited_ms}ms")]
    LockTimeout {
        /// The owner that attempted the acquisition.
        owner_id: String,
        /// How long the acquire loop waited before giving up.
        waited_ms: u64,
    },

    /// A container was referenced by name but has no cached handle.
    #[error("container '{name}' not found")]
    ContainerNotFound {
        /// The logical container name that failed to resolve.
        name: String,
    },

    /// A table was referenced but does not exist in its container.
    #[error("table '{table}' not found in container '{container}'")]
    TableNotFound {
        /// The logical container name.
        container: String,
        /// The table name that was expected to exist.
        table: String,
    },

    /// Table creation was requested against a table that already holds data
    /// rows without the expected header. Creation rejects, never overwrites.
    #[error("table '{table}' in container '{container}' already has data")]
    TableNotEmpty {
        /// The logical container name.
        container: String,
        /// The table that already holds data rows.
        table: String,
    },

    /// The inbound request body was unparsable or named an unrecognized
    /// operation kind. The request is rejected before any queue mutation.
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// Human-readable rejection reason, echoed to the client.
        reason: String,
    },

    /// A write exceeded a host-enforced size quota.
    ///
    /// Propagates and aborts the current invocation; there is no automatic
    /// retry because retrying the same write would hit the same limit.
    #[error("quota exceeded writing key '{key}': {size} bytes over limit {limit}")]
    QuotaExceeded {
        /// The key whose write was rejected.
        key: String,
        /// The size that was attempted.
        size: usize,
        /// The enforced limit.
        limit: usize,
    },

    /// An external tabular or file store operation failed.
    #[error("store error: {message}")]
    Store {
        /// Description of the external failure.
        message: String,
    },

    /// SQLite error from the durable key-value backend.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure for persisted state.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for an external store failure.
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    /// Shorthand for a request rejection.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedRequest {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = Error::LockTimeout {
            owner_id: "req_1".to_string(),
            waited_ms: 30000,
        };
        assert_eq!(
            err.to_string(),
            "lock acquisition timed out for owner 'req_1' after 30000ms"
        );

        let err = Error::TableNotEmpty {
            container: "2024-01-01".to_string(),
            table: "rows".to_string(),
        };
        assert!(err.to_string().contains("already has data"));
    }

    #[test]
    fn serde_errors_convert() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
