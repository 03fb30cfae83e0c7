//! # Request API
//!
//! The synchronous front door: parse an inbound JSON body, validate it,
//! take the request lock, enqueue, release, respond. Every response — success
//! or failure — carries the request id so clients can correlate retries.
//!
//! ## Dispatch
//!
//! Operation kinds are a closed enum, resolved against the body's `type`
//! string in an explicit priority order; the first match wins and dispatch
//! short-circuits there. Unrecognized kinds are rejected before any queue
//! mutation.
//!
//! ## Lock Discipline
//!
//! The request id doubles as the lock owner id. The lock is held only around
//! the enqueue itself and released on every path, including enqueue failure.
//! An acquire timeout comes back as an explicit failure response, never a
//! silent retry.

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::lock::RequestLock;
use crate::queue::DurableQueue;
use crate::types::{Destination, ItemId, QueueItem, RequestId, Row};

// =============================================================================
// Operations
// =============================================================================

/// The operation kinds this deployment accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Enqueue one row (or several, when `data` is an array).
    InsertRow,
    /// Enqueue a batch of rows; `data` must be an array.
    InsertRowMany,
}

/// Dispatch priority. Resolution scans this list in order and stops at the
/// first kind whose wire name matches, so earlier entries shadow later ones.
pub const DISPATCH_ORDER: [Operation; 2] = [Operation::InsertRow, Operation::InsertRowMany];

impl Operation {
    /// The wire name clients put in the body's `type` field.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Operation::InsertRow => "insertRow",
            Operation::InsertRowMany => "insertRowMany",
        }
    }

    /// Resolves a `type` string against [`DISPATCH_ORDER`].
    pub fn resolve(kind: &str) -> Option<Operation> {
        DISPATCH_ORDER.iter().copied().find(|op| op.wire_name() == kind)
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Inbound request body.
#[derive(Debug, Deserialize)]
struct RequestBody {
    #[serde(rename = "type")]
    kind: String,
    /// Explicit item id; when present, every item from this request shares
    /// its idempotency identity with retries of the same request.
    id: Option<String>,
    /// Request-level timestamp override, number (Unix ms) or RFC 3339 string.
    timestamp: Option<serde_json::Value>,
    data: serde_json::Value,
}

/// One element of the request's `data`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestElement {
    #[serde(default)]
    container_name: Option<String>,
    #[serde(default)]
    table_name: Option<String>,
    /// Element-level timestamp override.
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    /// The row itself.
    data: Row,
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `{success: true, message?, requestId}`
    Success {
        /// Optional human-readable note.
        message: Option<String>,
        /// The request id this response answers.
        request_id: String,
    },
    /// `{error, message, requestId}`
    Failure {
        /// Machine-matchable error code.
        error: String,
        /// Human-readable detail.
        message: String,
        /// The request id this response answers.
        request_id: String,
    },
}

impl Response {
    fn success(message: impl Into<String>, request_id: &RequestId) -> Self {
        Response::Success {
            message: Some(message.into()),
            request_id: request_id.as_str().to_string(),
        }
    }

    fn failure(error: &str, message: impl Into<String>, request_id: &RequestId) -> Self {
        Response::Failure {
            error: error.to_string(),
            message: message.into(),
            request_id: request_id.as_str().to_string(),
        }
    }

    /// Whether this is the success shape.
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    /// Renders the JSON wire form.
    pub fn to_json(&self) -> String {
        let value = match self {
            Response::Success {
                message,
                request_id,
            } => {
                let mut obj = serde_json::json!({
                    "success": true,
                    "requestId": request_id,
                });
                if let Some(message) = message {
                    obj["message"] = serde_json::json!(message);
                }
                obj
            }
            Response::Failure {
                error,
                message,
                request_id,
            } => serde_json::json!({
                "error": error,
                "message": message,
                "requestId": request_id,
            }),
        };
        value.to_string()
    }
}

// =============================================================================
// Api
// =============================================================================

/// The request handler: validation, locking, and enqueue.
#[derive(Clone)]
pub struct Api {
    lock: RequestLock,
    queue: DurableQueue,
}

impl Api {
    /// Creates the handler over the shared lock and queue.
    pub fn new(lock: RequestLock, queue: DurableQueue) -> Self {
        Self { lock, queue }
    }

    /// Handles one inbound JSON body and produces the response to send back.
    ///
    /// Never returns `Err`: every failure mode maps to a failure [`Response`]
    /// so the transport layer has exactly one thing to serialize.
    pub async fn handle(&self, body: &str) -> Response {
        let request_id = RequestId::generate();

        let parsed: RequestBody = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Response::failure(
                    "malformed_request",
                    format!("unparsable body: {err}"),
                    &request_id,
                )
            }
        };

        if Operation::resolve(&parsed.kind).is_none() {
            return Response::failure(
                "invalid_request_type",
                "Only 'insertRow' and 'insertRowMany' are supported",
                &request_id,
            );
        }

        // Validation happens entirely before the lock; a rejected request
        // must not take the critical section or touch the queue.
        let items = match build_items(&parsed) {
            Ok(items) => items,
            Err(err) => {
                return Response::failure("malformed_request", err.to_string(), &request_id)
            }
        };

        match self.lock.acquire(request_id.as_str()).await {
            Ok(()) => {}
            Err(Error::LockTimeout { waited_ms, .. }) => {
                return Response::failure(
                    "lock_timeout",
                    format!("could not acquire request lock within {waited_ms}ms"),
                    &request_id,
                );
            }
            Err(err) => {
                return Response::failure("internal", err.to_string(), &request_id);
            }
        }

        let accepted = self.queue.enqueue_many(items);

        if let Err(err) = self.lock.release(request_id.as_str()) {
            warn!(%err, request_id = %request_id, "lock release failed");
        }

        match accepted {
            Ok(count) => Response::success(
                format!("{count} item(s) added to queue"),
                &request_id,
            ),
            Err(err) => Response::failure("internal", err.to_string(), &request_id),
        }
    }
}

// =============================================================================
// Body → QueueItems
// =============================================================================

/// Expands a request body into queue items.
///
/// Array `data` fans out to one item per element. An explicit body `id` is
/// used verbatim (array elements get a `-<index>` suffix past the first, so
/// retries of the same batch dedupe element-wise); otherwise each item gets a
/// fresh UUID.
fn build_items(body: &RequestBody) -> Result<Vec<QueueItem>> {
    let request_ts = body.timestamp.as_ref().map(coerce_timestamp).transpose()?;

    let elements: Vec<RequestElement> = match &body.data {
        serde_json::Value::Array(values) => values
            .iter()
            .map(|value| parse_element(value.clone()))
            .collect::<Result<_>>()?,
        serde_json::Value::Object(_) => vec![parse_element(body.data.clone())?],
        _ => {
            return Err(Error::malformed(
                "'data' must be an object or an array of objects",
            ))
        }
    };

    let mut items = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        let id = match &body.id {
            Some(id) if index == 0 => ItemId::new(id.clone()),
            Some(id) => ItemId::new(format!("{id}-{index}")),
            None => ItemId::generate(),
        };
        let element_ts = element.timestamp.as_ref().map(coerce_timestamp).transpose()?;

        let mut item = QueueItem::new(id, body.kind.clone(), element.data).with_destination(
            Destination {
                container_name: element.container_name,
                table_name: element.table_name,
            },
        );
        if let Some(ts) = element_ts.or(request_ts) {
            item = item.with_timestamp(ts);
        }
        items.push(item);
    }
    Ok(items)
}

fn parse_element(value: serde_json::Value) -> Result<RequestElement> {
    serde_json::from_value(value)
        .map_err(|err| Error::malformed(format!("bad data element: {err}")))
}

/// Accepts a Unix-millisecond number or an RFC 3339 string.
fn coerce_timestamp(value: &serde_json::Value) -> Result<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::malformed("timestamp must be a non-negative integer")),
        serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis().max(0) as u64)
            .map_err(|_| Error::malformed(format!("unparsable timestamp '{s}'"))),
        _ => Err(Error::malformed("timestamp must be a number or a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_order_first_match_wins() {
        assert_eq!(Operation::resolve("insertRow"), Some(Operation::InsertRow));
        assert_eq!(
            Operation::resolve("insertRowMany"),
            Some(Operation::InsertRowMany)
        );
        assert_eq!(Operation::resolve("getUser"), None);
    }

    #[test]
    fn response_wire_shapes() {
        let id = RequestId::generate();
        let ok = Response::success("done", &id).to_json();
        assert!(ok.contains("\"success\":true"));
        assert!(ok.contains("\"requestId\""));

        let bad = Response::failure("lock_timeout", "busy", &id).to_json();
        assert!(bad.contains("\"error\":\"lock_timeout\""));
        assert!(!bad.contains("success"));
    }

    #[test]
    fn timestamps_coerce_from_numbers_and_strings() {
        assert_eq!(
            coerce_timestamp(&serde_json::json!(1700000000000u64)).unwrap(),
            1700000000000
        );
        let ms = coerce_timestamp(&serde_json::json!("2024-06-01T00:00:00Z")).unwrap();
        assert_eq!(ms, 1717200000000);
        assert!(coerce_timestamp(&serde_json::json!(true)).is_err());
        assert!(coerce_timestamp(&serde_json::json!("yesterday")).is_err());
    }

    #[test]
    fn array_data_fans_out_with_suffixed_ids() {
        let body: RequestBody = serde_json::from_str(
            r#"{
                "type": "insertRowMany",
                "id": "batch-7",
                "data": [
                    {"data": {"v": 1}},
                    {"data": {"v": 2}, "tableName": "special"}
                ]
            }"#,
        )
        .unwrap();
        let items = build_items(&body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id.as_str(), "batch-7");
        assert_eq!(items[1].id.as_str(), "batch-7-1");
        assert_eq!(
            items[1].destination.table_name.as_deref(),
            Some("special")
        );
    }

    #[test]
    fn scalar_data_is_rejected() {
        let body: RequestBody = serde_json::from_str(
            r#"{"type": "insertRow", "data": 42}"#,
        )
        .unwrap();
        assert!(matches!(
            build_items(&body).unwrap_err(),
            Error::MalformedRequest { .. }
        ));
    }
}
