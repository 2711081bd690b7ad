//! In-memory telemetry store standing in for the HTTP storage service.
//!
//! Each handler returns the status code and JSON envelope the service replies with,
//! so the simulated transport can hand them to the node unchanged.

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("invalid API key")]
    Unauthorized,
    #[error("malformed JSON: {0}")]
    Malformed(String),
}

/// Status code plus JSON body, as the service would answer.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub status: u16,
    pub body: Value,
}

impl StoreResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StoredDocument {
    sequence: u64,
    document: Map<String, Value>,
}

impl StoredDocument {
    fn timestamp(&self) -> u64 {
        self.document.get("timestamp").and_then(Value::as_u64).unwrap_or(0)
    }

    fn device_matches(&self, device_id: Option<&str>) -> bool {
        device_id.map_or(true, |id| {
            self.document.get("device_id").and_then(Value::as_str) == Some(id)
        })
    }
}

#[derive(Debug, Default)]
pub struct TelemetryStore {
    documents: Vec<StoredDocument>,
    api_key: Option<String>,
    next_sequence: u64,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the `X-API-Key` header to equal `key` on every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Stores a document, stamping `timestamp` with `now_seconds` if it is missing.
    /// Returns the generated 24-hex-digit identifier.
    pub fn insert_one(&mut self, document: Value, now_seconds: u64) -> Result<String, StoreError> {
        let Value::Object(mut document) = document else {
            return Err(StoreError::NotAnObject);
        };
        if !document.contains_key("timestamp") {
            document.insert("timestamp".into(), Value::from(now_seconds));
        }

        self.next_sequence = self.next_sequence.wrapping_add(1);
        let id = format!("{:08x}{:016x}", now_seconds as u32, self.next_sequence);
        document.insert("_id".into(), Value::from(id.clone()));
        self.documents.push(StoredDocument {
            sequence: self.next_sequence,
            document,
        });
        debug!(%id, total = self.documents.len(), "document stored");
        Ok(id)
    }

    /// Documents for `device_id` (all devices when `None`), newest first.
    pub fn list(&self, device_id: Option<&str>, limit: Option<usize>) -> Vec<Value> {
        let mut matching: Vec<&StoredDocument> = self
            .documents
            .iter()
            .filter(|doc| doc.device_matches(device_id))
            .collect();
        matching.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then(b.sequence.cmp(&a.sequence))
        });
        matching
            .into_iter()
            .take(limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .map(|doc| Value::Object(doc.document.clone()))
            .collect()
    }

    pub fn latest(&self, device_id: Option<&str>) -> Option<Value> {
        self.list(device_id, Some(1)).into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn health(&self) -> StoreResponse {
        StoreResponse::new(200, json!({"status": "ok", "message": "API is running"}))
    }

    /// `POST /api/sensors`
    pub fn handle_post(
        &mut self,
        api_key: Option<&str>,
        body: &str,
        now_seconds: u64,
    ) -> StoreResponse {
        if let Err(e) = self.authorize(api_key) {
            return StoreResponse::new(401, json!({"error": e.to_string()}));
        }
        let result = serde_json::from_str::<Value>(body)
            .map_err(|e| StoreError::Malformed(e.to_string()))
            .and_then(|document| self.insert_one(document, now_seconds));
        match result {
            Ok(id) => StoreResponse::new(
                201,
                json!({"success": true, "message": "data stored successfully", "id": id}),
            ),
            Err(e) => StoreResponse::new(500, json!({"success": false, "error": e.to_string()})),
        }
    }

    /// `GET /api/sensors`
    pub fn handle_list(
        &self,
        api_key: Option<&str>,
        device_id: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResponse {
        if let Err(e) = self.authorize(api_key) {
            return StoreResponse::new(401, json!({"error": e.to_string()}));
        }
        let data = self.list(device_id, limit);
        StoreResponse::new(200, json!({"success": true, "count": data.len(), "data": data}))
    }

    /// `GET /api/sensors/latest`
    pub fn handle_latest(&self, api_key: Option<&str>, device_id: Option<&str>) -> StoreResponse {
        if let Err(e) = self.authorize(api_key) {
            return StoreResponse::new(401, json!({"error": e.to_string()}));
        }
        match self.latest(device_id) {
            Some(data) => StoreResponse::new(200, json!({"success": true, "data": data})),
            None => StoreResponse::new(404, json!({"success": false, "message": "no data found"})),
        }
    }

    fn authorize(&self, api_key: Option<&str>) -> Result<(), StoreError> {
        match &self.api_key {
            Some(expected) if api_key != Some(expected.as_str()) => Err(StoreError::Unauthorized),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_stamps_missing_timestamp() {
        let mut store = TelemetryStore::new();
        let id = store.insert_one(json!({"device_id": "a"}), 1_700_000_000).unwrap();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.latest(None).unwrap()["timestamp"], 1_700_000_000u64);
    }

    #[test]
    fn test_rejects_non_object() {
        let mut store = TelemetryStore::new();
        assert_eq!(store.insert_one(json!([1, 2]), 0), Err(StoreError::NotAnObject));
        assert!(store.is_empty());
    }
}
