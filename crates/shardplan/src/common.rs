//! 📦 Common data structures: the thing a read actually hands you.
//!
//! 🎬 *[a hit leaves its shard. it has an id, an index, and a body. it has no idea what a Record is.]*
//! *[a value reader squints at it. "you're a Record now," it says. the hit does not argue.]*
//!
//! A `Record` is one document after deserialization: identity, where it came from, its body,
//! and (when `read_metadata` is on) the metadata envelope. It holds no sockets and no feelings.

use serde::Serialize;
use serde_json::{Map, Value};

/// 🎯 One deserialized document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// 🪪 The document id. Every hit has one; we still keep it as `String` and not a promise.
    pub id: String,
    /// 📡 The concrete index the hit came from.
    pub index: String,
    /// 📦 The body, as produced by the configured value reader.
    pub source: Value,
    /// 🏷️ `_id`, `_index`, `_score`, ... when metadata reading is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Record {
    pub fn new(id: impl Into<String>, index: impl Into<String>, source: Value) -> Self {
        Self {
            id: id.into(),
            index: index.into(),
            source,
            metadata: None,
        }
    }

    /// 📄 The record as one NDJSON line: the body, with metadata folded in under `field`.
    pub fn to_json_line(&self, metadata_field: &str) -> String {
        match (&self.metadata, &self.source) {
            (Some(metadata), Value::Object(body)) => {
                let mut body = body.clone();
                body.insert(metadata_field.to_string(), Value::Object(metadata.clone()));
                Value::Object(body).to_string()
            }
            _ => self.source.to_string(),
        }
    }

    /// 📊 Rough size of the body in bytes. Progress bars like numbers.
    pub fn approximate_bytes(&self) -> usize {
        match &self.source {
            Value::String(raw) => raw.len(),
            other => other.to_string().len(),
        }
    }
}
