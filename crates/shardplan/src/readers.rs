//! 🎭 Readers: turning raw hits into `Record`s, one value reader at a time.
//!
//! 🎬 COLD OPEN - INT. SCROLL RESPONSE - PAGE 3 OF UNKNOWN
//!
//! Fifty hits arrive in a JSON array. They have underscores in all the wrong places.
//! `_id`, `_index`, `_score`, `_source`. A value reader clears its throat.
//! "Which of you is the document?" Only `_source` raises a hand.
//!
//! ## Knowledge Graph 🧠
//! - `ValueReader`: trait, one method, turns a `_source` into a body `Value`.
//! - Concrete readers are zero-sized types: `JsonValueReader` ("json"), `RawValueReader` ("raw").
//! - `ValueReaderBackend`: enum dispatcher resolved BY NAME from `Settings::value_reader`.
//!   Same pattern as the backends: trait → concrete impls → enum → resolver.
//! - `ScrollReader`: value reader + optional mapping + metadata flags. Parses one whole
//!   search/scroll response page into `(scroll_id, records)`.
//!
//! 🦆 The duck reads raw. It prefers its JSON unparsed.

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::common::Record;
use crate::error::PartitionError;
use crate::mapping::Field;
use crate::settings::Settings;

/// 🔄 Turns the `_source` of one hit into the body of a [`Record`].
pub trait ValueReader: std::fmt::Debug {
    fn read_source(&self, source: &Value, mapping: Option<&Field>) -> Result<Value>;
}

/// 📦 Parsed JSON, with string-encoded numbers coerced when the mapping says they're numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueReader;

impl ValueReader for JsonValueReader {
    fn read_source(&self, source: &Value, mapping: Option<&Field>) -> Result<Value> {
        Ok(match mapping {
            Some(mapping) => coerce(source, mapping),
            None => source.clone(),
        })
    }
}

/// 🧾 The source kept as its raw JSON text, untouched by opinions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawValueReader;

impl ValueReader for RawValueReader {
    fn read_source(&self, source: &Value, _mapping: Option<&Field>) -> Result<Value> {
        Ok(Value::String(source.to_string()))
    }
}

fn coerce(value: &Value, field: &Field) -> Value {
    match value {
        Value::Object(object) => {
            let mut coerced = Map::with_capacity(object.len());
            for (key, child) in object {
                let child = match field.child(key) {
                    Some(child_field) => coerce(child, child_field),
                    None => child.clone(),
                };
                coerced.insert(key.clone(), child);
            }
            Value::Object(coerced)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| coerce(v, field)).collect()),
        Value::String(text) => coerce_scalar(text, &field.field_type).unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn coerce_scalar(text: &str, field_type: &str) -> Option<Value> {
    match field_type {
        "long" | "integer" | "short" | "byte" => text.trim().parse::<i64>().ok().map(Value::from),
        "double" | "float" | "half_float" | "scaled_float" => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "boolean" => text.trim().parse::<bool>().ok().map(Value::Bool),
        _ => None,
    }
}

/// 🎭 The many faces of a value reader.
#[derive(Debug, Clone)]
pub enum ValueReaderBackend {
    Json(JsonValueReader),
    Raw(RawValueReader),
}

impl ValueReaderBackend {
    /// 🏭 Resolve a reader by its configured name. Unknown names are configuration errors.
    pub fn from_name(name: &str) -> Result<ValueReaderBackend> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ValueReaderBackend::Json(JsonValueReader)),
            "raw" => Ok(ValueReaderBackend::Raw(RawValueReader)),
            _ => Err(PartitionError::UnknownValueReader {
                name: name.to_string(),
            }
            .into()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<ValueReaderBackend> {
        Self::from_name(&settings.value_reader)
    }
}

impl ValueReader for ValueReaderBackend {
    fn read_source(&self, source: &Value, mapping: Option<&Field>) -> Result<Value> {
        match self {
            ValueReaderBackend::Json(r) => r.read_source(source, mapping),
            ValueReaderBackend::Raw(r) => r.read_source(source, mapping),
        }
    }
}

/// 📄 One parsed page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub records: Vec<Record>,
}

/// 📜 Reads whole search/scroll response pages into records.
#[derive(Debug, Clone)]
pub struct ScrollReader {
    reader: ValueReaderBackend,
    mapping: Option<Field>,
    read_metadata: bool,
    metadata_field: String,
}

impl ScrollReader {
    pub fn new(
        reader: ValueReaderBackend,
        mapping: Option<Field>,
        read_metadata: bool,
        metadata_field: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            mapping,
            read_metadata,
            metadata_field: metadata_field.into(),
        }
    }

    pub fn mapping(&self) -> Option<&Field> {
        self.mapping.as_ref()
    }

    pub fn metadata_field(&self) -> &str {
        &self.metadata_field
    }

    /// 🎯 A single hit object (`{"_id":..,"_index":..,"_source":{..}}`) into a record.
    pub fn read_hit(&self, hit: &Value) -> Result<Record> {
        let hit = hit
            .as_object()
            .context("💀 A hit that is not an object. The scroll is speaking in tongues.")?;
        let id = hit
            .get("_id")
            .and_then(Value::as_str)
            .context("💀 A hit without an _id. Identity crisis at the shard level.")?;
        let index = hit.get("_index").and_then(Value::as_str).unwrap_or_default();
        let empty = Value::Object(Map::new());
        let source = hit.get("_source").unwrap_or(&empty);

        let body = self
            .reader
            .read_source(source, self.mapping.as_ref())
            .with_context(|| format!("💀 Value reader choked on document [{id}]"))?;

        let mut record = Record::new(id, index, body);
        if self.read_metadata {
            let metadata: Map<String, Value> = hit
                .iter()
                .filter(|(k, _)| k.starts_with('_') && k.as_str() != "_source")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            record.metadata = Some(metadata);
        }
        Ok(record)
    }

    /// 📄 A full response body (`{"_scroll_id":..,"hits":{"hits":[..]}}`) into a page.
    pub fn read_page(&self, body: &Value) -> Result<ScrollPage> {
        let scroll_id = body
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .context("💀 Scroll response has no hits.hits array. We were promised hits.")?;
        let records = hits
            .iter()
            .map(|hit| self.read_hit(hit))
            .collect::<Result<Vec<_>>>()?;
        Ok(ScrollPage { scroll_id, records })
    }
}
