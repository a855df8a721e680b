//! 📦 Snapshots: opaque strings that survive the trip to another process.
//!
//! 🎬 *[a partition definition boards a plane. it carries no luggage but two strings.]*
//! *["what's in them?" asks customs. "settings. a mapping." "open them." "I can't. they're base64."]*
//!
//! 🧠 Knowledge graph:
//! - Wire shape: `base64( gzip( {"version":1,"kind":"settings","body":{...}} ) )`
//! - `encode` and `decode` are symmetric. `decode` refuses the wrong `kind` and any `version`
//!   it does not understand, with `PartitionError::Snapshot`.
//! - Used by `Settings::save/load` and by the planner for the mapping blob.
//! - JSON inside because serde_json is already in the building. gzip because mappings with
//!   2,000 fields exist and they are not sorry about it.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PartitionError;

/// 🔢 The one and only snapshot schema version. Bump it when the body shape changes.
pub const SNAPSHOT_VERSION: u64 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T: Serialize> {
    version: u64,
    kind: &'a str,
    body: &'a T,
}

/// 📦 Encode a value into an opaque, versioned, transport-safe string.
pub fn encode<T: Serialize>(kind: &'static str, value: &T) -> Result<String> {
    let envelope = EnvelopeRef {
        version: SNAPSHOT_VERSION,
        kind,
        body: value,
    };
    let json = serde_json::to_vec(&envelope)
        .with_context(|| format!("💀 Failed to serialize the {kind} snapshot to JSON"))?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder
        .write_all(&json)
        .with_context(|| format!("💀 Failed to gzip the {kind} snapshot"))?;
    let compressed = encoder
        .finish()
        .with_context(|| format!("💀 Failed to finish gzipping the {kind} snapshot"))?;

    Ok(STANDARD.encode(compressed))
}

/// 📬 Decode a string produced by [`encode`] with the same `kind`.
pub fn decode<T: DeserializeOwned>(kind: &'static str, encoded: &str) -> Result<T> {
    let corrupt = |reason: String| PartitionError::Snapshot { kind, reason };

    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| corrupt(format!("not base64 ({e})")))?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| corrupt(format!("not gzip ({e})")))?;

    let mut envelope: Value =
        serde_json::from_slice(&json).map_err(|e| corrupt(format!("not JSON ({e})")))?;

    let version = envelope.get("version").and_then(Value::as_u64);
    if version != Some(SNAPSHOT_VERSION) {
        return Err(corrupt(format!(
            "version {version:?} is not supported (expected {SNAPSHOT_VERSION})"
        ))
        .into());
    }
    let found_kind = envelope.get("kind").and_then(Value::as_str).unwrap_or("");
    if found_kind != kind {
        return Err(corrupt(format!("expected kind [{kind}] but found [{found_kind}]")).into());
    }

    let body = envelope
        .get_mut("body")
        .map(Value::take)
        .ok_or_else(|| corrupt("no body".to_string()))?;
    serde_json::from_value(body).map_err(|e| corrupt(format!("body does not fit ({e})")).into())
}
