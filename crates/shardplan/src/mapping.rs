//! 🗂️ Mapping: what the cluster thinks your documents look like.
//!
//! 🧠 Knowledge graph:
//! - `Field` is a plain tree. Root = the index (or a merged view of several), children = properties.
//! - Parsed once by the planner from `GET /{index}/_mapping`, validated against the configured
//!   scroll fields, then snapshot-encoded into every partition definition.
//! - Handles typeless (7.x+) and typed (≤6.x) responses. Multi-fields (`name.keyword`) count as
//!   children, because asking for them by name is legal.
//!
//! "The mapping is a lie we agreed to tell together." - every schemaless database, eventually 🦆

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::PartitionError;
use crate::settings::FieldPresenceValidation;
use crate::snapshot;

const MAPPING_KIND: &str = "mapping";

/// 🌳 One node of a mapping tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            properties: Vec::new(),
        }
    }

    pub fn object(name: impl Into<String>, properties: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            field_type: "object".to_string(),
            properties,
        }
    }

    /// 🔎 Child by name, one level down.
    pub fn child(&self, name: &str) -> Option<&Field> {
        self.properties.iter().find(|f| f.name == name)
    }

    /// 🧭 Resolve a dotted path (`user.address.city`) from this node.
    pub fn resolve(&self, path: &str) -> Option<&Field> {
        path.split('.')
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// 📋 The requested fields this mapping does not contain, in request order.
    ///
    /// Wildcards and `_`-prefixed metadata fields are skipped; they cannot be checked here.
    pub fn missing_fields(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty() && !f.contains('*') && !f.starts_with('_'))
            .filter(|f| self.resolve(f).is_none())
            .map(str::to_string)
            .collect()
    }

    /// 📡 Build a tree from a `_mapping` response body.
    ///
    /// `root_name` names the root; for multi-index responses properties are merged, first wins.
    pub fn from_mapping_response(root_name: &str, response: &Value) -> Result<Field> {
        let indices = response
            .as_object()
            .context("💀 Mapping response is not a JSON object. The cluster sent us modern art.")?;

        let mut merged: Vec<Field> = Vec::new();
        for (index_name, index_body) in indices {
            let Some(mappings) = index_body.get("mappings").and_then(Value::as_object) else {
                // -- 🤷 an index with no mappings block: nothing to merge, nothing to cry about
                continue;
            };
            let property_sets: Vec<&Map<String, Value>> = if mappings.contains_key("properties") {
                // ✅ typeless (7.x+)
                mappings
                    .get("properties")
                    .and_then(Value::as_object)
                    .into_iter()
                    .collect()
            } else {
                // 🦕 typed (≤6.x): one level of `_doc` / custom type in the way
                mappings
                    .values()
                    .filter_map(|t| t.get("properties").and_then(Value::as_object))
                    .collect()
            };
            for properties in property_sets {
                for field in parse_properties(properties).with_context(|| {
                    format!("💀 Failed to parse the mapping of index [{index_name}]")
                })? {
                    if !merged.iter().any(|f| f.name == field.name) {
                        merged.push(field);
                    }
                }
            }
        }
        Ok(Field::object(root_name, merged))
    }

    /// 💾 Encode into the opaque snapshot string embedded in partition definitions.
    pub fn encode(&self) -> Result<String> {
        snapshot::encode(MAPPING_KIND, self).context("💀 Failed to snapshot the field mapping")
    }

    /// 📬 Decode a string produced by [`Field::encode`].
    pub fn decode(encoded: &str) -> Result<Field> {
        snapshot::decode(MAPPING_KIND, encoded)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.properties.is_empty() {
            write!(f, "{}={}", self.name, self.field_type)
        } else {
            write!(f, "{}=[", self.name)?;
            for (i, child) in self.properties.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, "]")
        }
    }
}

fn parse_properties(properties: &Map<String, Value>) -> Result<Vec<Field>> {
    let mut fields = Vec::with_capacity(properties.len());
    for (name, definition) in properties {
        let mut children = match definition.get("properties").and_then(Value::as_object) {
            Some(nested) => parse_properties(nested)?,
            None => Vec::new(),
        };
        if let Some(multi) = definition.get("fields").and_then(Value::as_object) {
            children.extend(parse_properties(multi)?);
        }
        let field_type = match definition.get("type").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None if !children.is_empty() => "object".to_string(),
            None => anyhow::bail!("💀 Field [{name}] has neither a type nor properties"),
        };
        fields.push(Field {
            name: name.clone(),
            field_type,
            properties: children,
        });
    }
    Ok(fields)
}

/// 🔍 Check the configured scroll fields against the discovered mapping.
///
/// `Ignore` never looks, `Warning` logs and carries on, `Strict` fails with
/// [`PartitionError::MissingFields`] listing every offender.
pub fn validate_mapping(
    requested: &[String],
    mapping: &Field,
    validation: FieldPresenceValidation,
    resource: &str,
) -> Result<()> {
    if !validation.is_required() || requested.is_empty() {
        return Ok(());
    }
    let missing = mapping.missing_fields(requested);
    if missing.is_empty() {
        return Ok(());
    }
    match validation {
        FieldPresenceValidation::Strict => Err(PartitionError::MissingFields {
            resource: resource.to_string(),
            fields: missing,
        }
        .into()),
        _ => {
            warn!(
                "⚠️ Field(s) {:?} not found in the mapping of [{}]. Reading anyway, they'll come back empty.",
                missing, resource
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn a_typeless_response() -> Value {
        json!({
            "logs": {
                "mappings": {
                    "properties": {
                        "message": {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                        "user": {"properties": {"name": {"type": "keyword"}, "age": {"type": "integer"}}}
                    }
                }
            }
        })
    }

    #[test]
    fn the_one_where_a_typeless_mapping_becomes_a_tree() -> Result<()> {
        let mapping = Field::from_mapping_response("logs", &a_typeless_response())?;
        assert_eq!(mapping.name, "logs");
        assert_eq!(mapping.resolve("user.name").map(|f| f.field_type.as_str()), Some("keyword"));
        assert_eq!(mapping.resolve("message.keyword").map(|f| f.field_type.as_str()), Some("keyword"));
        assert_eq!(mapping.resolve("user").map(|f| f.field_type.as_str()), Some("object"));
        assert!(mapping.resolve("user.shoe_size").is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_old_typed_mappings_still_get_a_seat() -> Result<()> {
        let typed = json!({
            "old": {"mappings": {"_doc": {"properties": {"title": {"type": "text"}}}}},
            "older": {"mappings": {"tweet": {"properties": {"title": {"type": "keyword"}, "likes": {"type": "long"}}}}}
        });
        let mapping = Field::from_mapping_response("old,older", &typed)?;
        assert_eq!(mapping.properties.len(), 2, "title is merged, first wins");
        assert_eq!(mapping.resolve("title").map(|f| f.field_type.as_str()), Some("text"));
        assert!(mapping.resolve("likes").is_some());
        Ok(())
    }

    #[test]
    fn the_one_where_missing_fields_are_listed_in_order() -> Result<()> {
        let mapping = Field::from_mapping_response("logs", &a_typeless_response())?;
        let requested: Vec<String> = ["user.name", "ghost", "_id", "user.*", "nope.nada"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(mapping.missing_fields(&requested), vec!["ghost", "nope.nada"]);
        Ok(())
    }

    #[test]
    fn the_one_where_strict_validation_refuses_and_warning_shrugs() -> Result<()> {
        let mapping = Field::from_mapping_response("logs", &a_typeless_response())?;
        let requested = vec!["user.name".to_string(), "ghost".to_string()];

        validate_mapping(&requested, &mapping, FieldPresenceValidation::Ignore, "logs")?;
        validate_mapping(&requested, &mapping, FieldPresenceValidation::Warning, "logs")?;

        let err = validate_mapping(&requested, &mapping, FieldPresenceValidation::Strict, "logs")
            .unwrap_err();
        match err.downcast_ref::<PartitionError>() {
            Some(PartitionError::MissingFields { fields, resource }) => {
                assert_eq!(fields, &vec!["ghost".to_string()]);
                assert_eq!(resource, "logs");
            }
            other => panic!("💀 expected MissingFields, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn the_one_where_the_mapping_snapshot_comes_back_identical() -> Result<()> {
        let mapping = Field::from_mapping_response("logs", &a_typeless_response())?;
        let encoded = mapping.encode()?;
        assert_eq!(Field::decode(&encoded)?, mapping);
        Ok(())
    }
}
