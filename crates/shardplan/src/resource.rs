//! 🧭 Resources: turning `logs-{@timestamp|yyyy.MM.dd}/_doc` into something a cluster understands.
//!
//! 🧠 Knowledge graph:
//! - `Resource::parse` splits `index[/type][?query]`. The writer only needs the index part.
//! - `IndexExtractor::compile` finds `{field}` and `{field|format}` placeholders.
//!   `has_pattern()` = multi-index target = no shard affinity possible (see `partition/writer.rs`).
//! - `IndexExtractor::extract` resolves the concrete index for one document at write time.
//!   Date formats use Java-ish tokens (`yyyy.MM.dd`) translated to chrono, because that is
//!   what people type into config files whether we like it or not.

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// 📦 A parsed resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    raw: String,
    pub index: String,
    pub doc_type: Option<String>,
    pub query: Option<String>,
}

impl Resource {
    pub fn parse(raw: &str) -> Result<Resource> {
        let trimmed = raw.trim();
        let (target, query) = match trimmed.split_once('?') {
            Some((target, query)) => (target, Some(query.to_string())),
            None => (trimmed, None),
        };
        // -- 🔪 split on the LAST '/' outside of braces so `{a/b}` nonsense stays in the index
        let (index, doc_type) = match split_type(target) {
            Some((index, doc_type)) if !doc_type.is_empty() => (index, Some(doc_type.to_string())),
            Some((index, _)) => (index, None),
            None => (target, None),
        };
        if index.is_empty() {
            anyhow::bail!(
                "💀 Resource [{raw}] has no index. A resource without an index is just a slash."
            );
        }
        Ok(Resource {
            raw: trimmed.to_string(),
            index: index.to_string(),
            doc_type,
            query,
        })
    }
}

fn split_type(target: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut split_at = None;
    for (i, c) in target.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => split_at = Some(i),
            _ => {}
        }
    }
    split_at.map(|i| (&target[..i], &target[i + 1..]))
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { path: String, format: Option<String> },
}

/// 🏭 Compiled index-name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexExtractor {
    segments: Vec<Segment>,
}

impl IndexExtractor {
    /// 🔧 Compile an index template. Unbalanced braces are a config error, not a vibe.
    pub fn compile(index: &str) -> Result<IndexExtractor> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = index.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        if c == '{' {
                            anyhow::bail!("💀 Nested '{{' in index pattern [{index}]");
                        }
                        inner.push(c);
                    }
                    if !closed {
                        anyhow::bail!("💀 Unclosed '{{' in index pattern [{index}]");
                    }
                    let (path, format) = match inner.split_once('|') {
                        Some((path, format)) => (path.trim(), Some(format.trim().to_string())),
                        None => (inner.trim(), None),
                    };
                    if path.is_empty() {
                        anyhow::bail!("💀 Empty '{{}}' placeholder in index pattern [{index}]");
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field {
                        path: path.to_string(),
                        format,
                    });
                }
                '}' => anyhow::bail!("💀 Stray '}}' in index pattern [{index}]"),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(IndexExtractor { segments })
    }

    /// 🎯 True when the index depends on the document: a multi-index target.
    pub fn has_pattern(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Field { .. }))
    }

    /// 🏷️ Resolve the concrete index name for one document.
    pub fn extract(&self, document: &Value) -> Result<String> {
        let mut index = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => index.push_str(text),
                Segment::Field { path, format } => {
                    let value = path
                        .split('.')
                        .try_fold(document, |node, key| node.get(key))
                        .with_context(|| {
                            format!("💀 Document has no field [{path}] to build the index name from")
                        })?;
                    match format {
                        Some(format) => index.push_str(&format_date(value, format)?),
                        None => index.push_str(&scalar_to_string(value, path)?),
                    }
                }
            }
        }
        Ok(index)
    }
}

fn scalar_to_string(value: &Value, path: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => anyhow::bail!("💀 Field [{path}] is not a scalar; it cannot be part of an index name"),
    }
}

fn format_date(value: &Value, java_format: &str) -> Result<String> {
    let timestamp: DateTime<Utc> = match value {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .with_context(|| format!("💀 [{n}] is not a usable epoch-millis timestamp"))?;
            DateTime::from_timestamp_millis(millis)
                .with_context(|| format!("💀 [{millis}] is out of chrono's comfort zone"))?
        }
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("💀 [{s}] is not a date we can read"))?
                .and_hms_opt(0, 0, 0)
                .context("💀 Midnight stopped existing")?
                .and_utc(),
        },
        _ => anyhow::bail!("💀 Only strings and epoch millis can be formatted as dates"),
    };
    Ok(timestamp.format(&java_to_chrono(java_format)).to_string())
}

/// 🔤 `yyyy.MM.dd` → `%Y.%m.%d`. Unknown letters pass through as literals.
fn java_to_chrono(java: &str) -> String {
    let chars: Vec<char> = java.chars().collect();
    let mut out = String::with_capacity(java.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let token = match (c, run) {
            ('y', 4) => Some("%Y"),
            ('y', 2) => Some("%y"),
            ('M', 2) => Some("%m"),
            ('d', 2) => Some("%d"),
            ('H', 2) => Some("%H"),
            ('m', 2) => Some("%M"),
            ('s', 2) => Some("%S"),
            _ => None,
        };
        match token {
            Some(token) => out.push_str(token),
            None => {
                for _ in 0..run {
                    if c == '%' {
                        out.push_str("%%");
                    } else {
                        out.push(c);
                    }
                }
            }
        }
        i += run;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_resources_split_into_index_type_and_query() -> Result<()> {
        let r = Resource::parse("logs/_doc?q=user:kimchy")?;
        assert_eq!(r.index, "logs");
        assert_eq!(r.doc_type.as_deref(), Some("_doc"));
        assert_eq!(r.query.as_deref(), Some("q=user:kimchy"));

        let bare = Resource::parse("metrics")?;
        assert_eq!(bare.index, "metrics");
        assert_eq!(bare.doc_type, None);
        assert!(Resource::parse("/_doc").is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_a_fixed_index_has_no_pattern() -> Result<()> {
        let extractor = IndexExtractor::compile("metrics-2024")?;
        assert!(!extractor.has_pattern());
        assert_eq!(extractor.extract(&json!({}))?, "metrics-2024");
        Ok(())
    }

    #[test]
    fn the_one_where_placeholders_pull_values_from_the_document() -> Result<()> {
        let extractor = IndexExtractor::compile("tenant-{customer.id}-events")?;
        assert!(extractor.has_pattern());
        let doc = json!({"customer": {"id": 42}});
        assert_eq!(extractor.extract(&doc)?, "tenant-42-events");
        assert!(extractor.extract(&json!({"customer": {}})).is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_dates_get_java_formatted_by_chrono() -> Result<()> {
        let extractor = IndexExtractor::compile("logs-{@timestamp|yyyy.MM.dd}")?;
        let doc = json!({"@timestamp": "2024-03-09T23:59:59Z"});
        assert_eq!(extractor.extract(&doc)?, "logs-2024.03.09");
        let millis = json!({"@timestamp": 0});
        assert_eq!(extractor.extract(&millis)?, "logs-1970.01.01");
        let plain = json!({"@timestamp": "2023-12-25"});
        assert_eq!(extractor.extract(&plain)?, "logs-2023.12.25");
        Ok(())
    }

    #[test]
    fn the_one_where_broken_braces_are_a_config_error() {
        assert!(IndexExtractor::compile("logs-{oops").is_err());
        assert!(IndexExtractor::compile("logs-}oops").is_err());
        assert!(IndexExtractor::compile("logs-{}").is_err());
        assert!(IndexExtractor::compile("logs-{a{b}}").is_err());
    }
}
