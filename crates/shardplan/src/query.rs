//! 🔎 QueryBuilder: a scroll request that knows exactly which shard it's allowed to bother.
//!
//! 🧠 Knowledge graph:
//! - Built per partition by `partition/reader.rs`: `QueryBuilder::query(settings)?.shard(..).only_node(..).fields(..)`.
//! - Pure description. Opening the scroll is the client's job (`ClusterClient::open_scroll`).
//! - The shard/node restriction travels as the `preference` parameter:
//!   `_shards:3|_only_node:abc123`. One shard, one node, zero gossip.
//! - The resource's `?q=...` becomes a `query_string`; a `?{json}` becomes the query verbatim.

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::resource::Resource;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    index: String,
    query: Value,
    shard: Option<String>,
    only_node: Option<String>,
    fields: Vec<String>,
    size: usize,
    keep_alive: String,
}

impl QueryBuilder {
    /// 🏗️ Start from the read resource and scroll knobs in `settings`.
    pub fn query(settings: &Settings) -> Result<QueryBuilder> {
        let resource = Resource::parse(settings.resource_for_read()?)?;
        let query = match resource.query.as_deref() {
            None | Some("") => json!({"match_all": {}}),
            Some(q) if q.trim_start().starts_with('{') => {
                let parsed: Value = serde_json::from_str(q)
                    .with_context(|| format!("💀 Resource query [{q}] looks like JSON but isn't"))?;
                // -- 🎁 accept both `{"query": {...}}` and a bare `{...}`
                parsed.get("query").cloned().unwrap_or(parsed)
            }
            Some(q) => {
                let text = q.strip_prefix("q=").unwrap_or(q);
                json!({"query_string": {"query": text}})
            }
        };
        Ok(QueryBuilder {
            index: resource.index,
            query,
            shard: None,
            only_node: None,
            fields: Vec::new(),
            size: settings.scroll_size,
            keep_alive: settings.scroll_keep_alive.clone(),
        })
    }

    /// 🎯 Narrow a pattern/multi-index resource to the one concrete index a shard lives in.
    pub fn on_index(mut self, index: &str) -> Self {
        if !index.is_empty() {
            self.index = index.to_string();
        }
        self
    }

    pub fn shard(mut self, shard_id: impl Into<String>) -> Self {
        self.shard = Some(shard_id.into());
        self
    }

    pub fn only_node(mut self, node_id: impl Into<String>) -> Self {
        self.only_node = Some(node_id.into());
        self
    }

    pub fn fields(mut self, fields: &[String]) -> Self {
        self.fields = fields
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn shard_id(&self) -> Option<&str> {
        self.shard.as_deref()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.only_node.as_deref()
    }

    pub fn field_list(&self) -> &[String] {
        &self.fields
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn keep_alive(&self) -> &str {
        &self.keep_alive
    }

    /// 🎯 `_shards:N|_only_node:ID`, or whichever half we know.
    pub fn preference(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.shard.as_ref().map(|s| format!("_shards:{s}")),
            self.only_node.as_ref().map(|n| format!("_only_node:{n}")),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join("|"))
    }

    /// 📦 The JSON body of the initial search. `_doc` sort because scrolls don't need relevance.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "size": self.size,
            "query": self.query,
            "sort": ["_doc"],
        });
        if !self.fields.is_empty() {
            body["_source"] = json!(self.fields);
        }
        body
    }

    /// 📡 Path + query string of the initial scroll search.
    pub fn search_path(&self) -> String {
        let mut path = format!("/{}/_search?scroll={}", self.index, self.keep_alive);
        if let Some(preference) = self.preference() {
            // -- 🔧 '|' is not welcome in a query string unescaped
            path.push_str("&preference=");
            path.push_str(&preference.replace('|', "%7C"));
        }
        path
    }
}
