//! 📡 ElasticsearchClient: the metadata REST calls, bound to exactly one node.
//!
//! Every request goes to `target`. When the client was pinned, that is the pin and nothing
//! else; when it wasn't, it is simply the first node anyone knew about.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::{Credentials, ElasticsearchScroll, json_body, parse_http_nodes};
use crate::backends::{ClusterClient, ScrollBackend};
use crate::cluster::{Node, NodeAddress, Shard};
use crate::mapping::Field;
use crate::query::QueryBuilder;
use crate::readers::ScrollReader;
use crate::resource::Resource;
use crate::settings::Settings;

#[derive(Debug)]
pub struct ElasticsearchClient {
    http: reqwest::Client,
    credentials: Credentials,
    target: NodeAddress,
    pinned: bool,
    read_index: Option<String>,
    write_index: Option<String>,
    health_timeout: String,
    closed: bool,
}

impl ElasticsearchClient {
    pub(crate) fn new(
        http: reqwest::Client,
        settings: &Settings,
        target: NodeAddress,
        pinned: bool,
    ) -> Self {
        let index_of = |raw: Result<&str>| {
            raw.ok()
                .and_then(|raw| Resource::parse(raw).ok())
                .map(|resource| resource.index)
        };
        Self {
            http,
            credentials: Credentials::from_settings(settings),
            target,
            pinned,
            read_index: index_of(settings.resource_for_read()),
            write_index: index_of(settings.resource_for_write()),
            health_timeout: settings.health_timeout.clone(),
            closed: false,
        }
    }

    /// 📌 The node every request of this client goes to.
    pub fn target(&self) -> &NodeAddress {
        &self.target
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.target.base_url(), path)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            anyhow::bail!("💀 Elasticsearch client for [{}] used after close", self.target);
        }
        Ok(())
    }

    fn read_index(&self) -> Result<String> {
        self.read_index
            .clone()
            .context("💀 Elasticsearch client has no read resource configured")
    }

    fn write_index(&self) -> Result<String> {
        self.write_index
            .clone()
            .context("💀 Elasticsearch client has no write resource configured")
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        self.ensure_open()?;
        let response = self
            .credentials
            .apply(self.http.get(self.url(path)))
            .send()
            .await
            .with_context(|| format!("💀 GET {path} to [{}] never made it", self.target))?;
        json_body(response, &format!("GET {path}")).await
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        self.ensure_open()?;
        let response = self
            .credentials
            .apply(self.http.head(self.url(&format!("/{index}"))))
            .send()
            .await
            .with_context(|| format!("💀 HEAD /{index} to [{}] never made it", self.target))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => anyhow::bail!("💀 HEAD /{index} answered with status {status}"),
        }
    }

    /// 🗺️ `_search_shards` joined with `_nodes/http`: one started copy per shard, with a
    /// dialable node. Reads take the first started copy of any role; writes want the primary.
    async fn shard_map(&self, index: &str, primaries_only: bool) -> Result<BTreeMap<Shard, Node>> {
        let http_nodes = parse_http_nodes(&self.get_json("/_nodes/http").await?)?;
        let body = self.get_json(&format!("/{index}/_search_shards")).await?;
        let groups = body
            .get("shards")
            .and_then(Value::as_array)
            .context("💀 _search_shards response has no `shards` array")?;

        let mut shards = BTreeMap::new();
        for group in groups.iter().filter_map(Value::as_array) {
            for copy in group {
                let primary = copy.get("primary").and_then(Value::as_bool).unwrap_or(false);
                if primaries_only && !primary {
                    continue;
                }
                // -- 🚧 relocating/initializing copies can't serve a scroll yet
                if copy.get("state").and_then(Value::as_str).is_some_and(|s| s != "STARTED") {
                    continue;
                }
                let (Some(shard_index), Some(shard_id), Some(node_id)) = (
                    copy.get("index").and_then(Value::as_str),
                    copy.get("shard").and_then(Value::as_u64),
                    copy.get("node").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let Some(node) = http_nodes.get(node_id) else {
                    trace!("🙈 Shard copy on [{}] skipped; that node serves no HTTP", node_id);
                    continue;
                };
                let shard_id = u32::try_from(shard_id)
                    .with_context(|| format!("💀 Shard id [{shard_id}] does not fit in a u32"))?;
                shards.insert(Shard::new(shard_index, shard_id, primary), node.clone());
                break;
            }
        }
        Ok(shards)
    }
}

#[async_trait]
impl ClusterClient for ElasticsearchClient {
    async fn index_exists(&mut self) -> Result<bool> {
        let index = self.read_index()?;
        self.exists(&index).await
    }

    async fn read_target_shards(&mut self) -> Result<BTreeMap<Shard, Node>> {
        let index = self.read_index()?;
        self.shard_map(&index, false).await
    }

    async fn write_target_primary_shards(&mut self) -> Result<BTreeMap<Shard, Node>> {
        let index = self.write_index()?;
        self.shard_map(&index, true).await
    }

    async fn mapping(&mut self) -> Result<Field> {
        let index = self.read_index()?;
        let body = self.get_json(&format!("/{index}/_mapping")).await?;
        Field::from_mapping_response(&index, &body)
    }

    async fn touch(&mut self) -> Result<bool> {
        let index = self.write_index()?;
        if self.exists(&index).await? {
            return Ok(false);
        }
        let response = self
            .credentials
            .apply(self.http.put(self.url(&format!("/{index}"))))
            .send()
            .await
            .with_context(|| format!("💀 PUT /{index} to [{}] never made it", self.target))?;
        let status = response.status();
        if status.is_success() {
            debug!("🏗️ Created write target [{}]", index);
            return Ok(true);
        }
        let text = response.text().await.unwrap_or_default();
        // -- 🏁 somebody else's task won the creation race; the index exists, which is all we wanted
        if status == StatusCode::BAD_REQUEST && text.contains("resource_already_exists_exception") {
            return Ok(false);
        }
        anyhow::bail!("💀 PUT /{index} answered with status {status}: {text}")
    }

    async fn wait_for_yellow(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let index = self.write_index()?;
        let path = format!(
            "/_cluster/health/{index}?wait_for_status=yellow&timeout={}",
            self.health_timeout
        );
        let response = self
            .credentials
            .apply(self.http.get(self.url(&path)))
            .send()
            .await
            .with_context(|| format!("💀 Health request to [{}] never made it", self.target))?;
        // -- ⏳ a timed-out health wait comes back as 408 with the same body
        if response.status() == StatusCode::REQUEST_TIMEOUT {
            return Ok(true);
        }
        let body = json_body(response, "GET /_cluster/health").await?;
        Ok(body.get("timed_out").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn open_scroll(&mut self, query: &QueryBuilder, reader: ScrollReader) -> Result<ScrollBackend> {
        self.ensure_open()?;
        let scroll = ElasticsearchScroll::open(
            self.http.clone(),
            self.credentials.clone(),
            self.target.clone(),
            query,
            reader,
        )
        .await?;
        Ok(ScrollBackend::Elasticsearch(scroll))
    }

    async fn bulk(&mut self, payload: String) -> Result<()> {
        self.ensure_open()?;
        debug!("📡 Sending {} bytes to /_bulk on [{}]", payload.len(), self.target);
        let response = self
            .credentials
            .apply(self.http.post(self.url("/_bulk")))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("💀 Bulk request to [{}] never made it", self.target))?;
        let body = json_body(response, "POST /_bulk").await?;
        if body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let first = body
                .get("items")
                .and_then(Value::as_array)
                .and_then(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_object()?.values().next())
                        .find_map(|outcome| outcome.get("error").cloned())
                })
                .unwrap_or_else(|| json!("unknown"));
            anyhow::bail!("💀 Bulk request was accepted but some documents were not: {first}");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            trace!("🗑️ Elasticsearch client for [{}] closed", self.target);
        }
        Ok(())
    }
}
