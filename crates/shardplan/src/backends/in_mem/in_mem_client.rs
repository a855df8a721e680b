//! 🧪 InMemoryClient: answers metadata questions from a `Mutex` instead of a cluster.
//!
//! Every metadata call bumps `metadata_calls`, so a test can prove a read opened with
//! zero extra round trips. `close()` gives the open-client slot back exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, trace};

use super::{ClusterState, InMemoryCluster, IndexState};
use crate::backends::in_mem::InMemoryScroll;
use crate::backends::{ClusterClient, ScrollBackend};
use crate::cluster::{Node, NodeAddress, Shard};
use crate::common::Record;
use crate::mapping::Field;
use crate::query::QueryBuilder;
use crate::readers::ScrollReader;
use crate::resource::Resource;
use crate::settings::Settings;

#[derive(Debug)]
pub struct InMemoryClient {
    cluster: Arc<InMemoryCluster>,
    read_index: Option<String>,
    write_index: Option<String>,
    pin: Option<NodeAddress>,
    closed: bool,
}

impl InMemoryClient {
    pub(crate) fn new(cluster: Arc<InMemoryCluster>, settings: &Settings, pin: Option<NodeAddress>) -> Self {
        let index_of = |raw: Result<&str>| {
            raw.ok()
                .and_then(|raw| Resource::parse(raw).ok())
                .map(|resource| resource.index)
        };
        Self {
            cluster,
            read_index: index_of(settings.resource_for_read()),
            write_index: index_of(settings.resource_for_write()),
            pin,
            closed: false,
        }
    }

    pub fn pin(&self) -> Option<&NodeAddress> {
        self.pin.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            anyhow::bail!("💀 In-memory client used after close. It has already gone home.");
        }
        Ok(())
    }

    fn read_index(&self) -> Result<&str> {
        self.read_index
            .as_deref()
            .context("💀 In-memory client has no read resource to talk about")
    }

    fn write_index(&self) -> Result<&str> {
        self.write_index
            .as_deref()
            .context("💀 In-memory client has no write resource to talk about")
    }

    /// 📊 Lock the cluster and count one metadata round trip.
    fn metadata_call(&self) -> Result<std::sync::MutexGuard<'_, ClusterState>> {
        self.ensure_open()?;
        let mut state = self.cluster.lock();
        state.stats.metadata_calls += 1;
        Ok(state)
    }
}

fn shard_map(state: &ClusterState, index: &str, for_reads: bool) -> BTreeMap<Shard, Node> {
    let mut shards = BTreeMap::new();
    for name in state.resolve(index) {
        let Some(index_state) = state.indices.get(&name) else {
            continue;
        };
        // -- 🚫 never two copies of one shard on the same node
        let placeable = (index_state.replicas as usize + 1).min(state.nodes.len()).max(1) as u32;
        for shard_id in 0..index_state.shards {
            // -- 🔄 reads rotate through the copies so replicas get a turn; writes want primaries
            let copy = if for_reads { shard_id % placeable } else { 0 };
            if let Some(node) = state.node_for(shard_id, copy) {
                shards.insert(Shard::new(name.clone(), shard_id, copy == 0), node.clone());
            }
        }
    }
    shards
}

/// ✂️ Keep only the top-level keys some requested field path starts with.
fn project(source: &Value, fields: &[String]) -> Value {
    match source {
        Value::Object(object) if !fields.is_empty() => {
            let kept: Map<String, Value> = object
                .iter()
                .filter(|(key, _)| {
                    fields.iter().any(|field| {
                        field == *key
                            || field
                                .strip_prefix(key.as_str())
                                .is_some_and(|rest| rest.starts_with('.'))
                    })
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(kept)
        }
        other => other.clone(),
    }
}

#[async_trait]
impl ClusterClient for InMemoryClient {
    async fn index_exists(&mut self) -> Result<bool> {
        let index = self.read_index()?.to_string();
        let state = self.metadata_call()?;
        Ok(!state.resolve(&index).is_empty())
    }

    async fn read_target_shards(&mut self) -> Result<BTreeMap<Shard, Node>> {
        let index = self.read_index()?.to_string();
        let state = self.metadata_call()?;
        let shards = shard_map(&state, &index, true);
        trace!("🧪 In-memory [{}] has {} readable shard copies", index, shards.len());
        Ok(shards)
    }

    async fn write_target_primary_shards(&mut self) -> Result<BTreeMap<Shard, Node>> {
        let index = self.write_index()?.to_string();
        let state = self.metadata_call()?;
        Ok(shard_map(&state, &index, false))
    }

    async fn mapping(&mut self) -> Result<Field> {
        let index = self.read_index()?.to_string();
        let state = self.metadata_call()?;
        let mut response = Map::new();
        for name in state.resolve(&index) {
            if let Some(index_state) = state.indices.get(&name) {
                response.insert(
                    name.clone(),
                    json!({"mappings": {"properties": index_state.properties}}),
                );
            }
        }
        Field::from_mapping_response(&index, &Value::Object(response))
    }

    async fn touch(&mut self) -> Result<bool> {
        let index = self.write_index()?.to_string();
        let mut state = self.metadata_call()?;
        if index.contains('*') || index.contains(',') || !state.resolve(&index).is_empty() {
            return Ok(false);
        }
        let shards = state.created_index_shards;
        state.indices.insert(
            index.clone(),
            IndexState {
                shards,
                replicas: 0,
                properties: json!({}),
                documents: Vec::new(),
            },
        );
        debug!("🏗️ In-memory cluster created [{}] with {} shard(s)", index, shards);
        Ok(true)
    }

    async fn wait_for_yellow(&mut self) -> Result<bool> {
        let state = self.metadata_call()?;
        Ok(state.health_times_out)
    }

    async fn open_scroll(&mut self, query: &QueryBuilder, reader: ScrollReader) -> Result<ScrollBackend> {
        self.ensure_open()?;
        let shard_filter = query
            .shard_id()
            .map(|raw| {
                raw.parse::<u32>()
                    .with_context(|| format!("💀 Shard preference [{raw}] is not a shard number"))
            })
            .transpose()?;

        let hits: Vec<Value> = {
            let state = self.cluster.lock();
            let mut hits = Vec::new();
            for name in state.resolve(query.index()) {
                let Some(index_state) = state.indices.get(&name) else {
                    continue;
                };
                if let (Some(shard), Some(node_id)) = (shard_filter, query.node_id()) {
                    let hosted = (0..=index_state.replicas)
                        .filter_map(|copy| state.node_for(shard, copy))
                        .any(|node| node.id == node_id);
                    if !hosted {
                        anyhow::bail!(
                            "💀 Node [{node_id}] holds no copy of shard [{name}][{shard}]. Wrong door."
                        );
                    }
                }
                let shard_count = index_state.shards.max(1) as usize;
                for (position, (id, source)) in index_state.documents.iter().enumerate() {
                    let on_shard = (position % shard_count) as u32;
                    if shard_filter.is_some_and(|wanted| wanted != on_shard) {
                        continue;
                    }
                    hits.push(json!({
                        "_index": name,
                        "_id": id,
                        "_source": project(source, query.field_list()),
                    }));
                }
            }
            hits
        };

        let records = hits
            .iter()
            .map(|hit| reader.read_hit(hit))
            .collect::<Result<Vec<Record>>>()?;
        Ok(ScrollBackend::InMemory(InMemoryScroll::open(
            Arc::clone(&self.cluster),
            records,
        )))
    }

    async fn bulk(&mut self, payload: String) -> Result<()> {
        self.ensure_open()?;
        let default_index = self.write_index.clone();
        let mut lines = payload.lines().filter(|line| !line.trim().is_empty());
        let mut batch: Vec<(String, Option<String>, Value)> = Vec::new();
        while let Some(action_line) = lines.next() {
            let action: Value = serde_json::from_str(action_line)
                .with_context(|| format!("💀 Bulk action line is not JSON: [{action_line}]"))?;
            let meta = action
                .get("index")
                .or_else(|| action.get("create"))
                .context("💀 Bulk action is neither index nor create")?;
            let index = meta
                .get("_index")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| default_index.clone())
                .context("💀 Bulk action without an _index and no write resource to fall back on")?;
            let id = meta.get("_id").and_then(Value::as_str).map(str::to_string);
            let source_line = lines
                .next()
                .context("💀 Bulk payload ended between an action and its document")?;
            let source: Value = serde_json::from_str(source_line)
                .with_context(|| format!("💀 Bulk document line is not JSON: [{source_line}]"))?;
            batch.push((index, id, source));
        }

        let mut state = self.cluster.lock();
        let shards = state.created_index_shards;
        let count = batch.len();
        for (index, id, source) in batch {
            // -- 🏗️ auto-create, same as a cluster with default settings would
            let index_state = state.indices.entry(index).or_insert_with(|| IndexState {
                shards,
                replicas: 0,
                properties: json!({}),
                documents: Vec::new(),
            });
            let id = id.unwrap_or_else(|| index_state.documents.len().to_string());
            index_state.documents.push((id, source));
        }
        state.stats.bulks.push((self.pin.clone(), count));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.cluster.lock();
        state.stats.open_clients = state.stats.open_clients.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::{InMemoryClusterConfig, InMemoryConnector, InMemoryIndexConfig};
    use crate::backends::{ClientBackend, ClusterConnector, ScrollStream};
    use crate::readers::ValueReaderBackend;

    fn connector() -> InMemoryConnector {
        InMemoryConnector::from_config(InMemoryClusterConfig {
            nodes: (0..2)
                .map(|i| Node::new(format!("n{i}"), format!("node-{i}"), "127.0.0.1", 9200 + i))
                .collect(),
            indices: vec![InMemoryIndexConfig {
                name: "logs".to_string(),
                shards: 2,
                replicas: 1,
                properties: Some(json!({"msg": {"type": "text"}, "n": {"type": "long"}})),
                documents: (0..5).map(|i| json!({"_id": format!("d{i}"), "msg": "hi", "n": i})).collect(),
            }],
            ..InMemoryClusterConfig::default()
        })
    }

    fn settings() -> Settings {
        Settings {
            resource_read: Some("logs".to_string()),
            resource_write: Some("fresh".to_string()),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_replicas_are_readable_but_writes_want_primaries() -> Result<()> {
        let connector = connector();
        let mut client = connector.connect(&settings(), None).await?;
        assert!(client.index_exists().await?);
        let readable = client.read_target_shards().await?;
        assert_eq!(
            readable.keys().cloned().collect::<Vec<_>>(),
            vec![Shard::new("logs", 0, true), Shard::new("logs", 1, false)]
        );
        assert_eq!(readable[&Shard::new("logs", 1, false)].id, "n0");
        assert!(client.write_target_primary_shards().await?.is_empty());
        let mapping = client.mapping().await?;
        assert!(mapping.resolve("n").is_some());
        client.close().await?;
        client.close().await?;

        let stats = connector.cluster().stats();
        assert_eq!(stats.metadata_calls, 4);
        assert_eq!(stats.open_clients, 0);
        assert_eq!(stats.clients_opened, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_touch_creates_once_and_scrolls_stay_on_their_shard() -> Result<()> {
        let connector = connector();
        let mut client = connector.connect(&settings(), None).await?;
        assert!(client.touch().await?);
        assert!(!client.touch().await?);
        assert_eq!(client.write_target_primary_shards().await?.len(), 1);

        let reader = ScrollReader::new(ValueReaderBackend::from_name("json")?, None, false, "_metadata");
        let query = QueryBuilder::query(&settings())?
            .shard("1")
            .only_node("n1")
            .fields(&["msg".to_string()]);
        let mut scroll = client.open_scroll(&query, reader.clone()).await?;
        assert_eq!(connector.cluster().stats().open_scrolls, 1);
        let mut ids = Vec::new();
        while let Some(record) = scroll.next().await? {
            assert_eq!(record.source, json!({"msg": "hi"}));
            ids.push(record.id);
        }
        assert_eq!(ids, vec!["d1", "d3"]);
        scroll.close().await?;
        assert_eq!(connector.cluster().stats().open_scrolls, 0);

        // -- 🚪 there is no node n9, so it hosts nothing
        let wrong = QueryBuilder::query(&settings())?.shard("0").only_node("n9");
        assert!(client.open_scroll(&wrong, reader).await.is_err());
        client.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bulk_lands_documents_and_remembers_the_pin() -> Result<()> {
        let connector = connector();
        let pin = NodeAddress::new("127.0.0.1", 9201);
        let mut client = connector.connect(&settings(), Some(&pin)).await?;
        assert!(matches!(&client, ClientBackend::InMemory(c) if c.pin() == Some(&pin)));
        client
            .bulk("{\"index\":{\"_id\":\"a\"}}\n{\"x\":1}\n{\"index\":{\"_index\":\"other\"}}\n{\"x\":2}\n".to_string())
            .await?;
        assert_eq!(connector.cluster().documents("fresh"), vec![json!({"x": 1})]);
        assert_eq!(connector.cluster().documents("other"), vec![json!({"x": 2})]);
        assert_eq!(connector.cluster().stats().bulks, vec![(Some(pin), 2)]);
        assert!(client.bulk("{\"index\":{}}\n".to_string()).await.is_err());
        client.close().await?;
        Ok(())
    }
}
