//! 🧪 The in-memory cluster: a whole Elasticsearch cluster that fits in a `Mutex`.
//!
//! 🎬 *[a cluster with no network, no JVM, and no garbage collector pauses.]*
//! *[it has shards. it has nodes. it has a clipboard where it writes down every client you open.]*
//!
//! 🧠 Knowledge graph:
//! - `InMemoryClusterConfig`: serde-friendly description (nodes, indices, docs). Loadable from TOML
//!   via `[backend.InMemory]`, so a dry run needs no cluster at all.
//! - `InMemoryCluster`: shared state behind `Arc<Mutex<..>>`. Placement is deterministic:
//!   shard `s` primary on node `s % n`, replica `r` on node `(s + r) % n`, reads use copy
//!   `s % copies`. Doc `i` lives on shard `i % shard_count`.
//! - It keeps score: clients/scrolls open right now, their peaks, metadata calls, pins, bulks.
//!   Tests read those numbers to prove resource bounds instead of trusting vibes.
//! - `InMemoryConnector` implements `ClusterConnector`; clients and scrolls live next door.
//!
//! 🦆 The duck is an index with zero shards. It is valid. It is empty. It is at peace.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::backends::{ClientBackend, ClusterConnector};
use crate::cluster::{Node, NodeAddress};
use crate::settings::Settings;

mod in_mem_client;
mod in_mem_scroll;

pub use in_mem_client::InMemoryClient;
pub use in_mem_scroll::InMemoryScroll;

/// 🏷️ What the simulated cluster says when asked for its version.
pub const IN_MEMORY_VERSION: &str = "8.0.0-in-memory";

/// 📦 One simulated index.
#[derive(Debug, Clone, Deserialize)]
pub struct InMemoryIndexConfig {
    pub name: String,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub replicas: u32,
    /// 🗂️ `properties` block in `_mapping` shape. Absent = empty mapping.
    #[serde(default)]
    pub properties: Option<Value>,
    #[serde(default)]
    pub documents: Vec<Value>,
}

fn default_shards() -> u32 {
    1
}

/// 🧪 Description of a whole simulated cluster.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InMemoryClusterConfig {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub indices: Vec<InMemoryIndexConfig>,
    /// ⏳ Make every yellow-health wait time out. For testing the sad path.
    #[serde(default)]
    pub health_times_out: bool,
    /// 🏗️ Shard count for indices created by `touch`.
    #[serde(default = "default_shards")]
    pub created_index_shards: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    pub(crate) shards: u32,
    pub(crate) replicas: u32,
    pub(crate) properties: Value,
    pub(crate) documents: Vec<(String, Value)>,
}

impl IndexState {
    fn from_config(index: &InMemoryIndexConfig) -> Self {
        let documents = index
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let mut source = doc.clone();
                // -- 🪪 an `_id` in the seed doc is identity, not content
                let id = source
                    .as_object_mut()
                    .and_then(|object| object.remove("_id"))
                    .and_then(|id| id.as_str().map(str::to_string))
                    .unwrap_or_else(|| i.to_string());
                (id, source)
            })
            .collect();
        Self {
            shards: index.shards,
            replicas: index.replicas,
            properties: index.properties.clone().unwrap_or_else(|| json!({})),
            documents,
        }
    }
}

/// 📊 Counters the cluster keeps about its visitors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryStats {
    pub clients_opened: usize,
    pub open_clients: usize,
    pub peak_open_clients: usize,
    pub scrolls_opened: usize,
    pub open_scrolls: usize,
    pub peak_open_scrolls: usize,
    pub metadata_calls: usize,
    /// 📌 The pin of every client ever connected, in connect order.
    pub pins: Vec<Option<NodeAddress>>,
    /// 📨 (pin, document count) of every bulk request received.
    pub bulks: Vec<(Option<NodeAddress>, usize)>,
}

#[derive(Debug)]
pub(crate) struct ClusterState {
    pub(crate) nodes: Vec<Node>,
    pub(crate) indices: BTreeMap<String, IndexState>,
    pub(crate) health_times_out: bool,
    pub(crate) created_index_shards: u32,
    pub(crate) stats: InMemoryStats,
}

impl ClusterState {
    /// 🗺️ Concrete index names matching a resource index (`a,b`, `logs-*`, `*`).
    pub(crate) fn resolve(&self, index: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for pattern in index.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let matched = self.indices.keys().filter(|name| match pattern.strip_suffix('*') {
                Some(prefix) => name.starts_with(prefix),
                None => name.as_str() == pattern,
            });
            for name in matched {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// 🖥️ The node hosting copy `copy` (0 = primary) of shard `shard`.
    pub(crate) fn node_for(&self, shard: u32, copy: u32) -> Option<&Node> {
        if self.nodes.is_empty() {
            return None;
        }
        let slot = (shard as usize + copy as usize) % self.nodes.len();
        self.nodes.get(slot)
    }
}

/// 🧪 A shared simulated cluster. Clone the `Arc`, not the cluster.
#[derive(Debug)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new(config: InMemoryClusterConfig) -> Arc<InMemoryCluster> {
        let nodes = if config.nodes.is_empty() {
            // -- 🏝️ a cluster needs at least one node, even an imaginary one
            vec![Node::new("node-0", "in-memory-0", "127.0.0.1", 9200)]
        } else {
            config.nodes
        };
        let indices = config
            .indices
            .iter()
            .map(|index| (index.name.clone(), IndexState::from_config(index)))
            .collect();
        Arc::new(InMemoryCluster {
            state: Mutex::new(ClusterState {
                nodes,
                indices,
                health_times_out: config.health_times_out,
                created_index_shards: config.created_index_shards.max(1),
                stats: InMemoryStats::default(),
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ClusterState> {
        // -- 🩹 a poisoned lock means a test panicked mid-update; the counters are still readable
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 📊 Snapshot of the visitor counters.
    pub fn stats(&self) -> InMemoryStats {
        self.lock().stats.clone()
    }

    /// 📦 Documents currently stored in `index`, in insertion order.
    pub fn documents(&self, index: &str) -> Vec<Value> {
        self.lock()
            .indices
            .get(index)
            .map(|state| state.documents.iter().map(|(_, doc)| doc.clone()).collect())
            .unwrap_or_default()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.lock().indices.keys().cloned().collect()
    }
}

/// 🏭 Connector over a shared [`InMemoryCluster`].
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    cluster: Arc<InMemoryCluster>,
}

impl InMemoryConnector {
    pub fn new(cluster: Arc<InMemoryCluster>) -> Self {
        Self { cluster }
    }

    pub fn from_config(config: InMemoryClusterConfig) -> Self {
        Self::new(InMemoryCluster::new(config))
    }

    pub fn cluster(&self) -> &Arc<InMemoryCluster> {
        &self.cluster
    }
}

#[async_trait]
impl ClusterConnector for InMemoryConnector {
    async fn discover(&self, settings: &Settings) -> Result<Settings> {
        let nodes = if settings.nodes_discovery {
            self.cluster.lock().nodes.iter().map(Node::address).collect()
        } else {
            Vec::new()
        };
        debug!("🔭 In-memory discovery found {} node(s)", nodes.len());
        Ok(settings.with_discovery(nodes, Some(IN_MEMORY_VERSION.to_string())))
    }

    async fn connect(&self, settings: &Settings, pin: Option<&NodeAddress>) -> Result<ClientBackend> {
        {
            let mut state = self.cluster.lock();
            let stats = &mut state.stats;
            stats.clients_opened += 1;
            stats.open_clients += 1;
            stats.peak_open_clients = stats.peak_open_clients.max(stats.open_clients);
            stats.pins.push(pin.cloned());
        }
        Ok(ClientBackend::InMemory(InMemoryClient::new(
            Arc::clone(&self.cluster),
            settings,
            pin.cloned(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> Vec<Node> {
        (0..3)
            .map(|i| Node::new(format!("n{i}"), format!("node-{i}"), format!("10.0.0.{i}"), 9200))
            .collect()
    }

    #[test]
    fn the_one_where_wildcards_and_commas_find_their_indices() {
        let cluster = InMemoryCluster::new(InMemoryClusterConfig {
            nodes: three_nodes(),
            indices: ["logs-1", "logs-2", "metrics"]
                .iter()
                .map(|name| InMemoryIndexConfig {
                    name: name.to_string(),
                    shards: 1,
                    replicas: 0,
                    properties: None,
                    documents: Vec::new(),
                })
                .collect(),
            ..InMemoryClusterConfig::default()
        });
        let state = cluster.lock();
        assert_eq!(state.resolve("logs-*"), vec!["logs-1", "logs-2"]);
        assert_eq!(state.resolve("metrics, logs-2"), vec!["metrics", "logs-2"]);
        assert!(state.resolve("nope").is_empty());
        assert_eq!(state.node_for(4, 1).map(|n| n.id.as_str()), Some("n2"));
    }

    #[tokio::test]
    async fn the_one_where_discovery_reports_every_node() -> Result<()> {
        let connector = InMemoryConnector::from_config(InMemoryClusterConfig {
            nodes: three_nodes(),
            ..InMemoryClusterConfig::default()
        });
        let discovered = connector.discover(&Settings::default()).await?;
        assert_eq!(discovered.discovered_nodes.len(), 3);
        assert_eq!(discovered.cluster_version.as_deref(), Some(IN_MEMORY_VERSION));

        let quiet = Settings {
            nodes_discovery: false,
            ..Settings::default()
        };
        assert!(connector.discover(&quiet).await?.discovered_nodes.is_empty());
        Ok(())
    }
}
