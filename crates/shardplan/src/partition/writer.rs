//! ✍️ PartitionWriter: picks where a task's bulk writes land, then holds that line.
//!
//! 🎬 COLD OPEN - INT. WRITE TASK 3 OF 8 - STARTUP
//!
//! Four primary shards, sorted so every task sees the same list. Task 3 takes bucket `3 % 4`.
//! Task 7 also takes bucket `7 % 4`. They will share a node. Nobody fixes this, on purpose:
//! it is the behavior every deployment already depends on.
//!
//! 🧠 Knowledge graph:
//! - Single index: touch (create if missing), wait for yellow only if we just created it,
//!   list primaries, sort, bucket = `task % count` (random `[1, count]` when `task <= 0`),
//!   pin to the bucket's node.
//! - Index pattern: the concrete index is per document, so no shard affinity; pin a random node.
//! - Settings that already carry a cluster version skip discovery.
//! - Randomness is injected (`&mut impl Rng`) so tests can seed it.
//! - Every client gets its pin as an argument. `Settings` is never edited to pin.

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::{Map, Value, json};
use tracing::{debug, trace, warn};

use crate::backends::{ClientBackend, ClusterClient, ClusterConnector};
use crate::cluster::{Node, NodeAddress, Shard};
use crate::error::PartitionError;
use crate::partition::keep_first_error;
use crate::resource::{IndexExtractor, Resource};
use crate::settings::Settings;

/// ✍️ One task's write session, pinned to one node.
#[derive(Debug)]
pub struct PartitionWriter {
    /// 🔢 The task ordinal this writer was created for. Negative = no task context.
    pub number: i64,
    pub total: usize,
    pub settings: Settings,
    resource: Resource,
    extractor: IndexExtractor,
    pin: NodeAddress,
    client: ClientBackend,
    closed: bool,
}

/// 🎯 Choose the write target for `current_task` and open a client pinned to it.
pub async fn create_writer<C, R>(
    settings: &Settings,
    connector: &C,
    current_task: i64,
    total_tasks: usize,
    rng: &mut R,
) -> Result<PartitionWriter>
where
    C: ClusterConnector + ?Sized,
    R: Rng + ?Sized,
{
    // -- 🔭 a known cluster version means these settings already went through discovery
    let settings = if settings.cluster_version.is_some() {
        debug!("🔭 Cluster version already known; reusing the discovered node list");
        settings.clone()
    } else {
        connector.discover(settings).await?
    };

    let nodes = settings.discovered_or_declared_nodes();
    if nodes.is_empty() {
        return Err(PartitionError::NoNodes.into());
    }
    // -- 🎲 no task context: spread by chance instead of by ordinal
    let selected = match usize::try_from(current_task) {
        Ok(task) => task % nodes.len(),
        Err(_) => rng.random_range(0..nodes.len()),
    };
    let initial_pin = nodes[selected].clone();

    let resource = Resource::parse(settings.resource_for_write()?)?;
    let extractor = IndexExtractor::compile(&resource.index)?;

    let pin = if extractor.has_pattern() {
        debug!("🧭 Resource [{}] resolves as an index pattern", resource);
        let pin = nodes[rng.random_range(0..nodes.len())].clone();
        debug!("✍️ Partition writer instance [{}] assigned to [{}]", current_task, pin);
        pin
    } else {
        debug!("🧭 Resource [{}] resolves as a single index", resource);
        single_index_target(&settings, connector, &resource, &initial_pin, current_task, rng).await?
    };

    let client = connector.connect(&settings, Some(&pin)).await?;
    Ok(PartitionWriter {
        number: current_task,
        total: total_tasks,
        settings,
        resource,
        extractor,
        pin,
        client,
        closed: false,
    })
}

async fn single_index_target<C, R>(
    settings: &Settings,
    connector: &C,
    resource: &Resource,
    initial_pin: &NodeAddress,
    current_task: i64,
    rng: &mut R,
) -> Result<NodeAddress>
where
    C: ClusterConnector + ?Sized,
    R: Rng + ?Sized,
{
    let mut client = connector.connect(settings, Some(initial_pin)).await?;
    let surveyed = primary_shards(&mut client, resource).await;
    let closed = client.close().await;
    let primaries = keep_first_error(surveyed, closed, "Write-target survey client")?;

    let mut ordered: Vec<(Shard, Node)> = primaries.into_iter().collect();
    // -- 🔒 strict order, so bucket n is the same shard for everybody
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    trace!(
        "🧩 Partition writer instance [{}] discovered [{}] primary shards {:?}",
        current_task,
        ordered.len(),
        ordered.iter().map(|(shard, _)| shard.to_string()).collect::<Vec<_>>()
    );
    let count = ordered.len();
    if count == 0 {
        return Err(PartitionError::NoPrimaryShards {
            resource: resource.to_string(),
        }
        .into());
    }

    // -- 🎲 no task info: a random bucket in [1, count], then the same modulo as everyone else
    let instance = if current_task <= 0 {
        rng.random_range(1..=count)
    } else {
        usize::try_from(current_task).context("💀 Task ordinal does not fit in usize")?
    };
    let bucket = instance % count;
    let (shard, node) = &ordered[bucket];
    let pin = node.address();
    debug!(
        "✍️ Partition writer instance [{}] assigned to primary shard [{}] at address [{}]",
        instance, shard, pin
    );
    Ok(pin)
}

async fn primary_shards<T>(
    client: &mut T,
    resource: &Resource,
) -> Result<std::collections::BTreeMap<Shard, Node>>
where
    T: ClusterClient + ?Sized,
{
    if client.touch().await? && client.wait_for_yellow().await? {
        warn!("⚠️ Timed out waiting for index [{}] to reach yellow health", resource);
    }
    client.write_target_primary_shards().await
}

impl PartitionWriter {
    /// 📌 The node every write of this writer goes to.
    pub fn pin(&self) -> &NodeAddress {
        &self.pin
    }

    pub fn extractor(&self) -> &IndexExtractor {
        &self.extractor
    }

    /// 📝 Render documents as a `_bulk` payload and send it. Returns how many went out.
    ///
    /// A string `_id` on a document becomes the action's `_id`. For patterns, each document's
    /// `_index` comes from the extractor.
    pub async fn write_documents(&mut self, documents: &[Value]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let payload = self.render_bulk(documents)?;
        self.send_bulk(payload).await?;
        Ok(documents.len())
    }

    fn render_bulk(&self, documents: &[Value]) -> Result<String> {
        let mut payload = String::new();
        for document in documents {
            let index = if self.extractor.has_pattern() {
                self.extractor.extract(document)?
            } else {
                self.resource.index.clone()
            };
            let mut source = document.clone();
            let id = source
                .as_object_mut()
                .and_then(|object| object.remove("_id"))
                .and_then(|id| id.as_str().map(str::to_string));

            let mut action = Map::new();
            action.insert("_index".to_string(), Value::String(index));
            if let Some(id) = id {
                action.insert("_id".to_string(), Value::String(id));
            }
            payload.push_str(&json!({ "index": action }).to_string());
            payload.push('\n');
            payload.push_str(&source.to_string());
            payload.push('\n');
        }
        Ok(payload)
    }

    /// 📨 Send an already-rendered NDJSON payload through the pinned client.
    pub async fn send_bulk(&mut self, payload: String) -> Result<()> {
        if self.closed {
            anyhow::bail!("💀 Partition writer [{}] is closed", self.number);
        }
        self.client.bulk(payload).await
    }

    /// 🗑️ Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::{InMemoryClusterConfig, InMemoryConnector, InMemoryIndexConfig};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn nodes() -> Vec<Node> {
        (0..3)
            .map(|i| Node::new(format!("n{i}"), format!("es-{i}"), format!("10.0.0.{i}"), 9200))
            .collect()
    }

    fn connector(shards: u32, health_times_out: bool) -> InMemoryConnector {
        InMemoryConnector::from_config(InMemoryClusterConfig {
            nodes: nodes(),
            indices: vec![InMemoryIndexConfig {
                name: "out".to_string(),
                shards,
                replicas: 1,
                properties: None,
                documents: Vec::new(),
            }],
            health_times_out,
            created_index_shards: 2,
        })
    }

    fn writing(resource: &str) -> Settings {
        Settings {
            resource_write: Some(resource.to_string()),
            ..Settings::default()
        }
    }

    async fn pin_for(connector: &InMemoryConnector, resource: &str, task: i64, seed: u64) -> Result<NodeAddress> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut writer = create_writer(&writing(resource), connector, task, 8, &mut rng).await?;
        let pin = writer.pin().clone();
        writer.close().await?;
        writer.close().await?;
        Ok(pin)
    }

    #[tokio::test]
    async fn the_one_where_the_same_task_always_lands_on_the_same_shard() -> Result<()> {
        let connector = connector(4, false);
        // -- 🔢 4 primaries on 3 nodes: shard s lives on n(s % 3)
        for task in 1..=8i64 {
            let first = pin_for(&connector, "out", task, 1).await?;
            let again = pin_for(&connector, "out", task, 99).await?;
            assert_eq!(first, again, "task {task} changed its mind");
            let expected_shard = (task as usize) % 4;
            assert_eq!(first, NodeAddress::new(format!("10.0.0.{}", expected_shard % 3), 9200));
        }
        // -- ⚠️ task 1 and task 5 share a bucket; that is the documented skew
        assert_eq!(pin_for(&connector, "out", 1, 0).await?, pin_for(&connector, "out", 5, 0).await?);
        assert_eq!(connector.cluster().stats().open_clients, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_no_task_number_means_a_seeded_coin_flip() -> Result<()> {
        let connector = connector(4, false);
        for task in [-1i64, 0] {
            for seed in 0..5 {
                assert_eq!(
                    pin_for(&connector, "out", task, seed).await?,
                    pin_for(&connector, "out", task, seed).await?
                );
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_fresh_index_is_created_and_a_slow_yellow_is_only_a_warning() -> Result<()> {
        let connector = connector(4, true);
        let mut rng = StdRng::seed_from_u64(7);
        let mut writer = create_writer(&writing("brand-new"), &connector, 3, 4, &mut rng).await?;
        assert!(connector.cluster().index_names().contains(&"brand-new".to_string()));
        // -- 🧩 created with 2 shards: bucket 3 % 2 = 1 → shard 1 → n1
        assert_eq!(writer.pin(), &NodeAddress::new("10.0.0.1", 9200));
        assert_eq!((writer.number, writer.total), (3, 4));

        let sent = writer
            .write_documents(&[json!({"_id": "a", "v": 1}), json!({"v": 2})])
            .await?;
        assert_eq!(sent, 2);
        assert_eq!(connector.cluster().documents("brand-new"), vec![json!({"v": 1}), json!({"v": 2})]);
        let stats = connector.cluster().stats();
        assert_eq!(stats.bulks, vec![(Some(NodeAddress::new("10.0.0.1", 9200)), 2)]);
        assert_eq!(stats.open_clients, 1, "only the writer's own client is still open");

        writer.close().await?;
        assert!(writer.send_bulk(String::new()).await.is_err());
        assert_eq!(connector.cluster().stats().open_clients, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_pattern_target_routes_every_document_itself() -> Result<()> {
        let connector = connector(4, false);
        let resource = "events-{day|yyyy.MM.dd}";
        let mut rng = StdRng::seed_from_u64(3);
        let mut writer = create_writer(&writing(resource), &connector, 2, 4, &mut rng).await?;
        assert!(writer.extractor().has_pattern());
        assert!(nodes().iter().any(|n| &n.address() == writer.pin()));
        // -- 🚫 no touch, no shard listing for patterns
        assert_eq!(connector.cluster().stats().metadata_calls, 0);

        writer
            .write_documents(&[json!({"day": "2024-03-01", "x": 1}), json!({"day": "2024-03-02", "x": 2})])
            .await?;
        assert_eq!(connector.cluster().documents("events-2024.03.01").len(), 1);
        assert_eq!(connector.cluster().documents("events-2024.03.02").len(), 1);
        writer.close().await?;

        let again = pin_for(&connector, resource, 2, 3).await?;
        let mut rng = StdRng::seed_from_u64(3);
        let mut twin = create_writer(&writing(resource), &connector, 2, 4, &mut rng).await?;
        assert_eq!(twin.pin(), &again);
        twin.close().await?;
        assert_eq!(connector.cluster().stats().open_clients, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_settings_that_know_their_cluster_are_not_rediscovered() -> Result<()> {
        let connector = connector(4, false);
        let declared = NodeAddress::new("10.0.0.9", 9200);
        let undiscovered = Settings {
            nodes: vec![declared.clone()],
            nodes_discovery: true,
            ..writing("events-{day}")
        };
        let mut rng = StdRng::seed_from_u64(5);

        let mut fresh = create_writer(&undiscovered, &connector, 1, 2, &mut rng).await?;
        assert!(nodes().iter().any(|n| &n.address() == fresh.pin()), "discovery ran");
        fresh.close().await?;

        // -- 🔭 a version on file: the declared node is the whole cluster as far as we know
        let known = Settings {
            cluster_version: Some("8.11.0".to_string()),
            ..undiscovered
        };
        let mut writer = create_writer(&known, &connector, 1, 2, &mut rng).await?;
        assert_eq!(writer.pin(), &declared);
        assert_eq!(writer.settings.cluster_version.as_deref(), Some("8.11.0"));
        writer.close().await?;
        assert_eq!(connector.cluster().stats().open_clients, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_there_is_nowhere_to_write() -> Result<()> {
        let connector = connector(0, false);
        let mut rng = StdRng::seed_from_u64(1);
        let err = create_writer(&writing("out"), &connector, 1, 1, &mut rng).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::NoPrimaryShards { .. })
        ));
        assert_eq!(connector.cluster().stats().open_clients, 0);

        let nobody_home = Settings {
            nodes: Vec::new(),
            nodes_discovery: false,
            ..writing("out")
        };
        let err = create_writer(&nobody_home, &connector, 1, 1, &mut rng).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PartitionError>(), Some(PartitionError::NoNodes)));
        Ok(())
    }
}
