//! 📖 PartitionReader: one shard's read session, opened only when somebody actually reads.
//!
//! 🧠 Knowledge graph:
//! - Built from a definition alone: value reader by name, mapping from the embedded snapshot,
//!   a client pinned to the definition's node (unless the caller already pinned a global one),
//!   and a query restricted to that shard, that node and the configured fields.
//! - No metadata round trip happens here. The planner already paid for it.
//! - `scroll_query()` opens the cursor on first call and hands back the same one after.
//! - `close()` closes the stream (if any) and then the client. Twice is the same as once.

use anyhow::Result;
use tracing::{trace, warn};

use crate::backends::{ClientBackend, ClusterClient, ClusterConnector, ScrollBackend, ScrollStream};
use crate::cluster::NodeAddress;
use crate::error::PartitionError;
use crate::mapping::Field;
use crate::partition::{PartitionDefinition, keep_first_error};
use crate::query::QueryBuilder;
use crate::readers::{ScrollReader, ValueReaderBackend};
use crate::settings::Settings;

#[derive(Debug)]
pub struct PartitionReader {
    definition: PartitionDefinition,
    scroll_reader: ScrollReader,
    client: ClientBackend,
    query: QueryBuilder,
    pin: NodeAddress,
    scroll: Option<ScrollBackend>,
    closed: bool,
}

/// 🏗️ Turn a definition into a reader without opening any cursor yet.
pub async fn create_reader<C>(
    settings: &Settings,
    definition: &PartitionDefinition,
    connector: &C,
) -> Result<PartitionReader>
where
    C: ClusterConnector + ?Sized,
{
    let value_reader = ValueReaderBackend::from_settings(settings)?;

    let mapping = definition.mapping()?;
    if mapping.is_none() {
        warn!(
            "⚠️ No mapping found for [{}] - either no index exists or the partition configuration has been corrupted",
            definition
        );
    }
    let scroll_reader = ScrollReader::new(
        value_reader,
        mapping,
        settings.read_metadata,
        settings.read_metadata_field.clone(),
    );

    let query = QueryBuilder::query(settings)?
        .on_index(&definition.index)
        .shard(definition.shard_id.to_string())
        .only_node(definition.node_id.clone())
        .fields(&settings.scroll_fields);

    // -- 📌 a global pin beats the partition's own node
    let pin = settings
        .pinned_node
        .clone()
        .unwrap_or_else(|| definition.node_address());
    let client = connector.connect(settings, Some(&pin)).await?;
    trace!("📖 Reader for {} pinned to [{}]", definition, pin);

    Ok(PartitionReader {
        definition: definition.clone(),
        scroll_reader,
        client,
        query,
        pin,
        scroll: None,
        closed: false,
    })
}

impl PartitionReader {
    /// 📜 The scroll cursor for this partition, opened on the first call.
    pub async fn scroll_query(&mut self) -> Result<&mut ScrollBackend> {
        if self.closed {
            return Err(PartitionError::ReaderClosed.into());
        }
        if self.scroll.is_none() {
            let scroll = self
                .client
                .open_scroll(&self.query, self.scroll_reader.clone())
                .await?;
            self.scroll = Some(scroll);
        }
        match self.scroll.as_mut() {
            Some(scroll) => Ok(scroll),
            None => Err(PartitionError::ReaderClosed.into()),
        }
    }

    pub fn definition(&self) -> &PartitionDefinition {
        &self.definition
    }

    pub fn mapping(&self) -> Option<&Field> {
        self.scroll_reader.mapping()
    }

    pub fn query(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn pin(&self) -> &NodeAddress {
        &self.pin
    }

    pub fn is_stream_open(&self) -> bool {
        self.scroll.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 🗑️ Stream first, then the client. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let stream_closed = match self.scroll.take() {
            Some(mut scroll) => scroll.close().await,
            None => Ok(()),
        };
        let client_closed = self.client.close().await;
        keep_first_error(stream_closed, client_closed, "Partition reader client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::{InMemoryClusterConfig, InMemoryConnector, InMemoryIndexConfig};
    use crate::cluster::Node;
    use crate::partition::find_partitions;
    use serde_json::json;

    fn connector() -> InMemoryConnector {
        InMemoryConnector::from_config(InMemoryClusterConfig {
            nodes: vec![
                Node::new("a", "es-a", "10.0.0.1", 9200),
                Node::new("b", "es-b", "10.0.0.2", 9200),
            ],
            indices: vec![InMemoryIndexConfig {
                name: "logs".to_string(),
                shards: 2,
                replicas: 0,
                properties: Some(json!({"n": {"type": "long"}, "msg": {"type": "text"}})),
                documents: (0..6).map(|i| json!({"n": i.to_string(), "msg": "hi"})).collect(),
            }],
            ..InMemoryClusterConfig::default()
        })
    }

    fn reading() -> Settings {
        Settings {
            resource_read: Some("logs".to_string()),
            scroll_fields: vec!["n".to_string()],
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_a_shipped_definition_reads_without_asking_for_metadata() -> Result<()> {
        let connector = connector();
        let definitions = find_partitions(&reading(), &connector).await?;
        let calls_after_planning = connector.cluster().stats().metadata_calls;

        let shipped = serde_json::to_string(&definitions[1])?;
        let landed: PartitionDefinition = serde_json::from_str(&shipped)?;
        let settings = landed.settings()?;
        let mut direct = create_reader(&definitions[1].settings()?, &definitions[1], &connector).await?;
        let mut reader = create_reader(&settings, &landed, &connector).await?;

        assert_eq!(reader.mapping(), direct.mapping());
        assert_eq!(reader.definition().serialized_settings, definitions[1].serialized_settings);
        assert_eq!(reader.pin(), &NodeAddress::new("10.0.0.2", 9200));
        assert_eq!(reader.query().preference().as_deref(), Some("_shards:1|_only_node:b"));
        assert!(!reader.is_stream_open(), "construction must not open a cursor");
        assert_eq!(connector.cluster().stats().open_scrolls, 0);

        let mut values = Vec::new();
        let scroll = reader.scroll_query().await?;
        while let Some(record) = scroll.next().await? {
            values.push(record.source);
        }
        // -- 🔢 the mapping turned "1" into 1, and the projection dropped msg
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 3}), json!({"n": 5})]);
        assert_eq!(connector.cluster().stats().metadata_calls, calls_after_planning);

        reader.close().await?;
        direct.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_close_is_once_no_matter_how_often_you_call_it() -> Result<()> {
        let connector = connector();
        let definitions = find_partitions(&reading(), &connector).await?;
        let settings = definitions[0].settings()?;

        // -- 💤 never opened: only the client goes away
        let mut idle = create_reader(&settings, &definitions[0], &connector).await?;
        assert!(!idle.is_closed() && !idle.is_stream_open());
        idle.close().await?;
        idle.close().await?;
        assert!(idle.is_closed());
        assert_eq!(connector.cluster().stats().scrolls_opened, 0);

        let mut busy = create_reader(&settings, &definitions[0], &connector).await?;
        busy.scroll_query().await?;
        busy.scroll_query().await?;
        assert_eq!(connector.cluster().stats().scrolls_opened, 1, "the cursor is cached");
        assert!(busy.is_stream_open());
        busy.close().await?;
        busy.close().await?;
        assert!(busy.is_closed() && !busy.is_stream_open());
        let stats = connector.cluster().stats();
        assert_eq!((stats.open_scrolls, stats.open_clients), (0, 0));

        let err = busy.scroll_query().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PartitionError>(), Some(PartitionError::ReaderClosed)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_global_pin_beats_the_partition_node() -> Result<()> {
        let connector = connector();
        let definitions = find_partitions(&reading(), &connector).await?;
        let pinned = Settings {
            pinned_node: Some(NodeAddress::new("10.9.9.9", 9200)),
            ..definitions[0].settings()?
        };
        let mut reader = create_reader(&pinned, &definitions[0], &connector).await?;
        assert_eq!(reader.pin(), &NodeAddress::new("10.9.9.9", 9200));
        reader.close().await?;

        let bad = Settings {
            value_reader: "xml".to_string(),
            ..pinned
        };
        assert!(create_reader(&bad, &definitions[0], &connector).await.is_err());
        assert_eq!(connector.cluster().stats().open_clients, 0, "no client for a reader that never was");
        Ok(())
    }
}
