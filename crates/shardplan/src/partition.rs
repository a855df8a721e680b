//! 🧩 Partitions: the unit of distributable work, and everything that plans, slices and consumes it.
//!
//! 🎬 COLD OPEN - INT. COORDINATOR - ONCE, AND ONLY ONCE
//!
//! The planner asks the cluster where the shards live. It writes each answer on an index card,
//! staples a frozen copy of the settings and the mapping to it, and hands out the stack.
//! The cards travel. Some of them cross an ocean. None of them ever call home for metadata.
//!
//! 🧠 Knowledge graph:
//! - `PartitionDefinition`: one (shard, node) pair + opaque settings/mapping snapshots. No sockets.
//! - `planner::find_partitions`: runs once on the coordinator, emits definitions in shard order.
//! - `assigner::assign_partitions`: pure contiguous slicing across `total` tasks.
//! - `reader::create_reader`: a definition → a lazily-opened `PartitionReader`.
//! - `multi_reader::multi_reader`: many definitions → one sequential stream, one cursor open at a time.
//! - `writer::create_writer`: write-target selection + a pinned `PartitionWriter`.
//!
//! 🦆 The duck got assigned zero partitions. It is task 6 of 7. It has opinions about modulo.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::{Node, NodeAddress, Shard};
use crate::mapping::Field;
use crate::settings::Settings;

pub mod assigner;
pub mod multi_reader;
pub mod planner;
pub mod reader;
pub mod writer;

pub use assigner::assign_partitions;
pub use multi_reader::{MultiReaderIterator, multi_reader};
pub use planner::find_partitions;
pub use reader::{PartitionReader, create_reader};
pub use writer::{PartitionWriter, create_writer};

/// 📇 One shard, the node hosting it, and the frozen context needed to read it anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDefinition {
    pub node_ip: String,
    pub node_port: u16,
    pub node_name: String,
    pub node_id: String,
    /// 📡 The concrete index the shard belongs to. Keeps shard 0 of `logs-1` apart from
    /// shard 0 of `logs-2` when the read target is a pattern.
    #[serde(default)]
    pub index: String,
    pub shard_id: u32,
    pub serialized_settings: String,
    /// 🗂️ Absent when the read target had no shards to map.
    pub serialized_mapping: Option<String>,
}

impl PartitionDefinition {
    pub fn new(
        shard: &Shard,
        node: &Node,
        serialized_settings: impl Into<String>,
        serialized_mapping: Option<String>,
    ) -> Self {
        Self {
            node_ip: node.ip.clone(),
            node_port: node.http_port,
            node_name: node.name.clone(),
            node_id: node.id.clone(),
            index: shard.index.clone(),
            shard_id: shard.id,
            serialized_settings: serialized_settings.into(),
            serialized_mapping,
        }
    }

    /// 📬 The settings snapshot taken at planning time.
    pub fn settings(&self) -> Result<Settings> {
        Settings::load(&self.serialized_settings)
            .with_context(|| format!("💀 {self} carries a settings snapshot we can't read"))
    }

    /// 📬 The mapping snapshot, when there is one.
    pub fn mapping(&self) -> Result<Option<Field>> {
        match self.serialized_mapping.as_deref() {
            Some(encoded) if !encoded.trim().is_empty() => Field::decode(encoded)
                .map(Some)
                .with_context(|| format!("💀 {self} carries a mapping snapshot we can't read")),
            _ => Ok(None),
        }
    }

    /// 📌 Where a reader of this partition should send its traffic.
    pub fn node_address(&self) -> NodeAddress {
        NodeAddress::new(self.node_ip.clone(), self.node_port)
    }
}

/// 🧹 Combine an outcome with the close that followed it. The outcome's error wins; a close
/// failure after a failure is only logged.
pub(crate) fn keep_first_error<T>(outcome: Result<T>, closed: Result<()>, what: &str) -> Result<T> {
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!("⚠️ {} also failed to close: {:#}", what, close_err);
            Err(err)
        }
    }
}

impl fmt::Display for PartitionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EsPartition [node=[{}/{}|{}:{}],shard={}]",
            self.node_id, self.node_name, self.node_ip, self.node_port, self.shard_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_definition_survives_the_trip_across_the_ocean() -> Result<()> {
        let settings = Settings {
            resource_read: Some("logs".to_string()),
            ..Settings::default()
        };
        let mapping = Field::object("logs", vec![Field::new("msg", "text")]);
        let definition = PartitionDefinition::new(
            &Shard::new("logs", 3, true),
            &Node::new("abc", "es-1", "10.0.0.1", 9201),
            settings.save()?,
            Some(mapping.encode()?),
        );
        assert_eq!(definition.to_string(), "EsPartition [node=[abc/es-1|10.0.0.1:9201],shard=3]");

        let shipped = serde_json::to_string(&definition)?;
        let landed: PartitionDefinition = serde_json::from_str(&shipped)?;
        assert_eq!(landed, definition);
        assert_eq!(landed.settings()?, settings);
        assert_eq!(landed.mapping()?, Some(mapping));
        assert_eq!(landed.node_address(), NodeAddress::new("10.0.0.1", 9201));
        Ok(())
    }

    #[test]
    fn the_one_where_no_mapping_is_not_a_crime() -> Result<()> {
        let mut definition = PartitionDefinition::new(
            &Shard::new("empty", 0, true),
            &Node::new("n", "n", "127.0.0.1", 9200),
            Settings::default().save()?,
            None,
        );
        assert_eq!(definition.mapping()?, None);
        definition.serialized_mapping = Some("not-a-snapshot".to_string());
        assert!(definition.mapping().is_err());
        Ok(())
    }
}
