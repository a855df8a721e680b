//! 🗺️ The planner: asks the cluster once, writes down the answer forever.
//!
//! Runs on the coordinator before any task starts. Discovery first, then a settings snapshot,
//! then one client that checks the read target, lists its shards, fetches the mapping (only when
//! there is something to map) and is closed on every path out, the error paths included.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{info, trace};

use crate::backends::{ClusterClient, ClusterConnector};
use crate::cluster::{Node, Shard};
use crate::error::PartitionError;
use crate::mapping::validate_mapping;
use crate::partition::{PartitionDefinition, keep_first_error};
use crate::settings::{READ_MISSING_AS_EMPTY_KEY, Settings};

/// 📋 Discover the read target's layout and emit one definition per (shard, node), in shard order.
pub async fn find_partitions<C>(settings: &Settings, connector: &C) -> Result<Vec<PartitionDefinition>>
where
    C: ClusterConnector + ?Sized,
{
    let settings = connector.discover(settings).await?;
    let saved_settings = settings.save()?;

    let mut client = connector.connect(&settings, settings.pinned_node.as_ref()).await?;
    let planned = survey(&mut client, &settings).await;
    let closed = client.close().await;
    let (shards, saved_mapping) = keep_first_error(planned, closed, "Planning client")?;

    Ok(shards
        .iter()
        .map(|(shard, node)| {
            PartitionDefinition::new(shard, node, saved_settings.clone(), saved_mapping.clone())
        })
        .collect())
}

async fn survey<T>(
    client: &mut T,
    settings: &Settings,
) -> Result<(BTreeMap<Shard, Node>, Option<String>)>
where
    T: ClusterClient + ?Sized,
{
    let resource = settings.resource_for_read()?;

    let shards = if client.index_exists().await? {
        let shards = client.read_target_shards().await?;
        trace!("🧩 Creating partitions for shards {:?}", shards.keys().collect::<Vec<_>>());
        shards
    } else if settings.read_missing_as_empty {
        info!("📭 Index [{}] missing - treating it as empty", resource);
        BTreeMap::new()
    } else {
        return Err(PartitionError::MissingIndex {
            resource: resource.to_string(),
            setting: READ_MISSING_AS_EMPTY_KEY,
        }
        .into());
    };

    info!("📖 Reading from [{}]", resource);

    let saved_mapping = if shards.is_empty() {
        None
    } else {
        let mapping = client.mapping().await?;
        info!("🗂️ Discovered mapping {{{}}} for [{}]", mapping, resource);
        validate_mapping(
            &settings.scroll_fields,
            &mapping,
            settings.field_presence_validation,
            resource,
        )?;
        Some(mapping.encode()?)
    };

    Ok((shards, saved_mapping))
}
