//! 🧩 shardplan: partition planning and shard-aware reads/writes for a clustered document store.
//!
//! 🎬 *[narrator voice]* "Plan once. Ship the cards. Let every task read its own shards."
//!
//! 🧠 Knowledge graph:
//! - `partition`: the core. Planner, assigner, reader, multi-reader, writer.
//! - `backends`: who we talk to (REST cluster, or the in-memory stand-in).
//! - `settings` / `snapshot`: the frozen context every partition definition carries.
//! - `mapping` / `readers` / `query` / `resource`: what a shard's documents look like,
//!   how to ask for them, and where writes go.
//! - `supervisors` / `progress` / `app_config`: the fan-out and the ambient bits the CLI uses.

use std::io::Write;

use anyhow::{Context, Result};

pub mod app_config;
pub mod backends;
pub mod cluster;
pub mod common;
pub mod error;
pub mod mapping;
pub mod partition;
pub mod progress;
pub mod query;
pub mod readers;
pub mod resource;
pub mod settings;
pub mod snapshot;
pub mod supervisors;

pub use app_config::{AppConfig, load_config};
pub use error::PartitionError;
pub use settings::Settings;
pub use supervisors::{ReadSummary, Supervisor};

/// 🚀 Read the whole configured target and stream it as NDJSON into `out`.
pub async fn run<W>(app_config: AppConfig, out: &mut W, show_progress: bool) -> Result<ReadSummary>
where
    W: Write,
{
    let metadata_field = app_config.settings.read_metadata_field.clone();
    let supervisor = Supervisor::new(app_config)?.with_progress(show_progress);
    let summary = supervisor
        .read_all(|record| {
            writeln!(out, "{}", record.to_json_line(&metadata_field))
                .context("💀 Failed to write a record to the output")
        })
        .await?;
    out.flush().context("💀 Failed to flush the output")?;
    Ok(summary)
}
