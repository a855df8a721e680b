//! 🎬 *[camera pans across a dimly lit coordinator]*
//! 🎬 "In a world where shards outnumber tasks..."
//! 🎬 "One supervisor dared to plan them only once."
//!
//! 📦 The Supervisor plans, slices, spawns, and counts.
//!
//! 🧠 Knowledge graph:
//! - `plan()`: runs `find_partitions` exactly once.
//! - `read_all()`: plan, then `read_definitions()`. For each task `0..total_tasks` take its
//!   `assign_partitions` slice and spawn a `ReadWorker` with its own multi-reader. Records
//!   come back over one bounded `async-channel`. The tasks share the definitions and nothing else.
//! - `write_target()`: where writer task N would pin, without writing anything.
//!
//! ⚠️ Workers stay private. Like Fight Club, but for async tasks.

mod workers;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::backends::ConnectorBackend;
use crate::cluster::NodeAddress;
use crate::common::Record;
use crate::partition::{PartitionDefinition, assign_partitions, create_writer, find_partitions};
use crate::progress::ReadProgress;
use crate::settings::Settings;
use workers::{ReadEvent, ReadWorker, Worker};

/// 🧾 What a finished read amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    pub partitions: usize,
    pub tasks: usize,
    pub records: u64,
}

#[derive(Debug)]
pub struct Supervisor {
    app_config: AppConfig,
    connector: ConnectorBackend,
    show_progress: bool,
}

impl Supervisor {
    /// 🚀 Build the connector the config asks for.
    pub fn new(app_config: AppConfig) -> Result<Self> {
        let connector = app_config
            .backend
            .connector()
            .context("💀 Supervisor could not build its cluster connector")?;
        Ok(Self::with_connector(app_config, connector))
    }

    pub fn with_connector(app_config: AppConfig, connector: ConnectorBackend) -> Self {
        Self {
            app_config,
            connector,
            show_progress: false,
        }
    }

    /// 📊 Draw a spinner while reading.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn connector(&self) -> &ConnectorBackend {
        &self.connector
    }

    pub fn total_tasks(&self) -> usize {
        self.app_config.runtime.total_tasks
    }

    /// 🗺️ One planning pass over the read target.
    pub async fn plan(&self) -> Result<Vec<PartitionDefinition>> {
        find_partitions(&self.app_config.settings, &self.connector).await
    }

    /// 🔪 Every task's slice, in task order.
    pub fn assignments<'a>(
        &self,
        definitions: &'a [PartitionDefinition],
    ) -> Result<Vec<&'a [PartitionDefinition]>> {
        let total = self.total_tasks();
        (0..total.max(1))
            .map(|task| assign_partitions(definitions, task, total))
            .collect()
    }

    /// 🧵 Plan once, fan out one worker per task, hand every record to `on_record`.
    ///
    /// If `on_record` fails, the channel is closed, every worker stops and closes what it
    /// has open, and the callback's error is returned.
    pub async fn read_all<F>(&self, on_record: F) -> Result<ReadSummary>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        let definitions = self.plan().await?;
        self.read_definitions(&definitions, on_record).await
    }

    /// 📖 The fan-out half of `read_all`, over definitions planned earlier (or elsewhere).
    ///
    /// A worker that fails closes its own reader and reports the error here once every other
    /// worker has finished its slice.
    pub async fn read_definitions<F>(
        &self,
        definitions: &[PartitionDefinition],
        mut on_record: F,
    ) -> Result<ReadSummary>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        let assignments: Vec<Vec<PartitionDefinition>> = self
            .assignments(definitions)?
            .into_iter()
            .map(<[PartitionDefinition]>::to_vec)
            .collect();
        let settings = read_settings(&self.app_config.settings, definitions)?;
        info!(
            "🧵 Reading {} partition(s) with {} task(s)",
            definitions.len(),
            assignments.len()
        );

        let (tx, rx) = async_channel::bounded(self.app_config.runtime.queue_capacity.max(1));
        let mut handles = Vec::with_capacity(assignments.len());
        for (task, slice) in assignments.into_iter().enumerate() {
            if slice.is_empty() {
                debug!("💤 Task {} has nothing to read", task);
                continue;
            }
            let worker = ReadWorker::new(task, settings.clone(), slice, self.connector.clone(), tx.clone());
            handles.push(worker.start());
        }
        // -- 🔚 the channel closes once the last worker drops its sender
        drop(tx);

        let label = settings.resource_for_read().unwrap_or("?").to_string();
        let mut progress = if self.show_progress {
            ReadProgress::new(label, definitions.len())
        } else {
            ReadProgress::hidden(label, definitions.len())
        };
        let mut consumed = Ok(());
        while let Ok(event) = rx.recv().await {
            match event {
                ReadEvent::Record(record) => {
                    progress.update(record.approximate_bytes() as u64, 1);
                    if let Err(err) = on_record(&record) {
                        consumed = Err(err);
                        rx.close();
                        break;
                    }
                }
                ReadEvent::Finished { task, partitions } => {
                    debug!("🏁 Task {} finished {} partition(s)", task, partitions);
                    progress.partitions_finished(partitions);
                }
            }
        }
        progress.finish();

        let joined = futures::future::try_join_all(handles)
            .await
            .context("💀 A read worker panicked")?;
        consumed?;
        for outcome in joined {
            outcome?;
        }
        Ok(ReadSummary {
            partitions: definitions.len(),
            tasks: self.total_tasks(),
            records: progress.total_docs(),
        })
    }

    /// 🎯 The node writer task `task` would be pinned to. The writer is closed again right away.
    pub async fn write_target<R>(&self, task: i64, rng: &mut R) -> Result<NodeAddress>
    where
        R: Rng + ?Sized,
    {
        let mut writer =
            create_writer(&self.app_config.settings, &self.connector, task, self.total_tasks(), rng).await?;
        let pin = writer.pin().clone();
        writer.close().await?;
        Ok(pin)
    }
}

/// 📬 The settings frozen at planning time carry discovery results; prefer them.
fn read_settings(configured: &Settings, definitions: &[PartitionDefinition]) -> Result<Settings> {
    Ok(definitions
        .first()
        .map(PartitionDefinition::settings)
        .transpose()?
        .unwrap_or_else(|| configured.clone()))
}
