//! 🎬 *[a task gets its slice of shards. it opens the first. the channel fills.]*
//! *[somewhere downstream, a supervisor counts. the task does not care. it only reads.]*
//!
//! 📖 The ReadWorker owns one multi-reader over its assigned definitions and pushes every
//! record into the shared channel. If the consumer hangs up, the worker stops reading and
//! closes what it has open.

use anyhow::Result;
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ReadEvent, Worker};
use crate::backends::ConnectorBackend;
use crate::partition::{MultiReaderIterator, PartitionDefinition, keep_first_error, multi_reader};
use crate::settings::Settings;

#[derive(Debug)]
pub(in crate::supervisors) struct ReadWorker {
    task: usize,
    settings: Settings,
    definitions: Vec<PartitionDefinition>,
    connector: ConnectorBackend,
    tx: Sender<ReadEvent>,
}

impl ReadWorker {
    pub(in crate::supervisors) fn new(
        task: usize,
        settings: Settings,
        definitions: Vec<PartitionDefinition>,
        connector: ConnectorBackend,
        tx: Sender<ReadEvent>,
    ) -> Self {
        Self {
            task,
            settings,
            definitions,
            connector,
            tx,
        }
    }
}

impl Worker for ReadWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let partitions = self.definitions.len();
            debug!("📖 ReadWorker {} starting on {} partition(s)", self.task, partitions);
            let mut iterator = multi_reader(&self.settings, self.definitions, self.connector);
            let outcome = pump(self.task, &mut iterator, &self.tx).await;
            let closed = iterator.close().await;
            let delivered_all = keep_first_error(outcome, closed, "Read worker")?;
            if delivered_all {
                // -- 📭 a closed channel here just means nobody is listening for the wrap-up
                let _ = self.tx.send(ReadEvent::Finished { task: self.task, partitions }).await;
            }
            debug!("🏁 ReadWorker {} done", self.task);
            Ok(())
        })
    }
}

/// 🚰 Drain the iterator into the channel. `false` when the consumer went away first.
async fn pump(
    task: usize,
    iterator: &mut MultiReaderIterator<ConnectorBackend>,
    tx: &Sender<ReadEvent>,
) -> Result<bool> {
    while let Some(record) = iterator.next().await? {
        if tx.send(ReadEvent::Record(record)).await.is_err() {
            debug!("📪 ReadWorker {}: channel closed, stopping early", task);
            return Ok(false);
        }
    }
    Ok(true)
}
