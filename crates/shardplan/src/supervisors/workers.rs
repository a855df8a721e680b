//! 🧵 Workers: the ones who actually read while the Supervisor takes the credit in the retro.
//!
//! ⚠️ Private to `supervisors`. Workers are spawned, fed, and joined there and nowhere else.

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::common::Record;

mod read_worker;
pub(super) use read_worker::ReadWorker;

/// 🏗️ A background worker, that does work. duh.
pub(super) trait Worker {
    /// 🚀 Spawn onto the runtime. The handle reports how the work ended.
    fn start(self) -> JoinHandle<Result<()>>;
}

/// ✉️ What a read worker tells the supervisor.
#[derive(Debug)]
pub(super) enum ReadEvent {
    Record(Record),
    /// 🏁 The task walked every partition it was given.
    Finished { task: usize, partitions: usize },
}
