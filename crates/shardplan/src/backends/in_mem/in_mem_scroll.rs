//! 🚰 InMemoryScroll: a scroll cursor whose pages were all fetched the moment it opened.
//!
//! It still pretends to be a cursor: it holds an open-stream slot on the cluster until
//! `close()`, so the "one stream at a time" bound is observable.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::InMemoryCluster;
use crate::backends::ScrollStream;
use crate::common::Record;

#[derive(Debug)]
pub struct InMemoryScroll {
    cluster: Arc<InMemoryCluster>,
    buffer: VecDeque<Record>,
    closed: bool,
}

impl InMemoryScroll {
    pub(crate) fn open(cluster: Arc<InMemoryCluster>, records: Vec<Record>) -> Self {
        {
            let mut state = cluster.lock();
            let stats = &mut state.stats;
            stats.scrolls_opened += 1;
            stats.open_scrolls += 1;
            stats.peak_open_scrolls = stats.peak_open_scrolls.max(stats.open_scrolls);
        }
        Self {
            cluster,
            buffer: records.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl ScrollStream for InMemoryScroll {
    async fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && !self.buffer.is_empty())
    }

    async fn next(&mut self) -> Result<Option<Record>> {
        if self.closed {
            anyhow::bail!("💀 Pulled from an in-memory scroll after close");
        }
        Ok(self.buffer.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        let mut state = self.cluster.lock();
        state.stats.open_scrolls = state.stats.open_scrolls.saturating_sub(1);
        Ok(())
    }
}
