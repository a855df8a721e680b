//! 🔗 The multi-reader: many shards, one stream, one open cursor at a time.
//!
//! 🎬 *[a task owns 200 shards. it opens one. it drains it. it closes it. it opens the next.]*
//! *[at no point does anyone hold 200 scroll contexts open. the cluster sends a thank-you card.]*
//!
//! 🧠 Knowledge graph:
//! - POLICY lives in [`step`]: a pure `(state, observation) -> (state, effect)` function.
//!   No I/O, no async, tested as a table.
//! - MECHANISM lives in [`MultiReaderIterator`]: it asks the question the state needs
//!   ("any definitions left?" / "does the stream have more?"), feeds the answer to `step`,
//!   and performs the effect (open the next reader, close the current one, yield, halt).
//! - `AllExhausted` is sticky. `close()` releases exactly what is open and makes it sticky too.

use anyhow::Result;
use tracing::{debug, trace};

use crate::backends::{ClusterConnector, ScrollStream};
use crate::common::Record;
use crate::error::PartitionError;
use crate::partition::{PartitionDefinition, PartitionReader, create_reader};
use crate::settings::Settings;

/// 🚦 Where the iterator is in its walk over the definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    /// 🚰 A reader is open and its stream has (or may have) records.
    Streaming,
    /// 🏁 The current stream ran dry and its reader was closed.
    StreamExhausted,
    /// 🪦 Nothing left. Terminal.
    AllExhausted,
}

/// 👀 What the driver saw when it looked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    DefinitionsRemaining(bool),
    StreamHasMore(bool),
}

/// 🎬 What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// 📖 Open a reader for the next definition.
    OpenNext,
    /// 🎯 The current stream has a record ready.
    Yield,
    /// 🗑️ Close the current stream and reader.
    CloseCurrent,
    /// 🛑 Report "no more records".
    Halt,
    /// 🔁 The observation didn't answer this state's question; look again.
    Observe,
}

/// 🧠 The whole policy, no I/O attached.
pub fn step(state: ReaderState, observation: Observation) -> (ReaderState, Effect) {
    use Effect::*;
    use Observation::*;
    use ReaderState::*;
    match (state, observation) {
        (AllExhausted, _) => (AllExhausted, Halt),
        (NotStarted | StreamExhausted, DefinitionsRemaining(true)) => (Streaming, OpenNext),
        (NotStarted | StreamExhausted, DefinitionsRemaining(false)) => (AllExhausted, Halt),
        (Streaming, StreamHasMore(true)) => (Streaming, Yield),
        (Streaming, StreamHasMore(false)) => (StreamExhausted, CloseCurrent),
        (state, _) => (state, Observe),
    }
}

/// 🔗 Sequential iterator over the records of several partitions.
#[derive(Debug)]
pub struct MultiReaderIterator<C> {
    settings: Settings,
    definitions: Vec<PartitionDefinition>,
    cursor: usize,
    connector: C,
    current: Option<PartitionReader>,
    state: ReaderState,
}

/// 🏗️ Nothing is opened until the first `has_next` / `next`.
pub fn multi_reader<C>(
    settings: &Settings,
    definitions: Vec<PartitionDefinition>,
    connector: C,
) -> MultiReaderIterator<C>
where
    C: ClusterConnector,
{
    MultiReaderIterator {
        settings: settings.clone(),
        definitions,
        cursor: 0,
        connector,
        current: None,
        state: ReaderState::NotStarted,
    }
}

impl<C> MultiReaderIterator<C>
where
    C: ClusterConnector,
{
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// 📊 Definitions not yet opened.
    pub fn remaining(&self) -> usize {
        self.definitions.len().saturating_sub(self.cursor)
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        self.advance().await
    }

    /// 🎯 The next record across all partitions, `None` once every one is drained.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if !self.advance().await? {
            return Ok(None);
        }
        match self.current.as_mut() {
            Some(reader) => reader.scroll_query().await?.next().await,
            None => Ok(None),
        }
    }

    /// 🙅 Read-only traversal.
    pub fn remove(&mut self) -> Result<()> {
        Err(PartitionError::Unsupported { operation: "remove" }.into())
    }

    /// 🗑️ Force-close whatever is open and stop for good. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        self.state = ReaderState::AllExhausted;
        match self.current.take() {
            Some(mut reader) => {
                debug!("🗑️ Multi-reader closing {} early", reader.definition());
                reader.close().await
            }
            None => Ok(()),
        }
    }

    async fn advance(&mut self) -> Result<bool> {
        loop {
            let observation = match self.state {
                ReaderState::AllExhausted => return Ok(false),
                ReaderState::NotStarted | ReaderState::StreamExhausted => {
                    Observation::DefinitionsRemaining(self.cursor < self.definitions.len())
                }
                ReaderState::Streaming => match self.current.as_mut() {
                    Some(reader) => Observation::StreamHasMore(reader.scroll_query().await?.has_next().await?),
                    None => Observation::StreamHasMore(false),
                },
            };
            let (next, effect) = step(self.state, observation);
            trace!("🚦 {:?} + {:?} -> {:?} / {:?}", self.state, observation, next, effect);
            self.state = next;
            match effect {
                Effect::OpenNext => self.open_next().await?,
                Effect::CloseCurrent => {
                    if let Some(mut reader) = self.current.take() {
                        reader.close().await?;
                    }
                }
                Effect::Yield => return Ok(true),
                Effect::Halt => return Ok(false),
                Effect::Observe => continue,
            }
        }
    }

    async fn open_next(&mut self) -> Result<()> {
        let Some(definition) = self.definitions.get(self.cursor) else {
            self.state = ReaderState::AllExhausted;
            return Ok(());
        };
        self.cursor += 1;
        match create_reader(&self.settings, definition, &self.connector).await {
            Ok(reader) => {
                self.current = Some(reader);
                Ok(())
            }
            Err(err) => {
                // -- ⏭️ the failed definition is spent; a caller who keeps going gets the next one
                self.state = ReaderState::StreamExhausted;
                Err(err)
            }
        }
    }
}
