//! 🔌 Backends: where the cluster actually gets talked to.
//!
//! 🎭 The partition core never opens a socket by itself. It asks a `ClusterConnector` for a
//! `ClusterClient`, asks the client for a `ScrollStream`, and closes all of them when it's done.
//! What's on the other end is this module's problem:
//!
//! - `elasticsearch`: a real REST cluster, via reqwest.
//! - `in_mem`: a simulated cluster in a `Mutex`, for tests and dry runs. It counts every
//!   client and stream it hands out, so "at most one open at a time" is a number, not a promise.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls → enum dispatcher (`ConnectorBackend`, `ClientBackend`,
//!   `ScrollBackend`). Same casting agency as always. No vtables were harmed.
//! - Pinning is an ARGUMENT to `connect`, never a settings mutation.
//! - Nothing here retries. Retry policy, if anyone ever wants one, lives under the REST client.
//!
//! 🦆 The duck is pinned to node 0. It has never left.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::cluster::{Node, NodeAddress, Shard};
use crate::common::Record;
use crate::mapping::Field;
use crate::query::QueryBuilder;
use crate::readers::ScrollReader;
use crate::settings::Settings;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchConnector, ElasticsearchScroll};
pub use in_mem::{
    InMemoryClient, InMemoryCluster, InMemoryClusterConfig, InMemoryConnector, InMemoryScroll,
};

/// 🏭 Hands out clients, and knows how to look around the cluster first.
#[async_trait]
pub trait ClusterConnector: std::fmt::Debug + Send + Sync {
    /// 🔭 Node + version discovery. Returns an enriched copy; the input is never touched.
    async fn discover(&self, settings: &Settings) -> Result<Settings>;

    /// 🔌 A fresh client. `pin` forces all of its traffic to one node.
    async fn connect(&self, settings: &Settings, pin: Option<&NodeAddress>) -> Result<ClientBackend>;
}

/// 📡 The metadata + data contract the partition core depends on.
#[async_trait]
pub trait ClusterClient: std::fmt::Debug + Send {
    async fn index_exists(&mut self) -> Result<bool>;
    /// 📖 One readable copy per shard (a replica is fine) → the node hosting it.
    /// Read/metadata calls target the read resource; touch, health and primaries the write one.
    async fn read_target_shards(&mut self) -> Result<BTreeMap<Shard, Node>>;
    /// ✍️ Primary shards only → their node.
    async fn write_target_primary_shards(&mut self) -> Result<BTreeMap<Shard, Node>>;
    async fn mapping(&mut self) -> Result<Field>;
    /// 🏗️ Create the write target if needed. `true` when WE created it.
    async fn touch(&mut self) -> Result<bool>;
    /// ⏳ Wait for yellow. `true` when the wait TIMED OUT.
    async fn wait_for_yellow(&mut self) -> Result<bool>;
    /// 📜 Open a scroll cursor. This is the side-effect-bearing one.
    async fn open_scroll(&mut self, query: &QueryBuilder, reader: ScrollReader) -> Result<ScrollBackend>;
    /// 📨 POST an NDJSON `_bulk` payload.
    async fn bulk(&mut self, payload: String) -> Result<()>;
    /// 🗑️ Release the connection. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// 🚰 A pull-based stream of records from one open scroll cursor.
#[async_trait]
pub trait ScrollStream: std::fmt::Debug + Send {
    async fn has_next(&mut self) -> Result<bool>;
    /// 🎯 The next record, `None` once the cursor is dry.
    async fn next(&mut self) -> Result<Option<Record>>;
    /// 🗑️ Release the cursor. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a connector.
#[derive(Debug, Clone)]
pub enum ConnectorBackend {
    Elasticsearch(ElasticsearchConnector),
    InMemory(InMemoryConnector),
}

#[async_trait]
impl ClusterConnector for ConnectorBackend {
    async fn discover(&self, settings: &Settings) -> Result<Settings> {
        match self {
            ConnectorBackend::Elasticsearch(c) => c.discover(settings).await,
            ConnectorBackend::InMemory(c) => c.discover(settings).await,
        }
    }

    async fn connect(&self, settings: &Settings, pin: Option<&NodeAddress>) -> Result<ClientBackend> {
        match self {
            ConnectorBackend::Elasticsearch(c) => c.connect(settings, pin).await,
            ConnectorBackend::InMemory(c) => c.connect(settings, pin).await,
        }
    }
}

/// 🎭 The many faces of a client.
#[derive(Debug)]
pub enum ClientBackend {
    Elasticsearch(ElasticsearchClient),
    InMemory(InMemoryClient),
}

#[async_trait]
impl ClusterClient for ClientBackend {
    async fn index_exists(&mut self) -> Result<bool> {
        match self {
            ClientBackend::Elasticsearch(c) => c.index_exists().await,
            ClientBackend::InMemory(c) => c.index_exists().await,
        }
    }

    async fn read_target_shards(&mut self) -> Result<BTreeMap<Shard, Node>> {
        match self {
            ClientBackend::Elasticsearch(c) => c.read_target_shards().await,
            ClientBackend::InMemory(c) => c.read_target_shards().await,
        }
    }

    async fn write_target_primary_shards(&mut self) -> Result<BTreeMap<Shard, Node>> {
        match self {
            ClientBackend::Elasticsearch(c) => c.write_target_primary_shards().await,
            ClientBackend::InMemory(c) => c.write_target_primary_shards().await,
        }
    }

    async fn mapping(&mut self) -> Result<Field> {
        match self {
            ClientBackend::Elasticsearch(c) => c.mapping().await,
            ClientBackend::InMemory(c) => c.mapping().await,
        }
    }

    async fn touch(&mut self) -> Result<bool> {
        match self {
            ClientBackend::Elasticsearch(c) => c.touch().await,
            ClientBackend::InMemory(c) => c.touch().await,
        }
    }

    async fn wait_for_yellow(&mut self) -> Result<bool> {
        match self {
            ClientBackend::Elasticsearch(c) => c.wait_for_yellow().await,
            ClientBackend::InMemory(c) => c.wait_for_yellow().await,
        }
    }

    async fn open_scroll(&mut self, query: &QueryBuilder, reader: ScrollReader) -> Result<ScrollBackend> {
        match self {
            ClientBackend::Elasticsearch(c) => c.open_scroll(query, reader).await,
            ClientBackend::InMemory(c) => c.open_scroll(query, reader).await,
        }
    }

    async fn bulk(&mut self, payload: String) -> Result<()> {
        match self {
            ClientBackend::Elasticsearch(c) => c.bulk(payload).await,
            ClientBackend::InMemory(c) => c.bulk(payload).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            ClientBackend::Elasticsearch(c) => c.close().await,
            ClientBackend::InMemory(c) => c.close().await,
        }
    }
}

/// 🎭 The many faces of a scroll.
#[derive(Debug)]
pub enum ScrollBackend {
    Elasticsearch(ElasticsearchScroll),
    InMemory(InMemoryScroll),
}

#[async_trait]
impl ScrollStream for ScrollBackend {
    async fn has_next(&mut self) -> Result<bool> {
        match self {
            ScrollBackend::Elasticsearch(s) => s.has_next().await,
            ScrollBackend::InMemory(s) => s.has_next().await,
        }
    }

    async fn next(&mut self) -> Result<Option<Record>> {
        match self {
            ScrollBackend::Elasticsearch(s) => s.next().await,
            ScrollBackend::InMemory(s) => s.next().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            ScrollBackend::Elasticsearch(s) => s.close().await,
            ScrollBackend::InMemory(s) => s.close().await,
        }
    }
}
