//! ⚙️ Settings: the immutable snapshot every task reads from and nobody writes to.
//!
//! 🎬 *[INT. COORDINATOR - PLANNING TIME]*
//! *The settings are frozen. Saved to a string. Copied into every partition definition.*
//! *Somewhere, a task in another process loads them back. They are exactly the same.*
//! *This is the only happy ending in distributed systems.*
//!
//! 🧠 Knowledge graph:
//! - `save()` / `Settings::load()` round-trip through `snapshot.rs` (versioned, opaque).
//! - Pinning is NOT a settings mutation. Client-constructing calls take an explicit
//!   `Option<&NodeAddress>`. `pinned_node` is only the caller-level "I already picked a node".
//! - Discovery returns a new `Settings` with `discovered_nodes` / `cluster_version` filled in.
//!   The old one is left alone, like a good houseguest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::NodeAddress;
use crate::snapshot;

/// 🔑 Config key named in the missing-index error, so people know what to flip.
pub const READ_MISSING_AS_EMPTY_KEY: &str = "read_missing_as_empty";

const SETTINGS_KIND: &str = "settings";

/// 🔍 How hard to insist that configured scroll fields exist in the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPresenceValidation {
    /// 🙈 Don't look.
    #[default]
    Ignore,
    /// ⚠️ Look, complain in the logs, carry on.
    #[serde(alias = "warn")]
    Warning,
    /// 💀 Look, and refuse to plan if anything is missing.
    Strict,
}

impl FieldPresenceValidation {
    pub fn is_required(self) -> bool {
        !matches!(self, FieldPresenceValidation::Ignore)
    }
}

/// 📦 The connector settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// 📡 Declared `host:port` nodes. The seed list.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeAddress>,
    /// 🔭 Nodes found by discovery. Filled in by the connector, never by hand.
    #[serde(default)]
    pub discovered_nodes: Vec<NodeAddress>,
    /// 🔭 Whether discovery should run before planning / writing.
    #[serde(default = "default_true")]
    pub nodes_discovery: bool,
    /// 🏷️ Cluster version, once someone asked.
    #[serde(default)]
    pub cluster_version: Option<String>,
    /// 📌 Caller-level global pin. When set, readers and the planner talk only to this node.
    #[serde(default)]
    pub pinned_node: Option<NodeAddress>,

    /// 📦 Generic resource, used when the read/write specific ones are absent.
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub resource_read: Option<String>,
    #[serde(default)]
    pub resource_write: Option<String>,

    /// 📭 Pretend a missing read target is an empty one.
    #[serde(default, alias = "index_read_missing_as_empty")]
    pub read_missing_as_empty: bool,
    #[serde(default)]
    pub field_presence_validation: FieldPresenceValidation,
    /// 🎯 Projected fields. Empty means "the whole document, please".
    #[serde(default)]
    pub scroll_fields: Vec<String>,
    #[serde(default = "default_scroll_size")]
    pub scroll_size: usize,
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,

    /// 🏷️ Attach `_id`, `_index`, ... to every record under `read_metadata_field`.
    #[serde(default)]
    pub read_metadata: bool,
    #[serde(default = "default_read_metadata_field")]
    pub read_metadata_field: String,
    /// 🎭 Which value reader turns hits into records. See `readers.rs`.
    #[serde(default = "default_value_reader")]
    pub value_reader: String,

    /// 🔒 Auth. api_key beats basic auth, same as everywhere else in the codebase.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,

    /// ⏳ How long to wait for yellow health after creating a write target.
    #[serde(default = "default_health_timeout")]
    pub health_timeout: String,
}

fn default_nodes() -> Vec<NodeAddress> {
    vec![NodeAddress::new("localhost", crate::cluster::DEFAULT_PORT)]
}

fn default_true() -> bool {
    true
}

// 📦 50 docs per scroll page
fn default_scroll_size() -> usize {
    50
}

fn default_scroll_keep_alive() -> String {
    "5m".to_string()
}

fn default_read_metadata_field() -> String {
    "_metadata".to_string()
}

fn default_value_reader() -> String {
    "json".to_string()
}

fn default_health_timeout() -> String {
    "10s".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            discovered_nodes: Vec::new(),
            nodes_discovery: true,
            cluster_version: None,
            pinned_node: None,
            resource: None,
            resource_read: None,
            resource_write: None,
            read_missing_as_empty: false,
            field_presence_validation: FieldPresenceValidation::default(),
            scroll_fields: Vec::new(),
            scroll_size: default_scroll_size(),
            scroll_keep_alive: default_scroll_keep_alive(),
            read_metadata: false,
            read_metadata_field: default_read_metadata_field(),
            value_reader: default_value_reader(),
            username: None,
            password: None,
            api_key: None,
            health_timeout: default_health_timeout(),
        }
    }
}

impl Settings {
    /// 💾 Freeze into an opaque, versioned string.
    pub fn save(&self) -> Result<String> {
        snapshot::encode(SETTINGS_KIND, self).context("💀 Failed to snapshot settings")
    }

    /// 📬 Thaw a string produced by [`Settings::save`].
    pub fn load(saved: &str) -> Result<Settings> {
        snapshot::decode(SETTINGS_KIND, saved)
    }

    /// 📖 The read target. `resource_read` first, then `resource`.
    pub fn resource_for_read(&self) -> Result<&str> {
        self.resource_read
            .as_deref()
            .or(self.resource.as_deref())
            .context("💀 No read resource configured. Set `resource_read` (or `resource`).")
    }

    /// ✍️ The write target. `resource_write` first, then `resource`.
    pub fn resource_for_write(&self) -> Result<&str> {
        self.resource_write
            .as_deref()
            .or(self.resource.as_deref())
            .context("💀 No write resource configured. Set `resource_write` (or `resource`).")
    }

    /// 🗺️ Discovered nodes when discovery found any, otherwise the declared ones.
    pub fn discovered_or_declared_nodes(&self) -> Vec<NodeAddress> {
        if self.discovered_nodes.is_empty() {
            self.nodes.clone()
        } else {
            self.discovered_nodes.clone()
        }
    }

    /// 🔭 A copy carrying discovery results. Discovery never edits in place.
    pub fn with_discovery(
        &self,
        discovered_nodes: Vec<NodeAddress>,
        cluster_version: Option<String>,
    ) -> Settings {
        let mut discovered = self.clone();
        if !discovered_nodes.is_empty() {
            discovered.discovered_nodes = discovered_nodes;
        }
        if cluster_version.is_some() {
            discovered.cluster_version = cluster_version;
        }
        discovered
    }
}
