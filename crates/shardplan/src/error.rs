//! 💀 Errors: the taxonomy of things going wrong before, during, and after a shard.
//!
//! 🧠 Knowledge graph:
//! - Everything public returns `anyhow::Result`. These variants ride inside the `anyhow::Error`
//!   so callers can `downcast_ref::<PartitionError>()` and tell a config mistake from a cluster mood.
//! - Configuration errors (missing index, missing fields, unknown reader, no nodes) are fatal
//!   and fire BEFORE any partition exists. No partial results. No consolation prizes.
//! - Cluster communication errors are NOT here. They are plain `anyhow` errors with context,
//!   because the REST layer already knows how to describe a TCP RST in loving detail.
//! - Resource state warnings (yellow timeout, empty mapping) are not errors at all. They `warn!`.
//!
//! 🦆 The duck is a ConfigurationError. It was set to false.

use thiserror::Error;

/// 🏷️ The named failure modes of the partition layer.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// 📭 The read target does not exist and nobody said it was okay to pretend it's empty.
    #[error(
        "💀 Index [{resource}] missing and settings [{setting}] is set to false. \
         Create the index, fix the name, or flip the setting if an empty read is what you wanted."
    )]
    MissingIndex {
        resource: String,
        setting: &'static str,
    },

    /// 🔍 Strict field validation found configured scroll fields that the mapping never heard of.
    #[error(
        "💀 Field(s) {fields:?} not found in the mapping of [{resource}]. \
         The scroll asked for them by name. The mapping looked confused."
    )]
    MissingFields {
        resource: String,
        fields: Vec<String>,
    },

    /// 🎭 No value reader answers to this name.
    #[error("💀 No value reader named [{name}] is registered. Known readers: json, raw.")]
    UnknownValueReader { name: String },

    /// 🏝️ No declared nodes, no discovered nodes. Just us and the void.
    #[error("💀 No cluster nodes are declared or discovered. There is nobody to pin to.")]
    NoNodes,

    /// 🧩 The single-index write target reports zero primary shards.
    #[error("💀 Index [{resource}] reports no primary shards. There is no bucket to land in.")]
    NoPrimaryShards { resource: String },

    /// 🔢 The task index / task count pair cannot be assigned.
    #[error("💀 Task [{task}] of [{total}] cannot be assigned any partitions.")]
    InvalidTask { task: usize, total: usize },

    /// 🚪 A scroll was requested from a reader that was already closed.
    #[error("💀 Partition reader is closed. It does not reopen. It has moved on.")]
    ReaderClosed,

    /// 🙅 Read-only traversal, read-only feelings.
    #[error("💀 Operation [{operation}] is not supported.")]
    Unsupported { operation: &'static str },

    /// 📦 An opaque snapshot string could not be turned back into what it once was.
    #[error("💀 Corrupt or unsupported {kind} snapshot: {reason}")]
    Snapshot { kind: &'static str, reason: String },
}

impl PartitionError {
    /// ⚙️ True for the configuration family: fatal, fixable by editing config.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PartitionError::MissingIndex { .. }
                | PartitionError::MissingFields { .. }
                | PartitionError::UnknownValueReader { .. }
                | PartitionError::NoNodes
        )
    }
}
