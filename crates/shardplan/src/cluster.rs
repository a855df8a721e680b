//! 🗺️ Cluster topology: shards, nodes, and the addresses we pin them by.
//!
//! Read-only value types discovered from the cluster. Nobody here holds a socket.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 🚪 Default HTTP port for a node declared without one.
pub const DEFAULT_PORT: u16 = 9200;

/// 🧩 One physical slice of an index.
///
/// The derived `Ord` (index, id, primary) is the strict total order the writer sorts by,
/// so bucket `n` means the same shard on every task and every run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Shard {
    pub index: String,
    pub id: u32,
    pub primary: bool,
}

impl Shard {
    pub fn new(index: impl Into<String>, id: u32, primary: bool) -> Self {
        Self {
            index: index.into(),
            id,
            primary,
        }
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = if self.primary { "p" } else { "r" };
        write!(f, "[{}][{}]{}", self.index, self.id, role)
    }
}

/// 🖥️ One cluster member, as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub http_port: u16,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        ip: impl Into<String>,
        http_port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip: ip.into(),
            http_port,
        }
    }

    /// 📡 Where to send HTTP if you want this node and only this node.
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.ip.clone(), self.http_port)
    }
}

/// 📌 A `host:port` pair. Also the currency of pinning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 🌐 Base URL for this address. Schemes are someone else's fashion choice; we pick http
    /// unless the host already brought one.
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            anyhow::bail!("💀 Empty node address. A node needs at least a host. Even a sad one.");
        }
        // -- 🔎 look for the port after the last ':' but don't mistake "http:" for one
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, raw),
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().with_context(|| {
                    format!("💀 Node address [{raw}] has a port that is not a port: [{port}]")
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        let host = match scheme {
            Some(scheme) => format!("{scheme}://{host}"),
            None => host.to_string(),
        };
        Ok(NodeAddress::new(host, port))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_addresses_parse_with_and_without_ports() -> Result<()> {
        assert_eq!("es1:9201".parse::<NodeAddress>()?, NodeAddress::new("es1", 9201));
        assert_eq!("es2".parse::<NodeAddress>()?, NodeAddress::new("es2", DEFAULT_PORT));
        let with_scheme: NodeAddress = "https://es3:443/".parse()?;
        assert_eq!(with_scheme, NodeAddress::new("https://es3", 443));
        assert_eq!(with_scheme.base_url(), "https://es3:443");
        assert_eq!(NodeAddress::new("10.0.0.1", 9200).base_url(), "http://10.0.0.1:9200");
        Ok(())
    }

    #[test]
    fn the_one_where_a_port_named_banana_is_rejected() {
        assert!("es1:banana".parse::<NodeAddress>().is_err());
        assert!("   ".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn the_one_where_shards_line_up_in_a_strict_order() {
        let mut shards = vec![
            Shard::new("b", 0, true),
            Shard::new("a", 2, true),
            Shard::new("a", 0, false),
            Shard::new("a", 0, true),
        ];
        shards.sort();
        assert_eq!(
            shards,
            vec![
                Shard::new("a", 0, false),
                Shard::new("a", 0, true),
                Shard::new("a", 2, true),
                Shard::new("b", 0, true),
            ]
        );
        assert_eq!(Shard::new("logs", 3, true).to_string(), "[logs][3]p");
    }
}
