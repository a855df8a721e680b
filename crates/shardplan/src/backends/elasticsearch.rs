//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN - INT. COORDINATOR - PLANNING TIME
//!
//! Three declared nodes. One of them answers. It knows about nine more.
//! The planner asks where the shards live, and every answer comes back with an
//! HTTP address attached. Nobody has read a single document yet. Nobody needed to.
//!
//! 🧠 Knowledge graph:
//! - `ElasticsearchConnector`: owns one pooled `reqwest::Client` (10s connect, 30s request) and
//!   hands out `ElasticsearchClient`s bound to one node: the pin, or the first known node.
//! - `discover`: `GET /_nodes/http` for the HTTP publish addresses, `GET /` for the version.
//!   The first declared node that answers wins.
//! - `ElasticsearchClient` (next door): the metadata REST calls + `_bulk`.
//! - `ElasticsearchScroll` (next door): one scroll cursor, `POST /_search/scroll` per page,
//!   `DELETE /_search/scroll` on close.
//! - Auth: api key beats basic auth. Always. Not a democracy.
//!
//! 🦆 The duck tried to scroll without a keep-alive. The cursor expired mid-quack.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::backends::{ClientBackend, ClusterConnector};
use crate::cluster::{DEFAULT_PORT, Node, NodeAddress};
use crate::error::PartitionError;
use crate::settings::Settings;

mod elasticsearch_client;
mod elasticsearch_scroll;

pub use elasticsearch_client::ElasticsearchClient;
pub use elasticsearch_scroll::ElasticsearchScroll;

/// 🔒 Who we say we are. Lifted out of `Settings` once per client.
#[derive(Debug, Clone, Default)]
pub(crate) struct Credentials {
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
}

impl Credentials {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            username: settings.username.clone(),
            password: settings.password.clone(),
            api_key: settings.api_key.clone(),
        }
    }

    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        // -- 🔒 api key wins over basic auth
        if let Some(ref api_key) = self.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.username {
            request.basic_auth(username, self.password.as_ref())
        } else {
            request
        }
    }
}

/// 📬 Read a response body as JSON, bailing with the body when the status is not 2xx.
pub(crate) async fn json_body(response: reqwest::Response, what: &str) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("💀 Failed to read the response body of {what}"))?;
    if !status.is_success() {
        anyhow::bail!("💀 {what} answered with status {status}: {text}");
    }
    serde_json::from_str(&text)
        .with_context(|| format!("💀 {what} answered with something that is not JSON: {text}"))
}

/// 📡 Parse `/_nodes/http` into id → node. Nodes without HTTP enabled are left out.
pub(crate) fn parse_http_nodes(body: &Value) -> Result<BTreeMap<String, Node>> {
    let nodes = body
        .get("nodes")
        .and_then(Value::as_object)
        .context("💀 /_nodes/http response has no `nodes` object")?;
    let mut parsed = BTreeMap::new();
    for (id, node) in nodes {
        let Some(publish) = node.pointer("/http/publish_address").and_then(Value::as_str) else {
            trace!("🙈 Node [{}] has no HTTP publish address; skipping it", id);
            continue;
        };
        let address = parse_publish_address(publish)?;
        let name = node.get("name").and_then(Value::as_str).unwrap_or(id);
        parsed.insert(
            id.clone(),
            Node::new(id.clone(), name, address.host, address.port),
        );
    }
    Ok(parsed)
}

/// 🔎 `10.0.0.1:9200`, `es-1/10.0.0.1:9200` or `[::1]:9200` into an address.
pub(crate) fn parse_publish_address(publish: &str) -> Result<NodeAddress> {
    // -- 🎭 `hostname/ip:port` - the ip is the part we can actually dial
    let publish = publish.rsplit('/').next().unwrap_or(publish);
    match publish.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("💀 Publish address [{publish}] has a bad port"))?;
            Ok(NodeAddress::new(host, port))
        }
        _ => Ok(NodeAddress::new(publish, DEFAULT_PORT)),
    }
}

/// 🏭 Hands out REST clients. Cheap to clone; the connection pool is shared.
#[derive(Debug, Clone)]
pub struct ElasticsearchConnector {
    http: reqwest::Client,
}

impl ElasticsearchConnector {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. Probably the TLS stack. Probably.")?;
        Ok(Self { http })
    }

    async fn discover_from(
        &self,
        node: &NodeAddress,
        credentials: &Credentials,
        nodes_discovery: bool,
    ) -> Result<(Vec<NodeAddress>, Option<String>)> {
        let base = node.base_url();
        let discovered = if nodes_discovery {
            let response = credentials
                .apply(self.http.get(format!("{base}/_nodes/http")))
                .send()
                .await
                .with_context(|| format!("💀 Node discovery request to [{node}] never made it"))?;
            let body = json_body(response, "GET /_nodes/http").await?;
            parse_http_nodes(&body)?
                .values()
                .map(Node::address)
                .collect()
        } else {
            Vec::new()
        };

        let response = credentials
            .apply(self.http.get(format!("{base}/")))
            .send()
            .await
            .with_context(|| format!("💀 Version request to [{node}] never made it"))?;
        let body = json_body(response, "GET /").await?;
        let version = body
            .pointer("/version/number")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((discovered, version))
    }
}

#[async_trait]
impl ClusterConnector for ElasticsearchConnector {
    async fn discover(&self, settings: &Settings) -> Result<Settings> {
        let credentials = Credentials::from_settings(settings);
        let mut last_error = None;
        for node in &settings.nodes {
            match self
                .discover_from(node, &credentials, settings.nodes_discovery)
                .await
            {
                Ok((discovered, version)) => {
                    debug!(
                        "🔭 Discovery via [{}] found {} node(s), version {:?}",
                        node,
                        discovered.len(),
                        version
                    );
                    return Ok(settings.with_discovery(discovered, version));
                }
                Err(err) => {
                    warn!("⚠️ Declared node [{}] did not answer discovery: {:#}", node, err);
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err.context("💀 No declared node answered discovery")),
            None => Err(PartitionError::NoNodes.into()),
        }
    }

    async fn connect(&self, settings: &Settings, pin: Option<&NodeAddress>) -> Result<ClientBackend> {
        let target = match pin {
            Some(pin) => pin.clone(),
            None => settings
                .discovered_or_declared_nodes()
                .into_iter()
                .next()
                .ok_or(PartitionError::NoNodes)?,
        };
        trace!("🔌 Connecting to [{}] (pinned: {})", target, pin.is_some());
        Ok(ClientBackend::Elasticsearch(ElasticsearchClient::new(
            self.http.clone(),
            settings,
            target,
            pin.is_some(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) async fn server_settings(server: &MockServer) -> Result<Settings> {
        Ok(Settings {
            nodes: vec![server.uri().parse()?],
            nodes_discovery: false,
            resource_read: Some("logs".to_string()),
            resource_write: Some("out".to_string()),
            ..Settings::default()
        })
    }

    #[tokio::test]
    async fn the_one_where_a_client_goes_where_it_is_pinned_or_else_to_the_first_node() -> Result<()> {
        let settings = Settings {
            nodes: vec!["es-1:9201".parse()?, "es-2:9202".parse()?],
            ..Settings::default()
        };
        let connector = ElasticsearchConnector::new()?;
        let pin = NodeAddress::new("10.0.0.7", 9200);
        for (asked, target, pinned) in [
            (None, NodeAddress::new("es-1", 9201), false),
            (Some(&pin), pin.clone(), true),
        ] {
            match connector.connect(&settings, asked).await? {
                ClientBackend::Elasticsearch(client) => {
                    assert_eq!((client.target(), client.is_pinned()), (&target, pinned));
                }
                other => panic!("💀 expected a REST client, got {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn the_one_where_publish_addresses_come_in_three_flavours() -> Result<()> {
        assert_eq!(parse_publish_address("10.0.0.1:9201")?, NodeAddress::new("10.0.0.1", 9201));
        assert_eq!(
            parse_publish_address("es-1.local/10.0.0.2:9200")?,
            NodeAddress::new("10.0.0.2", 9200)
        );
        assert_eq!(parse_publish_address("[::1]:9200")?, NodeAddress::new("[::1]", 9200));
        assert!(parse_publish_address("10.0.0.1:http").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_discovery_finds_nodes_and_a_version() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_nodes/http"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": {
                    "abc": {"name": "es-a", "http": {"publish_address": "10.0.0.1:9200"}},
                    "def": {"name": "es-b", "http": {"publish_address": "es-b/10.0.0.2:9200"}},
                    "ghi": {"name": "coordinating-only"}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"version": {"number": "8.11.1"}})),
            )
            .mount(&server)
            .await;

        let connector = ElasticsearchConnector::new()?;
        let settings = Settings {
            nodes_discovery: true,
            ..server_settings(&server).await?
        };
        let discovered = connector.discover(&settings).await?;
        assert_eq!(
            discovered.discovered_nodes,
            vec![NodeAddress::new("10.0.0.1", 9200), NodeAddress::new("10.0.0.2", 9200)]
        );
        assert_eq!(discovered.cluster_version.as_deref(), Some("8.11.1"));
        assert!(settings.discovered_nodes.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_answers_discovery() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let connector = ElasticsearchConnector::new()?;
        assert!(connector.discover(&server_settings(&server).await?).await.is_err());

        let nowhere = Settings {
            nodes: Vec::new(),
            discovered_nodes: Vec::new(),
            ..Settings::default()
        };
        let err = connector.connect(&nowhere, None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PartitionError>(), Some(PartitionError::NoNodes)));
        Ok(())
    }
}
