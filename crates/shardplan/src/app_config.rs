//! 🔧 App Configuration: the TOML-to-struct pipeline, partition edition.
//!
//! 📡 "Config not found: we looked under the couch, behind the fridge, and in every
//! SHARDPLAN_ variable. Nothing." - the loader, at 3am 🦆
//!
//! 🧠 Knowledge graph:
//! - `settings`: the connector knobs that get frozen into every partition definition.
//! - `runtime`: how many tasks to fan out and how deep the record channel is.
//! - `backend`: which cluster we talk to. A real one over REST, or the in-memory stand-in.
//! - Env vars (`SHARDPLAN_*`, `__` for nesting) merge first, the TOML file on top.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{ConnectorBackend, ElasticsearchConnector, InMemoryClusterConfig, InMemoryConnector};
use crate::settings::Settings;

/// 📦 Everything the binary needs to know about itself.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, alias = "supervisor_config")]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// 🧵 Fan-out knobs.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// 🔢 How many parallel read tasks the definitions are split across.
    #[serde(default = "default_total_tasks", alias = "tasks")]
    pub total_tasks: usize,
    /// 📬 Bounded channel depth between read workers and the consumer.
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
}

fn default_total_tasks() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            total_tasks: default_total_tasks(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// 🎭 Which cluster is on the other end of the wire.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum BackendConfig {
    #[default]
    Elasticsearch,
    InMemory(InMemoryClusterConfig),
}

impl BackendConfig {
    /// 🏭 Build the connector this config describes.
    pub fn connector(&self) -> Result<ConnectorBackend> {
        Ok(match self {
            BackendConfig::Elasticsearch => {
                ConnectorBackend::Elasticsearch(ElasticsearchConnector::new()?)
            }
            BackendConfig::InMemory(config) => {
                ConnectorBackend::InMemory(InMemoryConnector::from_config(config.clone()))
            }
        })
    }
}

/// 🚀 Load the config from env vars and, when given, a TOML file. The file wins on conflicts.
///
/// 💀 Errors name the file (or the lack of one) so the 3am reader knows where to look.
pub fn load_config(config_file_name: Option<&Path>) -> Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("SHARDPLAN_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SHARDPLAN_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SHARDPLAN_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };
    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FieldPresenceValidation;
    use std::io::Write;

    fn write_test_config(contents: &str) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        file.write_all(contents.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn the_one_where_every_knob_finds_its_drawer() -> Result<()> {
        let file = write_test_config(
            r#"
            [settings]
            nodes = ["es-1:9201", "https://es-2"]
            resource_read = "logs-*"
            resource_write = "out-{day|yyyy.MM}"
            field_presence_validation = "strict"
            scroll_fields = ["msg", "host.name"]
            index_read_missing_as_empty = true

            [runtime]
            tasks = 4
            queue_capacity = 64

            [backend.InMemory]
            health_times_out = true

            [[backend.InMemory.indices]]
            name = "logs-1"
            shards = 3
            documents = [{ msg = "hi" }]
            "#,
        )?;

        let app_config = load_config(Some(file.path()))?;
        let settings = &app_config.settings;
        assert_eq!(settings.nodes.len(), 2);
        assert_eq!(settings.nodes[0].port, 9201);
        assert_eq!(settings.nodes[1].host, "https://es-2");
        assert_eq!(settings.resource_for_read()?, "logs-*");
        assert_eq!(settings.field_presence_validation, FieldPresenceValidation::Strict);
        assert!(settings.read_missing_as_empty, "the old knob name still works");
        assert_eq!(settings.scroll_size, 50);
        assert_eq!(
            app_config.runtime,
            RuntimeConfig {
                total_tasks: 4,
                queue_capacity: 64
            }
        );
        match &app_config.backend {
            BackendConfig::InMemory(cluster) => {
                assert!(cluster.health_times_out);
                assert_eq!(cluster.indices[0].shards, 3);
                assert_eq!(cluster.indices[0].replicas, 0);
            }
            honestly_who_knows => panic!("💀 Expected the in-memory backend, got {honestly_who_knows:?}"),
        }
        assert!(matches!(app_config.backend.connector()?, ConnectorBackend::InMemory(_)));
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_file_still_gets_dressed() -> Result<()> {
        let file = write_test_config("")?;
        let app_config: AppConfig = Figment::new().merge(Toml::file(file.path())).extract()?;
        assert_eq!(app_config.runtime, RuntimeConfig::default());
        assert_eq!(app_config.settings, Settings::default());
        assert!(matches!(app_config.backend, BackendConfig::Elasticsearch));
        Ok(())
    }

    #[test]
    fn the_one_where_a_bad_port_is_caught_at_the_door() -> Result<()> {
        let file = write_test_config("[settings]\nnodes = [\"es-1:ninety-two-hundred\"]\n")?;
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains(&file.path().display().to_string()));

        // -- 📄 the same table parsed by hand agrees with figment on the happy parts
        let by_hand: toml::Value = toml::from_str("[runtime]\ntotal_tasks = 2\n")?;
        let runtime: RuntimeConfig = by_hand
            .get("runtime")
            .cloned()
            .context("💀 no runtime table")?
            .try_into()?;
        assert_eq!(runtime.total_tasks, 2);
        assert_eq!(runtime.queue_capacity, 10);
        Ok(())
    }
}
