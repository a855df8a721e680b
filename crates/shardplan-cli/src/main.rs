//! 🚀 shardplan-cli: the front door. Loads config, sets up logging, and lets the library work.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//!
//! Subcommands:
//! - `plan`: print every partition and which task it lands on.
//! - `read`: stream every document of the read target to stdout as NDJSON.
//! - `write-target --task N`: print the node writer task N would pin to.

use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::UTF8_FULL_CONDENSED};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shardplan::{AppConfig, Supervisor, load_config};

#[derive(Debug, Parser)]
#[command(name = "shardplan", version, about = "🧩 Shard-aware partition planning for a document cluster")]
struct Cli {
    /// 🔧 TOML config file. Missing is fine; SHARDPLAN_* env vars fill in.
    #[arg(short, long, default_value = "shardplan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🗺️ Plan partitions and show the per-task assignment.
    Plan,
    /// 📖 Read everything as NDJSON on stdout.
    Read {
        /// 📊 Spinner on stderr while reading.
        #[arg(long)]
        progress: bool,
    },
    /// 🎯 Which node would writer task N use? Negative = no task context.
    WriteTarget {
        #[arg(long, allow_hyphen_values = true)]
        task: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.config.as_path();
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
             try an absolute one. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };
    let app_config = load_config(config_file)
        .context("💀 In shardplan-cli, main, we couldn't load the config. Take a look at the file and the SHARDPLAN_* variables.")?;

    if let Err(err) = dispatch(cli.command, app_config).await {
        error!("💀 error: {}", err);
        let mut smells_like_connection_trouble = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                smells_like_connection_trouble = true;
            }
        }
        if smells_like_connection_trouble {
            error!(
                "🔧 hint: looks like the cluster isn't reachable. Check the `nodes` setting and \
                 that the cluster is actually running (`docker ps` if it lives in a container)."
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(command: Command, app_config: AppConfig) -> Result<()> {
    match command {
        Command::Plan => plan(app_config).await,
        Command::Read { progress } => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let summary = shardplan::run(app_config, &mut out, progress).await?;
            info!(
                "✅ Read {} record(s) from {} partition(s) over {} task(s)",
                summary.records, summary.partitions, summary.tasks
            );
            Ok(())
        }
        Command::WriteTarget { task } => {
            let supervisor = Supervisor::new(app_config)?;
            let mut rng = StdRng::from_os_rng();
            let pin = supervisor.write_target(task, &mut rng).await?;
            println!("{pin}");
            Ok(())
        }
    }
}

async fn plan(app_config: AppConfig) -> Result<()> {
    let supervisor = Supervisor::new(app_config)?;
    let definitions = supervisor.plan().await?;
    let assignments = supervisor.assignments(&definitions)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["task", "index", "shard", "node", "address"]);
    for (task, slice) in assignments.iter().enumerate() {
        for definition in slice.iter() {
            table.add_row(vec![
                Cell::new(task),
                Cell::new(&definition.index),
                Cell::new(definition.shard_id),
                Cell::new(format!("{}/{}", definition.node_id, definition.node_name)),
                Cell::new(definition.node_address()),
            ]);
        }
    }
    println!("{table}");
    println!(
        "🧩 {} partition(s) across {} task(s)",
        definitions.len(),
        supervisor.total_tasks()
    );
    Ok(())
}
