use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_plugin_loader::{
    Capability, CapabilityRegistry, LoadReport, LoaderConfig, ManifestRegistry, PayloadCollector,
    PluginLoader, ProcessTransport,
};

/// Beacon plugins - discover and load capability plugins
#[derive(Parser)]
#[command(name = "beacon-plugins", version, about)]
struct Cli {
    /// Plugin directory to scan (repeatable); overrides config
    #[arg(short = 'd', long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Seconds each plugin may take before it counts as failed
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List installed plugins advertising a capability
    List {
        /// Capability name (e.g. "omni.menu.entries")
        capability: String,
    },
    /// Connect to every plugin advertising a capability and print the results
    Load {
        /// Capability name (e.g. "omni.menu.entries")
        capability: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = match cli.verbose {
        0 => "warn,beacon_plugin_loader=info",
        1 => "info,beacon_plugin_loader=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = LoaderConfig::load()?;
    if !cli.plugin_dirs.is_empty() {
        config.plugin_dirs = cli.plugin_dirs;
    }
    if let Some(secs) = cli.timeout_secs {
        config.peer_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::List { capability } => cmd_list(&config, &capability),
        Command::Load { capability } => cmd_load(config, &capability).await,
    }
}

/// Print the discovered targets as JSON
fn cmd_list(config: &LoaderConfig, capability: &str) -> anyhow::Result<()> {
    let capability = Capability::new(capability)?;
    let registry = ManifestRegistry::new(config.plugin_dirs.clone());
    let targets = registry.discover(&capability)?;

    println!("{}", serde_json::to_string_pretty(&targets)?);
    Ok(())
}

/// Run one connect cycle and print the report with every outcome
async fn cmd_load(config: LoaderConfig, capability: &str) -> anyhow::Result<()> {
    let capability = Capability::new(capability)?;
    let loader = PluginLoader::with_options(
        capability.clone(),
        Arc::new(ManifestRegistry::new(config.plugin_dirs)),
        Arc::new(ProcessTransport::new(capability)),
        PayloadCollector::new(),
        config.peer_timeout,
    );

    loader.subscribe(|report: &LoadReport| {
        tracing::info!(
            discovered = report.discovered,
            resolved = report.resolved,
            failed = report.failed,
            "all plugins resolved"
        );
    });

    loader.connect()?;
    let state = loader.settled().await;

    let outcomes: Vec<serde_json::Value> = loader
        .handler()
        .outcomes()
        .into_iter()
        .map(|(target, outcome)| serde_json::json!({ "plugin": target.id, "outcome": outcome }))
        .collect();

    let output = serde_json::json!({
        "state": state,
        "report": loader.last_report(),
        "outcomes": outcomes,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
