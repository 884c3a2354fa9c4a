//! Shoal daemon — entry point for running a Shoal node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use shoal_network::HttpTransport;
use shoal_node::{init_logging, load_keys, LogFormat, NodeConfig, ShoalNode, SyncStrategy};
use shoal_types::{CycleParams, JoinStrategy, NetworkId, SystemClock};

#[derive(Parser)]
#[command(name = "shoal-daemon", about = "Shoal consensus node daemon")]
struct Cli {
    /// Network to run on: "live", "test", or "dev".
    /// When a config file is provided, defaults to the file's network value.
    #[arg(long, env = "SHOAL_NETWORK")]
    network: Option<String>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "SHOAL_CONFIG")]
    config: Option<PathBuf>,

    /// Address other nodes use to reach this one.
    #[arg(long, env = "SHOAL_EXTERNAL_IP")]
    external_ip: Option<String>,

    #[arg(long, env = "SHOAL_EXTERNAL_PORT")]
    external_port: Option<u16>,

    #[arg(long, env = "SHOAL_INTERNAL_IP")]
    internal_ip: Option<String>,

    #[arg(long, env = "SHOAL_INTERNAL_PORT")]
    internal_port: Option<u16>,

    /// Seed nodes (comma-separated "ip:port"). None starts a new network.
    #[arg(long, env = "SHOAL_SEED_NODES", value_delimiter = ',')]
    seed_nodes: Vec<String>,

    /// Join strategy: "v1" (direct admission) or "v2" (standby list).
    #[arg(long, env = "SHOAL_JOIN_STRATEGY")]
    join_strategy: Option<String>,

    /// Sync strategy: "v1" (chain walk) or "v2" (list download).
    #[arg(long, env = "SHOAL_SYNC_STRATEGY")]
    sync_strategy: Option<String>,

    /// Hex-encoded 32-byte key seed.
    #[arg(long, env = "SHOAL_KEY_SEED", hide_env_values = true)]
    key_seed: Option<String>,

    /// File holding the node key; created on first start.
    #[arg(long, env = "SHOAL_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Skip the NTP drift check before joining.
    #[arg(long, env = "SHOAL_SKIP_CLOCK_CHECK")]
    skip_clock_check: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "SHOAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "SHOAL_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Start the node.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the effective configuration as TOML.
    Config,
    /// Print a fresh key seed and its public key.
    Keygen,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node.
    Run,
}

fn parse_network(s: &str) -> anyhow::Result<NetworkId> {
    match s.to_lowercase().as_str() {
        "live" => Ok(NetworkId::Live),
        "test" => Ok(NetworkId::Test),
        "dev" => Ok(NetworkId::Dev),
        other => anyhow::bail!("unknown network `{other}`"),
    }
}

fn parse_join_strategy(s: &str) -> anyhow::Result<JoinStrategy> {
    match s.to_lowercase().as_str() {
        "v1" => Ok(JoinStrategy::V1),
        "v2" => Ok(JoinStrategy::V2),
        other => anyhow::bail!("unknown join strategy `{other}`"),
    }
}

fn parse_sync_strategy(s: &str) -> anyhow::Result<SyncStrategy> {
    match s.to_lowercase().as_str() {
        "v1" => Ok(SyncStrategy::V1),
        "v2" => Ok(SyncStrategy::V2),
        other => anyhow::bail!("unknown sync strategy `{other}`"),
    }
}

/// File settings overlaid with CLI flags and env vars.
fn build_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(network) = &cli.network {
        config.network = parse_network(network)?;
    }
    if cli.config.is_none() {
        config.external_port = config.network.default_port();
        config.internal_port = config.network.default_port() + 1000;
    }
    if config.network == NetworkId::Dev && config.cycle == CycleParams::default() {
        config.cycle = CycleParams::dev_defaults();
    }
    if let Some(ip) = &cli.external_ip {
        config.external_ip = ip.clone();
    }
    if let Some(port) = cli.external_port {
        config.external_port = port;
    }
    if let Some(ip) = &cli.internal_ip {
        config.internal_ip = ip.clone();
    }
    if let Some(port) = cli.internal_port {
        config.internal_port = port;
    }
    if !cli.seed_nodes.is_empty() {
        config.seed_nodes = cli.seed_nodes.clone();
    }
    if let Some(s) = &cli.join_strategy {
        config.cycle.join_strategy = parse_join_strategy(s)?;
    }
    if let Some(s) = &cli.sync_strategy {
        config.sync_strategy = parse_sync_strategy(s)?;
    }
    if cli.key_seed.is_some() {
        config.key_seed = cli.key_seed.clone();
    }
    if cli.key_file.is_some() {
        config.key_file = cli.key_file.clone();
    }
    if cli.skip_clock_check {
        config.check_clock = false;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let keys = load_keys(&config)?;
    let transport = HttpTransport::new(Duration::from_millis(config.request_timeout_ms))?;
    let clock = SystemClock::default();

    if config.starts_network() {
        tracing::info!("no seed nodes configured, starting a new network");
    } else {
        tracing::info!(seeds = %config.seed_nodes.join(", "), "joining through seed nodes");
    }

    let mut node = ShoalNode::new(config, keys, Arc::new(transport), Arc::new(clock))?;
    let mut stopped = node.shutdown_controller().subscribe();
    node.start().await?;

    let signals = node.shutdown_controller().clone();
    tokio::select! {
        _ = signals.wait_for_signal() => {}
        _ = stopped.recv() => tracing::info!("node requested shutdown"),
    }

    tracing::info!("stopping node");
    node.stop().await?;
    tracing::info!("shoal daemon exited cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Keygen => {
            let keys = shoal_crypto::generate_keypair();
            println!("key_seed = \"{}\"", hex::encode(keys.private.0));
            println!("# public key {}", keys.public);
            Ok(())
        }
        Command::Node { action } => match action {
            NodeAction::Run => {
                let format: LogFormat = config.log_format.parse()?;
                init_logging(format, &config.log_level)
                    .map_err(|e| anyhow::anyhow!("logging: {e}"))?;
                run(config).await
            }
        },
    }
}
