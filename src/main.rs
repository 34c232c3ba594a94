use anyhow::{Context, Result};
use clap::Parser;
use custom_dv::command;
use custom_dv::config::NodeConfig;
use custom_dv::control_server::ControlServer;
use custom_dv::protocol::Node;
use custom_dv::topology::Topology;
use custom_dv::PeerId;
use log::{error, info};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "custom_dv")]
struct Cli {
    /// Topology file
    #[arg(short, long)]
    topology: String,

    /// Seconds between routing updates
    #[arg(short, long)]
    interval: Option<u64>,

    /// JSON node configuration
    #[arg(long)]
    config: Option<String>,

    /// Local server id, when the topology file does not make it clear
    #[arg(long)]
    id: Option<PeerId>,

    /// Local address used to pick the server entry
    #[arg(long)]
    address: Option<Ipv4Addr>,

    #[arg(long)]
    control_port: Option<u16>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path).with_context(|| format!("Failed to load config {}", path))?,
        None => NodeConfig::default(),
    };
    if let Some(interval) = cli.interval {
        config.update_interval_secs = interval;
    }
    if cli.control_port.is_some() {
        config.control_port = cli.control_port;
    }
    config.validate()?;

    let topology = Topology::load(&cli.topology)?;
    let local_id = topology.local_id(cli.id, cli.address)?;
    let table = topology.build_table(local_id)?;
    info!(
        "Server {} loaded {} servers and {} neighbors from {}",
        local_id,
        table.len(),
        topology.links.len(),
        cli.topology
    );

    let node = Arc::new(Node::bind(table, config.clone()).await?);
    node.start().await?;

    if let Some(port) = config.control_port {
        let server = ControlServer::new(port, node.clone());
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Control server stopped: {}", e);
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("exit") {
            break;
        }
        if let Some(response) = command::run_line(&node, &line).await {
            println!("{}", response);
        }
    }

    if !node.has_crashed() {
        node.crash().await?;
    }
    Ok(())
}
