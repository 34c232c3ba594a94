use crate::command::{self, Command};
use crate::protocol::{Node, PeerEntry};
use crate::PeerId;
use anyhow::Result;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// One routing table row as returned by `display`. `None` costs are unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub id: PeerId,
    pub next_hop: Option<PeerId>,
    pub cost: Option<u32>,
    pub direct_link_cost: Option<u32>,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl From<&PeerEntry> for RouteSummary {
    fn from(entry: &PeerEntry) -> Self {
        Self {
            id: entry.id,
            next_hop: entry.next_hop(),
            cost: entry.cost().value(),
            direct_link_cost: entry.direct_link_cost().value(),
            address: entry.address,
            port: entry.port,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ControlResponse {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Newline-delimited JSON front end for the same commands as the shell.
pub struct ControlServer {
    port: u16,
    node: Arc<Node>,
}

impl ControlServer {
    pub fn new(port: u16, node: Arc<Node>) -> Self {
        Self { port, node }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Control server listening on {}", bind_addr);
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Control connection from {}", addr);
                    let node = self.node.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(stream, node).await {
                            error!("Error handling control client {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept control connection: {}", e);
                }
            }
        }
    }

    async fn handle_client(mut stream: TcpStream, node: Arc<Node>) -> Result<()> {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            if buf_reader.read_line(&mut line).await? == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<ControlCommand>(trimmed) {
                Ok(request) => Self::process_command(request, &node).await,
                Err(e) => ControlResponse::failure(format!("Invalid JSON command: {}", e)),
            };

            let response_json = serde_json::to_string(&response)?;
            writer.write_all(format!("{}\n", response_json).as_bytes()).await?;
            writer.flush().await?;
        }

        Ok(())
    }

    pub async fn process_command(request: ControlCommand, node: &Node) -> ControlResponse {
        let line = std::iter::once(request.command.as_str())
            .chain(request.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let name = request.command.to_ascii_lowercase();

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => return ControlResponse::failure(command::render(&name, &Err(e.into()))),
        };

        match command {
            Command::Display => Self::get_routing_table(node).await,
            Command::Help => Self::get_help(),
            other => {
                let result = other.execute(node).await;
                let success = result.is_ok();
                let data = match (&other, &result) {
                    (Command::Packets, Ok(count)) => count.parse::<u64>().ok().map(serde_json::Value::from),
                    _ => None,
                };
                ControlResponse {
                    success,
                    message: command::render(&name, &result),
                    data,
                }
            }
        }
    }

    async fn get_routing_table(node: &Node) -> ControlResponse {
        let routes: Vec<RouteSummary> = match node.snapshot().await {
            Ok(entries) => entries.iter().map(RouteSummary::from).collect(),
            Err(e) => return ControlResponse::failure(command::render("display", &Err(e))),
        };

        match serde_json::to_value(&routes) {
            Ok(data) => ControlResponse {
                success: true,
                message: format!("display SUCCESS ({} routes)", routes.len()),
                data: Some(data),
            },
            Err(e) => ControlResponse::failure(format!("display {}", e)),
        }
    }

    fn get_help() -> ControlResponse {
        let commands: Vec<&str> = command::HELP.lines().collect();
        ControlResponse {
            success: true,
            message: "help SUCCESS".to_string(),
            data: Some(serde_json::Value::from(commands)),
        }
    }
}
