pub mod messages;
pub mod neighbor_manager;
pub mod route_manager;
pub mod routing_table;
pub mod task_manager;
pub mod types;

pub use messages::*;
pub use routing_table::*;
pub use task_manager::CycleOutcome;
pub use types::*;

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::{PeerId, SharedRoutingTable};
use chrono::Utc;
use log::{info, warn};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

/// A running distance-vector server: the shared table, its socket, and the
/// receive and update tasks.
pub struct Node {
    table: SharedRoutingTable,
    socket: Arc<UdpSocket>,
    config: NodeConfig,
    is_running: Arc<AtomicBool>,
    crashed: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Binds the UDP socket on the local server's port.
    pub async fn bind(table: RoutingTable, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let port = table
            .self_entry()
            .map(|entry| entry.port)
            .ok_or(crate::error::ConfigError::UnresolvedLocalId)?;

        let addr = SocketAddr::V4(SocketAddrV4::new(config.bind_address, port));
        let socket = UdpSocket::bind(addr).await?;
        info!("Server {} listening on {}", table.self_id(), socket.local_addr()?);

        Ok(Self::with_socket(table, socket, config))
    }

    /// Wraps an already bound socket.
    pub fn with_socket(table: RoutingTable, socket: UdpSocket, config: NodeConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            table: Arc::new(Mutex::new(table)),
            socket: Arc::new(socket),
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            crashed: AtomicBool::new(false),
            shutdown_tx,
            task_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn table(&self) -> &SharedRoutingTable {
        &self.table
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::Relaxed)
    }

    /// Spawns the receive and periodic update tasks. Calling it on a
    /// running node is a no-op.
    pub async fn start(&self) -> Result<()> {
        self.config.validate()?;

        // Held across the crashed check so a concurrent crash either sees
        // no tasks or sees all of them.
        let mut handles = self.task_handles.lock().await;
        self.ensure_alive()?;
        if self.is_running.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        handles.extend(task_manager::start_tasks(self));
        Ok(())
    }

    /// `update <local> <neighbor> <cost|inf>`
    pub async fn update_link(&self, local_id: PeerId, neighbor_id: PeerId, cost: Cost) -> Result<()> {
        self.ensure_alive()?;
        let mut table = self.table.lock().await;
        let outbound = neighbor_manager::update_link(&mut table, local_id, neighbor_id, cost, Utc::now())?;
        task_manager::send_all(&self.socket, &outbound).await;
        Ok(())
    }

    /// `disable <id>`
    pub async fn disable_link(&self, id: PeerId) -> Result<()> {
        self.ensure_alive()?;
        let mut table = self.table.lock().await;
        let outbound = neighbor_manager::disable_link(&mut table, id)?;
        task_manager::send_all(&self.socket, &outbound).await;
        Ok(())
    }

    /// `step`: one scheduler cycle right now, outside the timer.
    pub async fn step(&self) -> Result<CycleOutcome> {
        self.ensure_alive()?;
        let mut table = self.table.lock().await;
        let outcome = task_manager::run_cycle(&mut table, Utc::now(), self.config.neighbor_timeout());
        task_manager::send_all(&self.socket, &outcome.outbound).await;
        Ok(outcome)
    }

    /// `display`: the table rendered one line per server.
    pub async fn display(&self) -> Result<String> {
        self.ensure_alive()?;
        let table = self.table.lock().await;
        Ok(table.to_string())
    }

    /// Consistent copy of every entry, in id order.
    pub async fn snapshot(&self) -> Result<Vec<PeerEntry>> {
        self.ensure_alive()?;
        let table = self.table.lock().await;
        Ok(table.iter().cloned().collect())
    }

    /// `packets`: received packets since the previous call.
    pub async fn take_packet_count(&self) -> Result<u64> {
        self.ensure_alive()?;
        let mut table = self.table.lock().await;
        Ok(table.take_packet_count())
    }

    /// `crash`: stops both tasks for good. A second call fails.
    pub async fn crash(&self) -> Result<()> {
        if self.crashed.swap(true, Ordering::Relaxed) {
            return Err(NodeError::AlreadyCrashed);
        }
        warn!("Server crashing, no more updates will be sent or accepted");

        self.is_running.store(false, Ordering::Relaxed);
        let mut handles = self.task_handles.lock().await;
        let _ = self.shutdown_tx.send(());

        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Protocol task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.has_crashed() {
            Err(NodeError::AlreadyCrashed)
        } else {
            Ok(())
        }
    }
}
