use super::neighbor_manager;
use super::route_manager::{self, MergeOutcome};
use super::routing_table::RoutingTable;
use super::types::{Cost, Outbound};
use super::Node;
use crate::{PeerId, SharedRoutingTable};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub timed_out: Vec<PeerId>,
    pub outbound: Vec<Outbound>,
}

/// One scheduler cycle: expire silent neighbors, then build an update for
/// every neighbor that is still live.
pub fn run_cycle(
    table: &mut RoutingTable,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> CycleOutcome {
    let timed_out: Vec<PeerId> = table
        .neighbors()
        .filter(|neighbor| match neighbor.last_update() {
            Some(last) => now.signed_duration_since(last) >= timeout,
            None => false,
        })
        .map(|neighbor| neighbor.id)
        .collect();

    for &id in &timed_out {
        warn!("Server {} timed out, marking link as down", id);
        if let Some(neighbor) = table.get_mut(id) {
            neighbor.set_direct_link_cost(Cost::Infinite);
            neighbor.touch(None);
        }
        neighbor_manager::remove_path(table, id);
    }

    CycleOutcome {
        timed_out,
        outbound: table.build_broadcast(),
    }
}

/// Sends every packet, logging and skipping the ones that fail.
/// Returns how many went out.
pub async fn send_all(socket: &UdpSocket, outbound: &[Outbound]) -> usize {
    let mut sent = 0;
    for out in outbound {
        let bytes = match out.packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode update for server {}: {}", out.recipient, e);
                continue;
            }
        };

        match socket.send_to(&bytes, out.addr).await {
            Ok(_) => {
                debug!("Sent update to server {} at {} ({} bytes)", out.recipient, out.addr, bytes.len());
                sent += 1;
            }
            Err(e) => warn!("Failed to send update to server {} at {}: {}", out.recipient, out.addr, e),
        }
    }
    sent
}

pub(super) fn start_tasks(node: &Node) -> Vec<tokio::task::JoinHandle<()>> {
    let update_handle = {
        let table = node.table.clone();
        let socket = node.socket.clone();
        let is_running = node.is_running.clone();
        let period = node.config.update_interval();
        let timeout = node.config.neighbor_timeout();
        let mut shutdown_rx = node.shutdown_tx.subscribe();

        tokio::spawn(async move {
            update_task(table, socket, period, timeout, is_running, &mut shutdown_rx).await;
        })
    };

    let listen_handle = {
        let table = node.table.clone();
        let socket = node.socket.clone();
        let is_running = node.is_running.clone();
        let buffer_size = node.config.recv_buffer_size;
        let mut shutdown_rx = node.shutdown_tx.subscribe();

        tokio::spawn(async move {
            listen_task(table, socket, buffer_size, is_running, &mut shutdown_rx).await;
        })
    };

    info!("All protocol tasks started");
    vec![update_handle, listen_handle]
}

async fn update_task(
    table: SharedRoutingTable,
    socket: Arc<UdpSocket>,
    period: Duration,
    timeout: chrono::Duration,
    is_running: Arc<AtomicBool>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Update task shutting down");
                break;
            }
            _ = interval.tick() => {
                if !is_running.load(Ordering::Relaxed) {
                    break;
                }

                let mut table_guard = table.lock().await;
                let outcome = run_cycle(&mut table_guard, Utc::now(), timeout);
                let sent = send_all(&socket, &outcome.outbound).await;
                drop(table_guard);

                debug!("Periodic update sent to {} of {} neighbors", sent, outcome.outbound.len());
            }
        }
    }
}

async fn listen_task(
    table: SharedRoutingTable,
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    is_running: Arc<AtomicBool>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut buffer = vec![0u8; buffer_size.max(super::messages::HEADER_SIZE)];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Listen task shutting down");
                break;
            }
            result = socket.recv_from(&mut buffer) => {
                if !is_running.load(Ordering::Relaxed) {
                    break;
                }

                match result {
                    Ok((len, addr)) => {
                        let mut table_guard = table.lock().await;
                        match route_manager::process_datagram(&mut table_guard, &buffer[..len], Utc::now()) {
                            Ok(MergeOutcome::Merged { sender, changed }) => {
                                info!("RECEIVED A MESSAGE FROM SERVER {} ({} routes changed)", sender, changed);
                            }
                            Ok(MergeOutcome::LinkWithdrawn { sender }) => {
                                warn!("Server {} withdrew the link to us", sender);
                            }
                            Err(e) => {
                                debug!("Dropped packet from {}: {}", addr, e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to receive packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}
