//! Merging of received distance vectors into the local table.

use super::messages::UpdatePacket;
use super::neighbor_manager;
use super::routing_table::RoutingTable;
use super::types::{AdvertisedCost, Cost};
use crate::PeerId;
use crate::error::PacketError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Vector merged; `changed` entries got a new cost or next hop.
    Merged { sender: PeerId, changed: usize },
    /// The sender told us our link to it is going away.
    LinkWithdrawn { sender: PeerId },
}

/// Decodes a raw datagram and merges it. Any error means the packet was
/// dropped and the table is untouched.
pub fn process_datagram(
    table: &mut RoutingTable,
    raw: &[u8],
    now: DateTime<Utc>,
) -> Result<MergeOutcome, PacketError> {
    let packet = UpdatePacket::decode(raw)?;
    process_routing_update(table, &packet, now)
}

pub fn process_routing_update(
    table: &mut RoutingTable,
    packet: &UpdatePacket,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, PacketError> {
    let sender_id = resolve_sender(table, packet)?;

    if let Some(adv) = packet.advertisement_for(table.self_id()) {
        if adv.cost == AdvertisedCost::Withdrawn {
            info!("Server {} withdrew its link to us", sender_id);
            if let Some(sender) = table.get_mut(sender_id) {
                sender.set_direct_link_cost(Cost::Infinite);
            }
            neighbor_manager::remove_path(table, sender_id);
            table.record_packet();
            return Ok(MergeOutcome::LinkWithdrawn { sender: sender_id });
        }
        refresh_direct_link(table, sender_id, adv.cost.to_cost());
    }

    let changed = relax(table, sender_id, packet);

    table.record_packet();
    if let Some(sender) = table.get_mut(sender_id) {
        sender.touch(Some(now));
    }

    debug!("Merged update from server {} ({} entries changed)", sender_id, changed);
    Ok(MergeOutcome::Merged {
        sender: sender_id,
        changed,
    })
}

/// Maps the header endpoint to a configured, administratively-up neighbor.
fn resolve_sender(table: &RoutingTable, packet: &UpdatePacket) -> Result<PeerId, PacketError> {
    let unknown = PacketError::UnknownSender {
        address: packet.sender_address,
        port: packet.sender_port,
    };

    let sender_id = packet.sender_id().ok_or_else(|| unknown.clone())?;
    let sender = table.get(sender_id).ok_or_else(|| unknown.clone())?;

    if sender.address != packet.sender_address || sender.port != packet.sender_port {
        return Err(unknown);
    }
    if sender_id == table.self_id() || !sender.is_configured_neighbor() {
        return Err(PacketError::NotNeighbor(sender_id));
    }
    if sender.is_admin_down() {
        return Err(PacketError::LinkDisabled(sender_id));
    }

    Ok(sender_id)
}

/// Applies the sender's freshly advertised direct cost to us.
fn refresh_direct_link(table: &mut RoutingTable, sender_id: PeerId, direct: Cost) {
    let Some(sender) = table.get_mut(sender_id) else {
        return;
    };

    if sender.direct_link_cost() != direct {
        debug!(
            "Direct link to server {} now {} (was {})",
            sender_id,
            direct,
            sender.direct_link_cost()
        );
    }
    sender.set_direct_link_cost(direct);

    if sender.next_hop() == Some(sender_id) {
        sender.set_route(direct, sender_id);
    } else if direct < sender.cost() {
        sender.set_route(direct, sender_id);
    }
}

/// Bellman-Ford relaxation over every non-local entry.
///
/// Routes already going through the sender follow its report even when it
/// gets worse; everything else only moves on a strict improvement.
fn relax(table: &mut RoutingTable, sender_id: PeerId, packet: &UpdatePacket) -> usize {
    let Some(sender_direct) = table.get(sender_id).map(|s| s.direct_link_cost()) else {
        return 0;
    };

    let advertised: HashMap<PeerId, Cost> = packet
        .advertisements
        .iter()
        .map(|adv| (adv.id, adv.cost.to_cost()))
        .collect();

    let mut changed = 0;
    for dest in table.remote_entries_mut() {
        let Some(&cost) = advertised.get(&dest.id) else {
            continue;
        };
        let candidate = sender_direct.saturating_add(cost);

        if dest.next_hop() == Some(sender_id) {
            if dest.cost() != candidate {
                dest.set_route(candidate, sender_id);
                changed += 1;
            }
        } else if candidate.is_finite() && candidate < dest.cost() {
            dest.set_route(candidate, sender_id);
            changed += 1;
        }
    }
    changed
}
