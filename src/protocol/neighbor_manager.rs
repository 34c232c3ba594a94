//! Operator-driven link changes.
//!
//! These functions only touch the table and return the packets that should
//! go out immediately; the caller sends them while still holding the lock.

use super::routing_table::RoutingTable;
use super::types::{Cost, Outbound};
use crate::PeerId;
use crate::error::OperatorError;
use chrono::{DateTime, Utc};
use log::info;

/// Changes the cost of the direct link `local_id` -> `neighbor_id`.
///
/// An infinite cost withdraws the link: the neighbor gets one packet telling
/// it so, built before the local state changes. A finite cost is applied
/// and the neighbor gets a fresh update right away.
pub fn update_link(
    table: &mut RoutingTable,
    local_id: PeerId,
    neighbor_id: PeerId,
    cost: Cost,
    now: DateTime<Utc>,
) -> Result<Vec<Outbound>, OperatorError> {
    let self_id = table.self_id();
    if local_id != self_id {
        return Err(OperatorError::NotLocal {
            given: local_id,
            local: self_id,
        });
    }
    configured_neighbor(table, neighbor_id)?;

    match cost {
        Cost::Infinite => {
            let withdrawal = table.build_withdrawal(neighbor_id);
            if let Some(neighbor) = table.get_mut(neighbor_id) {
                neighbor.set_direct_link_cost(Cost::Infinite);
                neighbor.set_admin_down(true);
            }
            let removed = remove_path(table, neighbor_id);
            info!(
                "Link {} -> {} withdrawn, {} routes invalidated",
                self_id, neighbor_id, removed
            );
            Ok(withdrawal.into_iter().collect())
        }
        Cost::Finite(_) => {
            if let Some(neighbor) = table.get_mut(neighbor_id) {
                neighbor.set_direct_link_cost(cost);
                neighbor.set_admin_down(false);
                neighbor.touch(Some(now));
                if neighbor.next_hop() == Some(neighbor_id) || cost < neighbor.cost() {
                    neighbor.set_route(cost, neighbor_id);
                }
            }
            info!("Link {} -> {} cost set to {}", self_id, neighbor_id, cost);
            Ok(table.build_update(neighbor_id).into_iter().collect())
        }
    }
}

/// Takes the link to `id` down locally and returns a broadcast of the
/// resulting table to the remaining neighbors.
///
/// A link that is already down fails with `AlreadyDisabled`. If it was down
/// only because the neighbor timed out or withdrew it, it is still marked
/// administratively down so the neighbor's next packet cannot revive it.
pub fn disable_link(table: &mut RoutingTable, id: PeerId) -> Result<Vec<Outbound>, OperatorError> {
    configured_neighbor(table, id)?;

    let Some(neighbor) = table.get_mut(id) else {
        return Err(OperatorError::NotNeighbor(id));
    };
    if !neighbor.is_neighbor() {
        if !neighbor.is_admin_down() {
            neighbor.set_admin_down(true);
            info!("Link to server {} was already down, now held down", id);
        }
        return Err(OperatorError::AlreadyDisabled(id));
    }
    neighbor.set_direct_link_cost(Cost::Infinite);
    neighbor.set_admin_down(true);

    let removed = remove_path(table, id);
    info!("Link to server {} disabled, {} routes invalidated", id, removed);

    Ok(table.build_broadcast())
}

/// Invalidates the entry for `path_id` and every route whose next hop is
/// `path_id`. Returns how many entries were invalidated.
pub fn remove_path(table: &mut RoutingTable, path_id: PeerId) -> usize {
    let mut removed = 0;
    for entry in table.remote_entries_mut() {
        if entry.id == path_id || entry.next_hop() == Some(path_id) {
            entry.invalidate();
            removed += 1;
        }
    }
    removed
}

fn configured_neighbor(table: &RoutingTable, id: PeerId) -> Result<(), OperatorError> {
    match table.get(id) {
        Some(entry) if entry.is_configured_neighbor() => Ok(()),
        _ => Err(OperatorError::NotNeighbor(id)),
    }
}
