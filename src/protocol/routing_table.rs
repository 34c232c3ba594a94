use super::messages::{Advertisement, UpdatePacket};
use super::types::{AdvertisedCost, Cost, Outbound};
use crate::PeerId;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// One row of the routing table. There is one per server in the topology,
/// including the local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: PeerId,
    pub address: Ipv4Addr,
    pub port: u16,
    cost: Cost,
    direct_link_cost: Cost,
    next_hop: Option<PeerId>,
    last_update: Option<DateTime<Utc>>,
    configured_neighbor: bool,
    admin_down: bool,
}

impl PeerEntry {
    pub fn new(id: PeerId, address: Ipv4Addr, port: u16) -> Self {
        Self {
            id,
            address,
            port,
            cost: Cost::Infinite,
            direct_link_cost: Cost::Infinite,
            next_hop: None,
            last_update: None,
            configured_neighbor: false,
            admin_down: false,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn direct_link_cost(&self) -> Cost {
        self.direct_link_cost
    }

    pub fn next_hop(&self) -> Option<PeerId> {
        self.next_hop
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// A live neighbor: the direct link currently has a finite cost.
    pub fn is_neighbor(&self) -> bool {
        self.direct_link_cost.is_finite()
    }

    /// Listed as a neighbor in the topology file. Never changes after startup.
    pub fn is_configured_neighbor(&self) -> bool {
        self.configured_neighbor
    }

    /// Link taken down by the local operator (`disable` or `update .. inf`).
    pub fn is_admin_down(&self) -> bool {
        self.admin_down
    }

    /// Sets the path cost; an infinite cost always clears the next hop.
    pub(crate) fn set_route(&mut self, cost: Cost, via: PeerId) {
        self.cost = cost;
        self.next_hop = cost.is_finite().then_some(via);
    }

    pub(crate) fn invalidate(&mut self) {
        self.cost = Cost::Infinite;
        self.next_hop = None;
    }

    pub(crate) fn set_direct_link_cost(&mut self, cost: Cost) {
        self.direct_link_cost = cost;
    }

    pub(crate) fn set_admin_down(&mut self, down: bool) {
        self.admin_down = down;
    }

    pub(crate) fn touch(&mut self, now: Option<DateTime<Utc>>) {
        self.last_update = now;
    }
}

impl fmt::Display for PeerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let next_hop = match self.next_hop {
            Some(id) => id.to_string(),
            None => "-".to_string(),
        };
        write!(f, "{}\t{}\t{}", self.id, next_hop, self.cost)
    }
}

/// All known servers, kept sorted by id.
///
/// The table itself is not synchronised; the node wraps it in a single
/// mutex and every reader or writer holds that lock for the whole operation.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    self_id: PeerId,
    entries: Vec<PeerEntry>,
    packets_received: u64,
}

impl RoutingTable {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            entries: Vec::new(),
            packets_received: 0,
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn self_entry(&self) -> Option<&PeerEntry> {
        self.get(self.self_id)
    }

    /// Inserts a server keeping id order. The local server's entry gets
    /// cost 0 with itself as next hop.
    pub fn insert_sorted(&mut self, mut entry: PeerEntry) -> Result<(), ConfigError> {
        match self.entries.binary_search_by_key(&entry.id, |e| e.id) {
            Ok(_) => Err(ConfigError::DuplicateId(entry.id)),
            Err(position) => {
                if entry.id == self.self_id {
                    entry.set_route(Cost::ZERO, self.self_id);
                    entry.direct_link_cost = Cost::Infinite;
                    entry.configured_neighbor = false;
                }
                self.entries.insert(position, entry);
                Ok(())
            }
        }
    }

    /// Marks `id` as a direct neighbor reachable at `cost`. Startup only.
    pub fn add_neighbor(&mut self, id: PeerId, cost: Cost) -> Result<(), ConfigError> {
        if id == self.self_id {
            return Err(ConfigError::SelfNeighbor(id));
        }
        let entry = self.get_mut(id).ok_or(ConfigError::UnknownId(id))?;
        if entry.configured_neighbor {
            return Err(ConfigError::DuplicateNeighbor(id));
        }
        entry.configured_neighbor = true;
        entry.direct_link_cost = cost;
        entry.set_route(cost, id);
        Ok(())
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerEntry> {
        let index = self.entries.binary_search_by_key(&id, |e| e.id).ok()?;
        Some(&self.entries[index])
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerEntry> {
        let index = self.entries.binary_search_by_key(&id, |e| e.id).ok()?;
        Some(&mut self.entries[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter()
    }

    /// Every entry except the local one, mutable.
    pub(crate) fn remote_entries_mut(&mut self) -> impl Iterator<Item = &mut PeerEntry> {
        let self_id = self.self_id;
        self.entries.iter_mut().filter(move |e| e.id != self_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live neighbors in id order.
    pub fn neighbors(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter().filter(|e| e.is_neighbor())
    }

    pub fn find_by_endpoint(&self, address: Ipv4Addr, port: u16) -> Option<PeerId> {
        self.entries
            .iter()
            .find(|e| e.address == address && e.port == port)
            .map(|e| e.id)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub(crate) fn record_packet(&mut self) {
        self.packets_received += 1;
    }

    /// Returns the packet count since the previous call and resets it.
    pub fn take_packet_count(&mut self) -> u64 {
        std::mem::take(&mut self.packets_received)
    }

    /// Builds the update for one neighbor. The recipient's own slot carries
    /// our direct link cost to it rather than our best path cost.
    pub fn build_update(&self, recipient: PeerId) -> Option<Outbound> {
        self.build_packet(recipient, |entry| {
            if entry.id == recipient {
                entry.direct_link_cost.into()
            } else {
                entry.cost.into()
            }
        })
    }

    /// Same as `build_update` but tells the recipient the link is withdrawn.
    pub fn build_withdrawal(&self, recipient: PeerId) -> Option<Outbound> {
        self.build_packet(recipient, |entry| {
            if entry.id == recipient {
                AdvertisedCost::Withdrawn
            } else {
                entry.cost.into()
            }
        })
    }

    /// One update per live neighbor.
    pub fn build_broadcast(&self) -> Vec<Outbound> {
        self.neighbors()
            .filter_map(|neighbor| self.build_update(neighbor.id))
            .collect()
    }

    fn build_packet<F>(&self, recipient: PeerId, cost_for: F) -> Option<Outbound>
    where
        F: Fn(&PeerEntry) -> AdvertisedCost,
    {
        let local = self.self_entry()?;
        let target = self.get(recipient)?;

        let advertisements = self
            .entries
            .iter()
            .map(|entry| Advertisement {
                address: entry.address,
                port: entry.port,
                id: entry.id,
                cost: cost_for(entry),
            })
            .collect();

        Some(Outbound {
            recipient,
            addr: target.endpoint(),
            packet: UpdatePacket {
                sender_port: local.port,
                sender_address: local.address,
                advertisements,
            },
        })
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Routing Table:")?;
        writeln!(f, "ID\tNext\tCost")?;
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Four servers, local id 1, neighbors 2 (cost 7) and 4 (cost 2).
    pub(crate) fn sample_table() -> RoutingTable {
        let mut table = RoutingTable::new(1);
        for id in [3u16, 1, 4, 2] {
            table
                .insert_sorted(PeerEntry::new(id, Ipv4Addr::new(10, 0, 0, id as u8), 5000 + id))
                .unwrap();
        }
        table.add_neighbor(2, Cost::Finite(7)).unwrap();
        table.add_neighbor(4, Cost::Finite(2)).unwrap();
        table
    }

    #[test]
    fn keeps_entries_sorted_and_rejects_duplicates() {
        let mut table = sample_table();
        let ids: Vec<_> = table.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let err = table
            .insert_sorted(PeerEntry::new(3, Ipv4Addr::LOCALHOST, 1))
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateId(3));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn initial_state_follows_topology() {
        let table = sample_table();

        let local = table.self_entry().unwrap();
        assert_eq!(local.cost(), Cost::ZERO);
        assert_eq!(local.next_hop(), Some(1));
        assert!(!local.is_neighbor());

        let two = table.get(2).unwrap();
        assert_eq!(two.cost(), Cost::Finite(7));
        assert_eq!(two.next_hop(), Some(2));
        assert!(two.is_neighbor() && two.is_configured_neighbor());

        let three = table.get(3).unwrap();
        assert_eq!(three.cost(), Cost::Infinite);
        assert_eq!(three.next_hop(), None);
        assert!(!three.is_neighbor());

        assert!(table.get(9).is_none());
    }

    #[test]
    fn add_neighbor_validates_ids() {
        let mut table = sample_table();
        assert_eq!(table.add_neighbor(1, Cost::Finite(1)), Err(ConfigError::SelfNeighbor(1)));
        assert_eq!(table.add_neighbor(8, Cost::Finite(1)), Err(ConfigError::UnknownId(8)));
        assert_eq!(
            table.add_neighbor(2, Cost::Finite(1)),
            Err(ConfigError::DuplicateNeighbor(2))
        );
    }

    #[test]
    fn update_carries_direct_cost_for_recipient_only() {
        let mut table = sample_table();
        // best path to 2 is via 4 at cost 3, but the direct link stays at 7
        table.get_mut(2).unwrap().set_route(Cost::Finite(3), 4);

        let out = table.build_update(2).unwrap();
        assert_eq!(out.recipient, 2);
        assert_eq!(out.addr, "10.0.0.2:5002".parse::<SocketAddr>().unwrap());
        assert_eq!(out.packet.sender_address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(out.packet.sender_port, 5001);

        let costs: Vec<_> = out.packet.advertisements.iter().map(|a| a.cost).collect();
        assert_eq!(
            costs,
            vec![
                AdvertisedCost::Finite(0),
                AdvertisedCost::Finite(7),
                AdvertisedCost::Unreachable,
                AdvertisedCost::Finite(2),
            ]
        );

        let to_four = table.build_update(4).unwrap();
        assert_eq!(to_four.packet.advertisement_for(2).unwrap().cost, AdvertisedCost::Finite(3));
        assert_eq!(to_four.packet.sender_id(), Some(1));
    }

    #[test]
    fn withdrawal_marks_only_the_recipient() {
        let table = sample_table();
        let out = table.build_withdrawal(4).unwrap();
        assert_eq!(out.packet.advertisement_for(4).unwrap().cost, AdvertisedCost::Withdrawn);
        assert_eq!(out.packet.advertisement_for(2).unwrap().cost, AdvertisedCost::Finite(7));
    }

    #[test]
    fn broadcast_targets_live_neighbors() {
        let mut table = sample_table();
        let recipients: Vec<_> = table.build_broadcast().iter().map(|o| o.recipient).collect();
        assert_eq!(recipients, vec![2, 4]);

        table.get_mut(2).unwrap().set_direct_link_cost(Cost::Infinite);
        let recipients: Vec<_> = table.build_broadcast().iter().map(|o| o.recipient).collect();
        assert_eq!(recipients, vec![4]);
    }

    #[test]
    fn display_lists_every_entry() {
        let table = sample_table();
        let text = table.to_string();
        assert!(text.contains("1\t1\t0"));
        assert!(text.contains("2\t2\t7"));
        assert!(text.contains("3\t-\tinf"));
        assert!(text.contains("4\t4\t2"));
    }

    #[test]
    fn packet_counter_resets_on_take() {
        let mut table = sample_table();
        table.record_packet();
        table.record_packet();
        assert_eq!(table.take_packet_count(), 2);
        assert_eq!(table.take_packet_count(), 0);
    }
}
