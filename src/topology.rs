//! Topology file loader.
//!
//! ```text
//! 4                 number of servers
//! 2                 number of neighbor lines
//! 1 10.0.0.1 4001   <id> <address> <port>, one per server
//! 2 10.0.0.2 4002
//! 3 10.0.0.3 4003
//! 4 10.0.0.4 4004
//! 1 2 7             <local id> <neighbor id> <cost>, one per neighbor
//! 1 4 2
//! ```
//!
//! Blank lines are ignored.

use crate::PeerId;
use crate::error::ConfigError;
use crate::protocol::{Cost, MAX_FINITE_COST, PeerEntry, RoutingTable};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLine {
    pub id: PeerId,
    pub address: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLine {
    pub local_id: PeerId,
    pub neighbor_id: PeerId,
    pub cost: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub servers: Vec<ServerLine>,
    pub links: Vec<LinkLine>,
}

impl Topology {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Topology file {} was not found", path))?;
        let topology = content
            .parse()
            .with_context(|| format!("Invalid topology file {}", path))?;
        Ok(topology)
    }

    /// Works out which server this process is.
    ///
    /// An explicit id wins but must agree with the neighbor lines; otherwise
    /// the neighbor lines decide; otherwise the local address must match
    /// exactly one server.
    pub fn local_id(
        &self,
        explicit: Option<PeerId>,
        local_address: Option<Ipv4Addr>,
    ) -> std::result::Result<PeerId, ConfigError> {
        let from_links = self.links.first().map(|link| link.local_id);

        let id = match (explicit, from_links) {
            (Some(id), Some(linked)) if id != linked => {
                return Err(ConfigError::InconsistentLocalId {
                    first: linked,
                    other: id,
                });
            }
            (Some(id), _) | (None, Some(id)) => id,
            (None, None) => {
                let address = local_address.ok_or(ConfigError::UnresolvedLocalId)?;
                let matches: Vec<_> = self.servers.iter().filter(|s| s.address == address).collect();
                match matches.as_slice() {
                    [server] => server.id,
                    [] => return Err(ConfigError::UnresolvedLocalId),
                    many => return Err(ConfigError::AmbiguousLocalAddress(many.len())),
                }
            }
        };

        let server = self
            .servers
            .iter()
            .find(|s| s.id == id)
            .ok_or(ConfigError::UnknownId(id))?;

        if let Some(address) = local_address {
            if server.address != address {
                return Err(ConfigError::LocalAddressMismatch { id, address });
            }
        }
        Ok(id)
    }

    /// Initial table as seen from `local_id`.
    pub fn build_table(&self, local_id: PeerId) -> std::result::Result<RoutingTable, ConfigError> {
        let mut table = RoutingTable::new(local_id);
        for server in &self.servers {
            table.insert_sorted(PeerEntry::new(server.id, server.address, server.port))?;
        }
        if table.self_entry().is_none() {
            return Err(ConfigError::UnknownId(local_id));
        }
        for link in &self.links {
            table.add_neighbor(link.neighbor_id, Cost::Finite(link.cost))?;
        }
        Ok(table)
    }
}

impl FromStr for Topology {
    type Err = ConfigError;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let mut next_line = || lines.next().ok_or(ConfigError::MissingLines);

        let (_, count) = next_line()?;
        let server_count: usize = parse_number(count)?;
        let (_, count) = next_line()?;
        let link_count: usize = parse_number(count)?;

        let mut servers = Vec::new();
        let mut ids = HashSet::new();
        let mut endpoints = HashSet::new();
        for _ in 0..server_count {
            let (line_no, line) = next_line()?;
            let [id, address, port] = fields(line_no, line)?;

            let id: PeerId = parse_number(id)?;
            let address: Ipv4Addr = address
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;
            let port: u16 = parse_number(port)?;

            if !ids.insert(id) {
                return Err(ConfigError::DuplicateId(id));
            }
            if !endpoints.insert((address, port)) {
                return Err(ConfigError::DuplicateEndpoint(format!("{}:{}", address, port)));
            }
            servers.push(ServerLine { id, address, port });
        }

        let mut links: Vec<LinkLine> = Vec::new();
        for _ in 0..link_count {
            let (line_no, line) = next_line()?;
            let [local, neighbor, cost] = fields(line_no, line)?;

            let local_id: PeerId = parse_number(local)?;
            let neighbor_id: PeerId = parse_number(neighbor)?;
            let cost: i64 = parse_number(cost)?;

            if let Some(first) = links.first() {
                if first.local_id != local_id {
                    return Err(ConfigError::InconsistentLocalId {
                        first: first.local_id,
                        other: local_id,
                    });
                }
            }
            for id in [local_id, neighbor_id] {
                if !ids.contains(&id) {
                    return Err(ConfigError::UnknownId(id));
                }
            }
            if local_id == neighbor_id {
                return Err(ConfigError::SelfNeighbor(local_id));
            }
            if links.iter().any(|link| link.neighbor_id == neighbor_id) {
                return Err(ConfigError::DuplicateNeighbor(neighbor_id));
            }
            if cost < 0 || cost > MAX_FINITE_COST as i64 {
                return Err(ConfigError::InvalidCost(cost));
            }

            links.push(LinkLine {
                local_id,
                neighbor_id,
                cost: cost as u32,
            });
        }

        drop(next_line);
        if lines.next().is_some() {
            return Err(ConfigError::TrailingLines);
        }

        Ok(Self { servers, links })
    }
}

fn parse_number<T: FromStr>(field: &str) -> std::result::Result<T, ConfigError> {
    field
        .parse()
        .map_err(|_| ConfigError::NotNumeric(field.to_string()))
}

fn fields(line_no: usize, line: &str) -> std::result::Result<[&str; 3], ConfigError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    <[&str; 3]>::try_from(parts.as_slice()).map_err(|_| ConfigError::FieldCount {
        line: line_no,
        expected: 3,
        actual: parts.len(),
    })
}
