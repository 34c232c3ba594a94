//! Error types for the distance-vector node.
//!
//! Each enum maps to one failure class: bad topology input at startup,
//! undecodable packets on the wire, rejected operator commands, and the
//! node-level wrapper that adds transport failures and the crashed state.

use crate::PeerId;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Malformed or inconsistent topology / configuration input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Topology file expected a numeric value, got {0:?}")]
    NotNumeric(String),

    #[error("Topology file does not have enough lines")]
    MissingLines,

    #[error("More lines in topology file than expected")]
    TrailingLines,

    #[error("Line {line}: expected {expected} fields, got {actual}")]
    FieldCount {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    #[error("Duplicate server id {0} in topology file")]
    DuplicateId(PeerId),

    #[error("Duplicate endpoint {0} in topology file")]
    DuplicateEndpoint(String),

    #[error("Neighbor lines disagree on the local server id ({first} vs {other})")]
    InconsistentLocalId { first: PeerId, other: PeerId },

    #[error("Server id {0} is not listed in the topology file")]
    UnknownId(PeerId),

    #[error("Server {0} cannot be its own neighbor")]
    SelfNeighbor(PeerId),

    #[error("Duplicate neighbor line for server {0}")]
    DuplicateNeighbor(PeerId),

    #[error("Invalid link cost {0}")]
    InvalidCost(i64),

    #[error("Could not determine the local server id")]
    UnresolvedLocalId,

    #[error("Local address matches {0} servers in the topology file")]
    AmbiguousLocalAddress(usize),

    #[error("Server {id} is not at local address {address}")]
    LocalAddressMismatch { id: PeerId, address: Ipv4Addr },

    #[error("Update interval must be greater than zero")]
    ZeroInterval,
}

/// An update packet that cannot be encoded, decoded, or attributed to a neighbor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: need at least {min} bytes, got {actual}")]
    TooShort { min: usize, actual: usize },

    #[error("Invalid number of update fields: {0}")]
    InvalidFieldCount(u16),

    #[error("Packet size mismatch: header announces {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Invalid advertised cost {cost} for server {id}")]
    InvalidCost { id: PeerId, cost: i32 },

    #[error("Too many advertisements to encode: {0}")]
    TooManyAdvertisements(usize),

    #[error("Unknown sender {address}:{port}")]
    UnknownSender { address: Ipv4Addr, port: u16 },

    #[error("Sender {0} is not a configured neighbor")]
    NotNeighbor(PeerId),

    #[error("Link to sender {0} is disabled")]
    LinkDisabled(PeerId),
}

/// A command that was rejected without touching the routing table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid argument {0:?}")]
    InvalidArgument(String),

    #[error("Server id {given} does not match this server ({local})")]
    NotLocal { given: PeerId, local: PeerId },

    #[error("Server {0} is not a neighbor")]
    NotNeighbor(PeerId),

    #[error("Link to server {0} is already disabled")]
    AlreadyDisabled(PeerId),
}

/// Top-level error returned by node operations.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] PacketError),

    #[error("{0}")]
    Operator(#[from] OperatorError),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Server has already crashed")]
    AlreadyCrashed,
}

pub type Result<T> = std::result::Result<T, NodeError>;
