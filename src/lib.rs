pub mod command;
pub mod config;
pub mod control_server;
pub mod error;
pub mod protocol;
pub mod topology;

use std::sync::Arc;
use tokio::sync::Mutex;

/// Server id as carried on the wire.
pub type PeerId = u16;

pub type SharedRoutingTable = Arc<Mutex<protocol::RoutingTable>>;
