//! Routing update packet and its binary layout.
//!
//! All integers are big-endian:
//!
//! ```text
//! offset  size  field
//! 0       2     number of update fields (2 + 4*N)
//! 2       2     sender port
//! 4       4     sender IPv4 address
//! 8+12*i  4     advertisement[i] address
//! 12+12*i 2     advertisement[i] port
//! 14+12*i 2     advertisement[i] server id
//! 16+12*i 4     advertisement[i] cost (signed)
//! ```

use super::types::AdvertisedCost;
use crate::PeerId;
use crate::error::PacketError;
use std::net::Ipv4Addr;

pub const HEADER_SIZE: usize = 8;
pub const ADVERTISEMENT_SIZE: usize = 12;

/// Largest advertisement count whose field count still fits in a `u16`.
pub const MAX_ADVERTISEMENTS: usize = (u16::MAX as usize - 2) / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub address: Ipv4Addr,
    pub port: u16,
    pub id: PeerId,
    pub cost: AdvertisedCost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePacket {
    pub sender_port: u16,
    pub sender_address: Ipv4Addr,
    pub advertisements: Vec<Advertisement>,
}

impl UpdatePacket {
    pub fn number_of_update_fields(&self) -> usize {
        2 + 4 * self.advertisements.len()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + ADVERTISEMENT_SIZE * self.advertisements.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.advertisements.len() > MAX_ADVERTISEMENTS {
            return Err(PacketError::TooManyAdvertisements(self.advertisements.len()));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&(self.number_of_update_fields() as u16).to_be_bytes());
        buf.extend_from_slice(&self.sender_port.to_be_bytes());
        buf.extend_from_slice(&u32::from(self.sender_address).to_be_bytes());

        for adv in &self.advertisements {
            buf.extend_from_slice(&u32::from(adv.address).to_be_bytes());
            buf.extend_from_slice(&adv.port.to_be_bytes());
            buf.extend_from_slice(&adv.id.to_be_bytes());
            buf.extend_from_slice(&adv.cost.to_wire().to_be_bytes());
        }

        Ok(buf)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, PacketError> {
        if raw.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                min: HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let fields = read_u16(raw, 0);
        if fields < 2 || (fields - 2) % 4 != 0 {
            return Err(PacketError::InvalidFieldCount(fields));
        }

        let count = (fields as usize - 2) / 4;
        let expected = HEADER_SIZE + ADVERTISEMENT_SIZE * count;
        if raw.len() != expected {
            return Err(PacketError::SizeMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let sender_port = read_u16(raw, 2);
        let sender_address = Ipv4Addr::from(read_u32(raw, 4));

        let mut advertisements = Vec::with_capacity(count);
        for record in raw[HEADER_SIZE..].chunks_exact(ADVERTISEMENT_SIZE) {
            let id = read_u16(record, 6);
            let wire_cost = read_u32(record, 8) as i32;
            let cost = AdvertisedCost::from_wire(wire_cost)
                .ok_or(PacketError::InvalidCost { id, cost: wire_cost })?;

            advertisements.push(Advertisement {
                address: Ipv4Addr::from(read_u32(record, 0)),
                port: read_u16(record, 4),
                id,
                cost,
            });
        }

        Ok(Self {
            sender_port,
            sender_address,
            advertisements,
        })
    }

    /// The sender is the advertised server whose endpoint matches the header.
    pub fn sender_id(&self) -> Option<PeerId> {
        self.advertisements
            .iter()
            .find(|adv| adv.address == self.sender_address && adv.port == self.sender_port)
            .map(|adv| adv.id)
    }

    pub fn advertisement_for(&self, id: PeerId) -> Option<&Advertisement> {
        self.advertisements.iter().find(|adv| adv.id == id)
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
