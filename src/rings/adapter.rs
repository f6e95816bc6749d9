//! Adapter descriptor: how many rings and descriptors an owner needs

use serde::{Deserialize, Serialize};

use crate::{
    config::RESERVED_BUFFERS,
    error::{MemError, Result},
};

use super::layout::OWNER_NAME_LEN;

/// Traffic direction of a ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    /// Both directions, in header offset-table order
    pub const ALL: [Direction; 2] = [Direction::Tx, Direction::Rx];

    /// Encoding used in ring headers
    pub fn code(self) -> u8 {
        match self {
            Direction::Tx => 0,
            Direction::Rx => 1,
        }
    }

    /// Decode a ring header direction
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Direction::Tx),
            1 => Some(Direction::Rx),
            _ => None,
        }
    }
}

/// Ring and descriptor counts an adapter asks for.
///
/// Each direction gets `rings(dir)` real rings plus one synthetic ring for
/// host-originated or host-terminated traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Owner name, published in the descriptor header (truncated to 15 bytes)
    pub name: String,
    /// Transmit rings, synthetic ring excluded
    pub tx_rings: u32,
    /// Receive rings, synthetic ring excluded
    pub rx_rings: u32,
    /// Slots per transmit ring
    pub tx_descs: u32,
    /// Slots per receive ring
    pub rx_descs: u32,
    /// Spare buffers chained outside any ring
    pub extra_bufs: u32,
    /// Whether synthetic rings carry real traffic and need their own buffers
    pub host_rings_active: bool,
}

impl AdapterDescriptor {
    /// One tx and one rx ring of 512 slots, no extra buffers
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tx_rings: 1,
            rx_rings: 1,
            tx_descs: 512,
            rx_descs: 512,
            extra_bufs: 0,
            host_rings_active: false,
        }
    }

    /// Set the ring count for a direction
    pub fn with_rings(mut self, direction: Direction, count: u32) -> Self {
        match direction {
            Direction::Tx => self.tx_rings = count,
            Direction::Rx => self.rx_rings = count,
        }
        self
    }

    /// Set the slot count for a direction
    pub fn with_descs(mut self, direction: Direction, count: u32) -> Self {
        match direction {
            Direction::Tx => self.tx_descs = count,
            Direction::Rx => self.rx_descs = count,
        }
        self
    }

    /// Set the number of extra buffers
    pub fn with_extra_bufs(mut self, count: u32) -> Self {
        self.extra_bufs = count;
        self
    }

    /// Give synthetic rings real buffers
    pub fn with_host_rings(mut self, active: bool) -> Self {
        self.host_rings_active = active;
        self
    }

    /// Real rings in a direction
    pub fn rings(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Tx => self.tx_rings,
            Direction::Rx => self.rx_rings,
        }
    }

    /// Slots per ring in a direction
    pub fn descs(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Tx => self.tx_descs,
            Direction::Rx => self.rx_descs,
        }
    }

    /// All rings including one synthetic ring per direction
    pub fn total_rings(&self) -> usize {
        Direction::ALL
            .iter()
            .map(|&d| self.rings(d) as usize + 1)
            .sum()
    }

    /// Largest slot count over both directions
    pub fn max_descs(&self) -> u32 {
        self.tx_descs.max(self.rx_descs)
    }

    /// Buffers a full attachment consumes, reserved sentinels included
    pub fn buffers_needed(&self) -> usize {
        let rings: usize = Direction::ALL
            .iter()
            .map(|&d| {
                let real = self.rings(d) as usize + usize::from(self.host_rings_active);
                real * self.descs(d) as usize
            })
            .sum();
        rings + RESERVED_BUFFERS + self.extra_bufs as usize
    }

    /// Validate the descriptor
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MemError::invalid_argument("name", "Adapter name cannot be empty"));
        }
        if self.name.len() >= OWNER_NAME_LEN {
            log::debug!("adapter name {:?} will be truncated in the header", self.name);
        }
        if self.tx_descs == 0 || self.rx_descs == 0 {
            return Err(MemError::invalid_argument(
                "descs",
                "Rings need at least one slot",
            ));
        }
        Ok(())
    }
}
