//! Static membership table.
//!
//! Derived once from (rank, size); there is no dynamic join or leave.

use super::error::{DsmError, Result};

/// Identifier of a process in `[0, size)`.
pub type ProcessId = u32;

/// Maximum supported group size.
/// Bounded by the 64-bit [`SubscriptionSet`](super::subscription::SubscriptionSet).
pub const MAX_PROCESSES: u32 = 64;

/// This process's identity plus the ordered list of every other process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    rank: ProcessId,
    size: u32,
    peers: Vec<ProcessId>,
}

impl Membership {
    /// Build the table for `rank` in a group of `size` processes.
    pub fn new(rank: ProcessId, size: u32) -> Result<Self> {
        let invalid = |reason| DsmError::InvalidMembership { rank, size, reason };

        if size == 0 {
            return Err(invalid("group must contain at least one process"));
        }
        if size > MAX_PROCESSES {
            return Err(invalid("group exceeds MAX_PROCESSES"));
        }
        if rank >= size {
            return Err(invalid("rank must be less than size"));
        }

        let peers = (0..size).filter(|&id| id != rank).collect();

        Ok(Membership { rank, size, peers })
    }

    /// This process's id.
    pub fn rank(&self) -> ProcessId {
        self.rank
    }

    /// Total number of processes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Every process except this one, ascending.
    pub fn peers(&self) -> &[ProcessId] {
        &self.peers
    }

    /// Every process including this one, ascending.
    pub fn all(&self) -> impl Iterator<Item = ProcessId> {
        0..self.size
    }

    /// Whether `id` belongs to the group.
    pub fn contains(&self, id: ProcessId) -> bool {
        id < self.size
    }
}
