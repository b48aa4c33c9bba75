//! Subscription registry.
//!
//! Tracks, per variable, which processes are believed to want its updates.
//!
//! # Full-mesh default
//!
//! Registering local interest in a variable marks EVERY member of the group as
//! a subscriber, not only processes that have announced interest. Writes
//! therefore fan out to the whole group. Selective fan-out would be a protocol
//! change, not a fix.
//!
//! Sets only grow: there is no unsubscribe.

use std::collections::HashMap;
use std::fmt;

use super::membership::{Membership, ProcessId, MAX_PROCESSES};

/// Compact set of process ids.
///
/// Bit N is set if process N is a subscriber.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionSet(u64);

impl SubscriptionSet {
    #[inline]
    pub fn new() -> Self {
        SubscriptionSet(0)
    }

    #[inline]
    pub fn insert(&mut self, id: ProcessId) {
        debug_assert!(id < MAX_PROCESSES, "process id exceeds MAX_PROCESSES");
        self.0 |= 1u64 << id;
    }

    #[inline]
    pub fn contains(&self, id: ProcessId) -> bool {
        id < MAX_PROCESSES && (self.0 & (1u64 << id)) != 0
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ProcessId> + '_ {
        let bits = self.0;
        (0..MAX_PROCESSES).filter(move |&id| bits & (1u64 << id) != 0)
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<ProcessId> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = ProcessId>>(iter: I) -> Self {
        let mut set = SubscriptionSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Variable name to subscriber set, owned by one process.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    membership: Membership,
    subscribers: HashMap<String, SubscriptionSet>,
}

impl SubscriptionRegistry {
    pub fn new(membership: Membership) -> Self {
        SubscriptionRegistry {
            membership,
            subscribers: HashMap::new(),
        }
    }

    /// Mark this process and every peer as subscribed to `name`.
    ///
    /// Idempotent.
    pub fn register_local_interest(&mut self, name: &str) {
        let set = self
            .subscribers
            .entry(name.to_string())
            .or_insert_with(SubscriptionSet::new);

        set.insert(self.membership.rank());
        for &peer in self.membership.peers() {
            set.insert(peer);
        }
    }

    /// Current subscribers of `name`; empty if never registered.
    pub fn subscribers_of(&self, name: &str) -> SubscriptionSet {
        self.subscribers.get(name).copied().unwrap_or_default()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.subscribers.contains_key(name)
    }

    /// Number of variables with a subscriber set.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
