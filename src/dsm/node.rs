//! Shared-variable node: the consistency engine and message intake.
//!
//! A [`DsmNode`] owns one process's replicas, its subscription registry, the
//! update handler and its transport endpoint. All state is mutated from the
//! thread that owns the node; other processes are only reached by messages.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::config::DsmConfig;
use super::dispatch::{Dispatcher, UpdateHandler};
use super::error::{DsmError, Result};
use super::membership::{Membership, ProcessId};
use super::message::{Decoded, DsmMessage, Envelope};
use super::store::{VarState, VariableStore};
use super::subscription::{SubscriptionRegistry, SubscriptionSet};
use super::transport::Transport;

/// What one intake step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// `from` announced interest in `name`; it is now registered locally.
    Subscribed { name: String, from: ProcessId },
    /// `name` was set to `value` by `from` and the handler has run.
    Updated {
        name: String,
        value: i32,
        from: ProcessId,
    },
    /// A message of unknown kind was drained and discarded.
    Unrecognized { tag: u16, from: ProcessId },
}

/// Per-node counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub local_writes: u64,
    pub cas_attempts: u64,
    pub cas_successes: u64,
    pub subscriptions_sent: u64,
    pub subscriptions_received: u64,
    pub updates_sent: u64,
    pub updates_received: u64,
    pub unrecognized: u64,
}

/// One process's view of the shared variables.
pub struct DsmNode<T: Transport> {
    membership: Membership,
    store: VariableStore,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    transport: T,
    config: DsmConfig,
    stats: NodeStats,
}

impl<T: Transport> DsmNode<T> {
    /// Create a node with no update handler.
    ///
    /// Call [`set_callback`](Self::set_callback) before polling; an update
    /// received without a handler is an error.
    pub fn new(transport: T) -> Result<Self> {
        Self::build(transport, Dispatcher::new(), DsmConfig::default())
    }

    /// Create a node with its update handler injected up front.
    pub fn with_handler<H: UpdateHandler + 'static>(transport: T, handler: H) -> Result<Self> {
        Self::build(transport, Dispatcher::with_handler(handler), DsmConfig::default())
    }

    pub fn with_config(transport: T, config: DsmConfig) -> Result<Self> {
        Self::build(transport, Dispatcher::new(), config)
    }

    fn build(transport: T, dispatcher: Dispatcher, config: DsmConfig) -> Result<Self> {
        let membership = Membership::new(transport.rank(), transport.size())?;
        info!(
            rank = membership.rank(),
            size = membership.size(),
            "shared-variable node created"
        );

        Ok(DsmNode {
            registry: SubscriptionRegistry::new(membership.clone()),
            membership,
            store: VariableStore::new(),
            dispatcher,
            transport,
            config,
            stats: NodeStats::default(),
        })
    }

    /// Install or replace the update handler.
    pub fn set_callback<H: UpdateHandler + 'static>(&mut self, handler: H) {
        self.dispatcher.set(handler);
    }

    pub fn has_callback(&self) -> bool {
        self.dispatcher.is_set()
    }

    // =========================================================================
    // SUBSCRIBE
    // =========================================================================

    /// Join the replica set for `name` and announce it to every peer.
    pub fn subscribe(&mut self, name: &str) -> Result<()> {
        self.subscribe_with(name, true)
    }

    /// Join the replica set for `name`.
    ///
    /// The variable is created as uninitialized unless it already has a local
    /// state. With `broadcast`, a Subscribe message goes to every peer; remote
    /// announcements are absorbed with `broadcast = false` so they never echo.
    pub fn subscribe_with(&mut self, name: &str, broadcast: bool) -> Result<()> {
        self.registry.register_local_interest(name);
        self.store.ensure(name);

        debug!(
            rank = self.rank(),
            var = name,
            broadcast,
            "registered interest"
        );

        if broadcast {
            self.broadcast_subscription(name)?;
        }
        Ok(())
    }

    /// Send Subscribe(`name`) to every peer in the membership table.
    pub fn broadcast_subscription(&mut self, name: &str) -> Result<()> {
        let envelope = DsmMessage::Subscribe {
            name: name.to_string(),
        }
        .encode()?;
        let targets = self.membership.peers().to_vec();

        let sent = self.fan_out(name, &targets, &envelope)?;
        self.stats.subscriptions_sent += sent;
        Ok(())
    }

    // =========================================================================
    // WRITE / COMPARE-AND-EXCHANGE
    // =========================================================================

    /// Set `name` locally, then send the value to every other subscriber.
    ///
    /// The local replica is updated before any I/O and stays updated even if
    /// propagation fails. Returning does not mean peers have applied it.
    pub fn write(&mut self, name: &str, value: i32) -> Result<()> {
        let previous = self.store.state(name);
        self.store.set(name, value);
        self.stats.local_writes += 1;

        debug!(
            rank = self.rank(),
            var = name,
            ?previous,
            value,
            "local write"
        );

        let rank = self.rank();
        let targets: Vec<ProcessId> = self
            .registry
            .subscribers_of(name)
            .iter()
            .filter(|&id| id != rank)
            .collect();

        if targets.is_empty() {
            return Ok(());
        }

        let envelope = DsmMessage::ValueWrite {
            name: name.to_string(),
            value,
        }
        .encode()?;

        let sent = self.fan_out(name, &targets, &envelope)?;
        self.stats.updates_sent += sent;
        Ok(())
    }

    /// Optimistic compare-and-exchange against the LOCAL replica.
    ///
    /// If the local value equals `expected` (the uninitialized sentinel
    /// matches an unset variable), performs [`write`](Self::write) with
    /// `new_value` and returns `Ok(true)`. Otherwise returns `Ok(false)` and
    /// changes nothing.
    ///
    /// # Concurrency
    ///
    /// No peer is consulted. Two processes holding the same stale value can
    /// both succeed, and the later update to arrive wins at each replica (lost
    /// update). Callers needing mutual exclusion must serialize CAS attempts
    /// themselves or keep a single writer per variable.
    pub fn compare_and_exchange(&mut self, name: &str, expected: i32, new_value: i32) -> Result<bool> {
        self.stats.cas_attempts += 1;
        let observed = self.store.get(name);

        if self.config.log_cas_snapshot {
            debug!(
                rank = self.rank(),
                var = name,
                known = ?self.store.names(),
                "compare-and-exchange snapshot"
            );
        }

        if observed != expected {
            debug!(
                rank = self.rank(),
                var = name,
                observed,
                expected,
                "compare-and-exchange rejected"
            );
            return Ok(false);
        }

        self.write(name, new_value)?;
        self.stats.cas_successes += 1;
        Ok(true)
    }

    /// Send one envelope to each target, then report every failed target together.
    fn fan_out(&self, name: &str, targets: &[ProcessId], envelope: &Envelope) -> Result<u64> {
        let mut sent = 0;
        let mut failed = Vec::new();

        for &dest in targets {
            match self.transport.send(dest, envelope.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(rank = self.rank(), var = name, dest, error = %e, "send failed");
                    failed.push(dest);
                }
            }
        }

        if failed.is_empty() {
            Ok(sent)
        } else {
            Err(DsmError::Propagation {
                name: name.to_string(),
                failed,
            })
        }
    }

    // =========================================================================
    // INTAKE
    // =========================================================================

    /// Block until one message arrives, then process it.
    pub fn poll_once(&mut self) -> Result<PollOutcome> {
        let (from, envelope) = self.transport.recv()?;
        self.handle_envelope(from, envelope)
    }

    /// Like [`poll_once`](Self::poll_once) but gives up after `timeout`.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<PollOutcome>> {
        match self.transport.recv_timeout(timeout)? {
            Some((from, envelope)) => self.handle_envelope(from, envelope).map(Some),
            None => Ok(None),
        }
    }

    /// Process one message if one is already waiting.
    pub fn try_poll(&mut self) -> Result<Option<PollOutcome>> {
        match self.transport.try_recv()? {
            Some((from, envelope)) => self.handle_envelope(from, envelope).map(Some),
            None => Ok(None),
        }
    }

    /// Process every message already waiting. Returns how many were handled.
    pub fn drain(&mut self) -> Result<usize> {
        let mut handled = 0;
        while self.try_poll()?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    fn handle_envelope(&mut self, from: ProcessId, envelope: Envelope) -> Result<PollOutcome> {
        match envelope.decode(from)? {
            Decoded::Message(DsmMessage::Subscribe { name }) => {
                trace!(rank = self.rank(), from, var = %name, "subscribe received");
                self.subscribe_with(&name, false)?;
                self.stats.subscriptions_received += 1;
                Ok(PollOutcome::Subscribed { name, from })
            }
            Decoded::Message(DsmMessage::ValueWrite { name, value }) => {
                self.dispatcher.ensure_ready(&name)?;
                self.store.set(&name, value);
                self.stats.updates_received += 1;

                debug!(rank = self.rank(), from, var = %name, value, "remote update applied");

                let rank = self.rank();
                self.dispatcher.dispatch(&name, value, rank)?;
                Ok(PollOutcome::Updated { name, value, from })
            }
            Decoded::Unrecognized(tag) => {
                warn!(
                    rank = self.rank(),
                    from,
                    tag,
                    bytes = envelope.len(),
                    "unrecognized message kind discarded"
                );
                self.stats.unrecognized += 1;
                Ok(PollOutcome::Unrecognized { tag, from })
            }
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Local value of `name`, or the uninitialized sentinel.
    pub fn get(&self, name: &str) -> i32 {
        self.store.get(name)
    }

    pub fn state(&self, name: &str) -> VarState {
        self.store.state(name)
    }

    pub fn subscribers_of(&self, name: &str) -> SubscriptionSet {
        self.registry.subscribers_of(name)
    }

    /// Names with a local replica, sorted.
    pub fn variables(&self) -> Vec<String> {
        self.store.names()
    }

    pub fn rank(&self) -> ProcessId {
        self.membership.rank()
    }

    pub fn size(&self) -> u32 {
        self.membership.size()
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn config(&self) -> &DsmConfig {
        &self.config
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
