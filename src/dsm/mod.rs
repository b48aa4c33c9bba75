//! Distributed shared variables.
//!
//! Each process keeps a partial replica of a set of named integer variables
//! and stays loosely synchronized with its peers over point-to-point messages:
//! - `subscribe` joins the replica set for a variable and announces it
//! - `write` updates the local replica, then fans the value out to subscribers
//! - `compare_and_exchange` checks the local replica and writes on a match
//! - the intake loop applies inbound messages and notifies an update handler
//!
//! # Invariants
//!
//! 1. **Local-first writes**: a write is visible locally before any message is sent.
//! 2. **Monotone subscriptions**: subscriber sets only grow.
//! 3. **No echo**: absorbing a remote Subscribe never emits a Subscribe.
//! 4. **Single owner**: a node's store and registry are touched only by the thread owning it.
//!
//! Updates are not linearizable or causally ordered across processes, and
//! compare-and-exchange is optimistic: concurrent writers can lose updates.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod membership;
pub mod message;
pub mod node;
pub mod runner;
pub mod store;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::{DsmConfig, RunnerConfig};
pub use dispatch::{Dispatcher, UpdateHandler};
pub use error::{DsmError, Result, TransportError};
pub use membership::{Membership, ProcessId, MAX_PROCESSES};
pub use message::{Decoded, DsmMessage, Envelope, MessageTag, SUBSCRIBE, VALUE_WRITE};
pub use node::{DsmNode, NodeStats, PollOutcome};
pub use runner::{spawn_node, NodeCommand, NodeHandle};
pub use store::{VarState, VariableStore, UNINITIALIZED};
pub use subscription::{SubscriptionRegistry, SubscriptionSet};
pub use transport::{ChannelEndpoint, ChannelNetwork, SendCounters, Transport};
