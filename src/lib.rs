//! Distributed shared-variable core.
//!
//! See [`dsm`] for the protocol and its guarantees.

pub mod dsm;

pub use dsm::{
    spawn_node, ChannelEndpoint, ChannelNetwork, DsmConfig, DsmError, DsmNode, NodeHandle,
    PollOutcome, ProcessId, Result, RunnerConfig, Transport, UpdateHandler, VarState,
    UNINITIALIZED,
};
