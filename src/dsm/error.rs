//! Error types for the shared-variable core.

use thiserror::Error;

use super::membership::ProcessId;

/// Failures reported by a [`Transport`](super::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link to `peer` is down; nothing was sent.
    #[error("link to process {peer} is disconnected")]
    Disconnected { peer: ProcessId },

    /// `peer` is not a member of this network.
    #[error("unknown destination process {peer}")]
    UnknownPeer { peer: ProcessId },

    /// Every sender feeding this inbox has gone away.
    #[error("inbox closed: no live senders remain")]
    Closed,
}

/// Errors surfaced by [`DsmNode`](super::node::DsmNode) operations.
#[derive(Error, Debug)]
pub enum DsmError {
    /// Rank/size pair cannot describe a valid process group.
    #[error("invalid membership: rank {rank}, size {size} ({reason})")]
    InvalidMembership {
        rank: ProcessId,
        size: u32,
        reason: &'static str,
    },

    /// A value update arrived before any handler was registered.
    #[error("update for '{name}' received before an update handler was set")]
    HandlerNotSet { name: String },

    /// An inbound payload could not be parsed. Fatal: later frames cannot be trusted.
    #[error("protocol violation from process {from}: {reason}")]
    ProtocolViolation { from: ProcessId, reason: String },

    /// Fan-out reached some peers but not all of them.
    #[error("propagation of '{name}' failed for processes {failed:?}")]
    Propagation {
        name: String,
        failed: Vec<ProcessId>,
    },

    /// A message could not be encoded for the wire.
    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),

    /// Underlying channel failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The threaded runner did not answer in time or has stopped.
    #[error("node runner unavailable: {0}")]
    RunnerUnavailable(String),
}

impl DsmError {
    /// Whether the intake loop must stop after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DsmError::ProtocolViolation { .. }
                | DsmError::HandlerNotSet { .. }
                | DsmError::Transport(TransportError::Closed)
        )
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, DsmError>;
