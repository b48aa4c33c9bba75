//! Node and runner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behaviour switches for a [`DsmNode`](super::node::DsmNode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DsmConfig {
    /// Log every known variable name at debug level on compare-and-exchange.
    pub log_cas_snapshot: bool,
}

impl Default for DsmConfig {
    fn default() -> Self {
        DsmConfig {
            log_cas_snapshot: false,
        }
    }
}

/// Settings for the threaded intake loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How long one intake wait may block before the loop checks for commands.
    pub poll_interval: Duration,
    /// How long a [`NodeHandle`](super::runner::NodeHandle) waits for a reply.
    pub command_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            poll_interval: Duration::from_millis(5),
            command_timeout: Duration::from_secs(5),
        }
    }
}
