//! Threaded node runner.
//!
//! Moves a [`DsmNode`] onto its own thread so the intake loop runs beside
//! application code. The node never leaves that thread: the application talks
//! to it through a command channel, which serializes all access to the store
//! and registry without sharing locks. [`NodeHandle::stop`] ends the loop
//! deterministically.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use super::config::RunnerConfig;
use super::error::{DsmError, Result, TransportError};
use super::membership::ProcessId;
use super::node::{DsmNode, NodeStats};
use super::store::VarState;
use super::transport::Transport;

/// Commands that can be sent to a node thread.
#[derive(Debug)]
pub enum NodeCommand {
    Subscribe {
        name: String,
        broadcast: bool,
        reply: Sender<Result<()>>,
    },
    Write {
        name: String,
        value: i32,
        reply: Sender<Result<()>>,
    },
    CompareAndExchange {
        name: String,
        expected: i32,
        new_value: i32,
        reply: Sender<Result<bool>>,
    },
    Get {
        name: String,
        reply: Sender<VarState>,
    },
    Stats(Sender<NodeStats>),
    /// Stop the node thread.
    Stop,
}

/// Handle to a running node thread.
pub struct NodeHandle {
    rank: ProcessId,
    command_tx: Sender<NodeCommand>,
    thread_handle: Option<JoinHandle<Result<NodeStats>>>,
    config: RunnerConfig,
}

/// Start `node`'s intake loop on a dedicated thread.
pub fn spawn_node<T>(node: DsmNode<T>, config: RunnerConfig) -> Result<NodeHandle>
where
    T: Transport + Send + 'static,
{
    let rank = node.rank();
    let (command_tx, command_rx) = unbounded();
    let loop_config = config.clone();

    let thread_handle = thread::Builder::new()
        .name(format!("dsm-node-{}", rank))
        .spawn(move || run(node, command_rx, loop_config))
        .map_err(|e| DsmError::RunnerUnavailable(format!("failed to spawn node {}: {}", rank, e)))?;

    Ok(NodeHandle {
        rank,
        command_tx,
        thread_handle: Some(thread_handle),
        config,
    })
}

impl NodeHandle {
    pub fn rank(&self) -> ProcessId {
        self.rank
    }

    pub fn subscribe(&self, name: &str) -> Result<()> {
        self.subscribe_with(name, true)
    }

    pub fn subscribe_with(&self, name: &str, broadcast: bool) -> Result<()> {
        self.request(|reply| NodeCommand::Subscribe {
            name: name.to_string(),
            broadcast,
            reply,
        })?
    }

    pub fn write(&self, name: &str, value: i32) -> Result<()> {
        self.request(|reply| NodeCommand::Write {
            name: name.to_string(),
            value,
            reply,
        })?
    }

    pub fn compare_and_exchange(&self, name: &str, expected: i32, new_value: i32) -> Result<bool> {
        self.request(|reply| NodeCommand::CompareAndExchange {
            name: name.to_string(),
            expected,
            new_value,
            reply,
        })?
    }

    pub fn get(&self, name: &str) -> Result<VarState> {
        self.request(|reply| NodeCommand::Get {
            name: name.to_string(),
            reply,
        })
    }

    pub fn stats(&self) -> Result<NodeStats> {
        self.request(NodeCommand::Stats)
    }

    /// Stop the loop and wait for the thread.
    ///
    /// Returns the final counters, or the fatal error that ended the loop early.
    pub fn stop(&mut self) -> Result<NodeStats> {
        let _ = self.command_tx.send(NodeCommand::Stop);

        let handle = self
            .thread_handle
            .take()
            .ok_or_else(|| DsmError::RunnerUnavailable(format!("node {} already stopped", self.rank)))?;

        handle
            .join()
            .map_err(|_| DsmError::RunnerUnavailable(format!("node {} panicked", self.rank)))?
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn request<R>(&self, build: impl FnOnce(Sender<R>) -> NodeCommand) -> Result<R> {
        let (reply_tx, reply_rx) = bounded(1);

        self.command_tx
            .send(build(reply_tx))
            .map_err(|_| DsmError::RunnerUnavailable(format!("node {} has stopped", self.rank)))?;

        reply_rx.recv_timeout(self.config.command_timeout).map_err(|_| {
            DsmError::RunnerUnavailable(format!(
                "node {} did not reply within {:?}",
                self.rank, self.config.command_timeout
            ))
        })
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            if let Err(e) = self.stop() {
                warn!(rank = self.rank, error = %e, "node stopped with error");
            }
        }
    }
}

fn run<T: Transport>(
    mut node: DsmNode<T>,
    commands: Receiver<NodeCommand>,
    config: RunnerConfig,
) -> Result<NodeStats> {
    info!(rank = node.rank(), "intake loop started");

    loop {
        // Commands first so a stop is never starved by inbound traffic.
        loop {
            match commands.try_recv() {
                Ok(NodeCommand::Stop) | Err(TryRecvError::Disconnected) => {
                    info!(rank = node.rank(), "intake loop stopped");
                    return Ok(node.stats().clone());
                }
                Ok(cmd) => apply_command(&mut node, cmd),
                Err(TryRecvError::Empty) => break,
            }
        }

        match node.poll_timeout(config.poll_interval) {
            Ok(Some(outcome)) => debug!(rank = node.rank(), ?outcome, "intake"),
            Ok(None) => {}
            Err(DsmError::Transport(TransportError::Closed)) => {
                info!(rank = node.rank(), "inbox closed, intake loop stopped");
                return Ok(node.stats().clone());
            }
            Err(e) if e.is_fatal() => {
                error!(rank = node.rank(), error = %e, "intake loop aborted");
                return Err(e);
            }
            Err(e) => warn!(rank = node.rank(), error = %e, "intake error"),
        }
    }
}

fn apply_command<T: Transport>(node: &mut DsmNode<T>, cmd: NodeCommand) {
    // A dropped reply receiver means the caller timed out; nothing to do.
    match cmd {
        NodeCommand::Subscribe {
            name,
            broadcast,
            reply,
        } => {
            let _ = reply.send(node.subscribe_with(&name, broadcast));
        }
        NodeCommand::Write { name, value, reply } => {
            let _ = reply.send(node.write(&name, value));
        }
        NodeCommand::CompareAndExchange {
            name,
            expected,
            new_value,
            reply,
        } => {
            let _ = reply.send(node.compare_and_exchange(&name, expected, new_value));
        }
        NodeCommand::Get { name, reply } => {
            let _ = reply.send(node.state(&name));
        }
        NodeCommand::Stats(reply) => {
            let _ = reply.send(node.stats().clone());
        }
        NodeCommand::Stop => {}
    }
}
