//! Point-to-point transport.
//!
//! [`Transport`] is the seam between the protocol and whatever carries bytes
//! between processes. It must deliver reliably and preserve per-pair order.
//! [`ChannelNetwork`] is an in-process implementation on crossbeam channels,
//! one unbounded inbox per process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::error::TransportError;
use super::membership::ProcessId;
use super::message::{Envelope, MessageTag};

/// Reliable, ordered, any-to-any message channel for one process.
pub trait Transport {
    /// This process's id.
    fn rank(&self) -> ProcessId;

    /// Number of processes reachable through this transport (including self).
    fn size(&self) -> u32;

    /// Hand `envelope` to the channel for `dest`. Does not wait for processing.
    fn send(&self, dest: ProcessId, envelope: Envelope) -> Result<(), TransportError>;

    /// Block until a message arrives from any source.
    fn recv(&self) -> Result<(ProcessId, Envelope), TransportError>;

    /// Block for at most `timeout`. `Ok(None)` on timeout.
    fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(ProcessId, Envelope)>, TransportError>;

    /// Non-blocking probe. `Ok(None)` if the inbox is empty.
    fn try_recv(&self) -> Result<Option<(ProcessId, Envelope)>, TransportError>;
}

type Inbox = (ProcessId, Envelope);

/// Per-kind send counters.
#[derive(Debug, Default)]
pub struct SendCounters {
    subscribe: AtomicU64,
    value_write: AtomicU64,
    other: AtomicU64,
}

impl SendCounters {
    fn record(&self, tag: MessageTag) {
        let counter = match tag {
            MessageTag::Subscribe => &self.subscribe,
            MessageTag::ValueWrite => &self.value_write,
            MessageTag::Other(_) => &self.other,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Envelopes of kind `tag` successfully handed to the channel.
    pub fn sent(&self, tag: MessageTag) -> u64 {
        match tag {
            MessageTag::Subscribe => self.subscribe.load(Ordering::SeqCst),
            MessageTag::ValueWrite => self.value_write.load(Ordering::SeqCst),
            MessageTag::Other(_) => self.other.load(Ordering::SeqCst),
        }
    }
}

/// Outbound half of a link to one peer.
struct PeerLink {
    tx: Sender<Inbox>,
    up: Arc<AtomicBool>,
}

/// A network endpoint for a single process.
pub struct ChannelEndpoint {
    rank: ProcessId,
    size: u32,
    inbox: Receiver<Inbox>,
    /// Own inbox sender. The inbox stays open after every peer and the
    /// network are gone, so an idle endpoint reads as empty, never closed.
    _inbox_tx: Sender<Inbox>,
    peers: HashMap<ProcessId, PeerLink>,
    sent: Arc<SendCounters>,
}

impl ChannelEndpoint {
    /// Envelopes of kind `tag` successfully handed to the channel.
    pub fn sent_count(&self, tag: MessageTag) -> u64 {
        self.sent.sent(tag)
    }

    /// Shared view of the send counters, readable after the endpoint moves to another thread.
    pub fn counters(&self) -> Arc<SendCounters> {
        Arc::clone(&self.sent)
    }
}

impl Transport for ChannelEndpoint {
    fn rank(&self) -> ProcessId {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn send(&self, dest: ProcessId, envelope: Envelope) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get(&dest)
            .ok_or(TransportError::UnknownPeer { peer: dest })?;

        if !peer.up.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected { peer: dest });
        }

        let tag = envelope.tag;
        peer.tx
            .send((self.rank, envelope))
            .map_err(|_| TransportError::Disconnected { peer: dest })?;
        self.sent.record(tag);
        Ok(())
    }

    fn recv(&self) -> Result<(ProcessId, Envelope), TransportError> {
        self.inbox.recv().map_err(|_| TransportError::Closed)
    }

    fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(ProcessId, Envelope)>, TransportError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn try_recv(&self) -> Result<Option<(ProcessId, Envelope)>, TransportError> {
        match self.inbox.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

/// Inbox of one process while the network still owns it.
struct Mailbox {
    tx: Sender<Inbox>,
    /// Taken when the endpoint is handed out.
    rx: Option<Receiver<Inbox>>,
}

/// In-process network connecting `size` endpoints.
///
/// The network only wires endpoints together and holds the link flags used by
/// [`disconnect`](Self::disconnect). Endpoints keep working after it is dropped.
pub struct ChannelNetwork {
    mailboxes: Vec<Mailbox>,
    /// One flag per directed link, row-major by (from, to).
    links: Vec<Arc<AtomicBool>>,
}

impl ChannelNetwork {
    pub fn new(size: u32) -> Self {
        let mailboxes = (0..size)
            .map(|_| {
                let (tx, rx) = unbounded();
                Mailbox { tx, rx: Some(rx) }
            })
            .collect();
        let links = (0..size as usize * size as usize)
            .map(|_| Arc::new(AtomicBool::new(true)))
            .collect();

        ChannelNetwork { mailboxes, links }
    }

    pub fn size(&self) -> u32 {
        self.mailboxes.len() as u32
    }

    /// Create the endpoint for `id`.
    ///
    /// Consumes that process's inbox, so returns `None` on a second call.
    pub fn create_endpoint(&mut self, id: ProcessId) -> Option<ChannelEndpoint> {
        let own = self.mailboxes.get_mut(id as usize)?;
        let inbox = own.rx.take()?;
        let inbox_tx = own.tx.clone();

        let peers = (0..self.size())
            .filter(|&peer| peer != id)
            .filter_map(|peer| {
                let link = self.link(id, peer)?;
                Some((
                    peer,
                    PeerLink {
                        tx: self.mailboxes[peer as usize].tx.clone(),
                        up: Arc::clone(link),
                    },
                ))
            })
            .collect();

        Some(ChannelEndpoint {
            rank: id,
            size: self.size(),
            inbox,
            _inbox_tx: inbox_tx,
            peers,
            sent: Arc::new(SendCounters::default()),
        })
    }

    /// Create every endpoint still available, ordered by id.
    pub fn endpoints(&mut self) -> Vec<ChannelEndpoint> {
        (0..self.size())
            .filter_map(|id| self.create_endpoint(id))
            .collect()
    }

    /// Cut every link to and from `id`. Sends over a cut link fail.
    pub fn disconnect(&self, id: ProcessId) {
        self.set_links(id, false);
    }

    pub fn reconnect(&self, id: ProcessId) {
        self.set_links(id, true);
    }

    /// Whether `from` can currently send to `to`. A process has no link to itself.
    pub fn is_connected(&self, from: ProcessId, to: ProcessId) -> bool {
        from != to
            && self
                .link(from, to)
                .map(|up| up.load(Ordering::SeqCst))
                .unwrap_or(false)
    }

    fn link(&self, from: ProcessId, to: ProcessId) -> Option<&Arc<AtomicBool>> {
        let size = self.size();
        if from >= size || to >= size {
            return None;
        }
        self.links.get(from as usize * size as usize + to as usize)
    }

    fn set_links(&self, id: ProcessId, up: bool) {
        for other in (0..self.size()).filter(|&other| other != id) {
            for (from, to) in [(id, other), (other, id)] {
                if let Some(flag) = self.link(from, to) {
                    flag.store(up, Ordering::SeqCst);
                }
            }
        }
    }
}
