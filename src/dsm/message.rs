//! Wire messages.
//!
//! Every message travels as one [`Envelope`]: a numeric kind tag plus a byte
//! payload whose length is carried by the channel itself.
//!
//! | Kind          | Tag | Payload |
//! |---------------|-----|---------|
//! | `Subscribe`   | 100 | variable name, raw UTF-8 |
//! | `ValueWrite`  | 101 | `u64` LE name length, name bytes, `i32` LE value |
//!
//! A value update is a single record, so it cannot be split or interleaved
//! with traffic from another source.

use bincode::Options;
use serde::{Deserialize, Serialize};

use super::error::{DsmError, Result};
use super::membership::ProcessId;

/// Tag of a subscription announcement.
pub const SUBSCRIBE: u16 = 100;

/// Tag of a value update.
pub const VALUE_WRITE: u16 = 101;

/// Message kind as seen on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTag {
    Subscribe,
    ValueWrite,
    /// Any tag this version does not understand.
    Other(u16),
}

impl MessageTag {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            SUBSCRIBE => MessageTag::Subscribe,
            VALUE_WRITE => MessageTag::ValueWrite,
            other => MessageTag::Other(other),
        }
    }

    pub fn as_raw(&self) -> u16 {
        match self {
            MessageTag::Subscribe => SUBSCRIBE,
            MessageTag::ValueWrite => VALUE_WRITE,
            MessageTag::Other(raw) => *raw,
        }
    }
}

/// One framed message on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: MessageTag,
    pub payload: Vec<u8>,
}

/// Protocol messages understood by this version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DsmMessage {
    /// The sender is interested in `name`.
    Subscribe { name: String },
    /// `name` now holds `value` at the sender.
    ValueWrite { name: String, value: i32 },
}

/// Result of decoding an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(DsmMessage),
    /// Unknown kind; the payload has been drained and should be discarded.
    Unrecognized(u16),
}

#[derive(Serialize)]
struct ValueWriteRef<'a> {
    name: &'a str,
    value: i32,
}

#[derive(Deserialize)]
struct ValueWriteRecord {
    name: String,
    value: i32,
}

/// Fixed-width, little-endian, no trailing bytes.
///
/// Names are unbounded on the way out. Decoding is capped at the frame length
/// so a corrupt length prefix is rejected before anything is allocated.
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

impl DsmMessage {
    /// Variable the message refers to.
    pub fn name(&self) -> &str {
        match self {
            DsmMessage::Subscribe { name } => name,
            DsmMessage::ValueWrite { name, .. } => name,
        }
    }

    pub fn tag(&self) -> MessageTag {
        match self {
            DsmMessage::Subscribe { .. } => MessageTag::Subscribe,
            DsmMessage::ValueWrite { .. } => MessageTag::ValueWrite,
        }
    }

    /// Frame the message for the channel.
    pub fn encode(&self) -> Result<Envelope> {
        let payload = match self {
            DsmMessage::Subscribe { name } => name.as_bytes().to_vec(),
            DsmMessage::ValueWrite { name, value } => wire_options().serialize(&ValueWriteRef {
                name,
                value: *value,
            })?,
        };

        Ok(Envelope {
            tag: self.tag(),
            payload,
        })
    }
}

impl Envelope {
    /// Parse the payload according to the tag.
    ///
    /// `from` is only used to attribute a protocol violation.
    pub fn decode(&self, from: ProcessId) -> Result<Decoded> {
        match self.tag {
            MessageTag::Subscribe => {
                let name = std::str::from_utf8(&self.payload).map_err(|e| {
                    DsmError::ProtocolViolation {
                        from,
                        reason: format!("subscribe name is not UTF-8: {}", e),
                    }
                })?;
                Ok(Decoded::Message(DsmMessage::Subscribe {
                    name: name.to_string(),
                }))
            }
            MessageTag::ValueWrite => {
                let record: ValueWriteRecord = wire_options()
                    .with_limit(self.payload.len() as u64)
                    .deserialize(&self.payload)
                    .map_err(|e| DsmError::ProtocolViolation {
                        from,
                        reason: format!(
                            "malformed value write ({} bytes): {}",
                            self.payload.len(),
                            e
                        ),
                    })?;
                Ok(Decoded::Message(DsmMessage::ValueWrite {
                    name: record.name,
                    value: record.value,
                }))
            }
            MessageTag::Other(raw) => Ok(Decoded::Unrecognized(raw)),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
