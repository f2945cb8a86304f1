//! Binary layout of y-sync v1 messages.
//!
//! Every message starts with a var-uint kind tag. `SYNC` messages carry a
//! second tag for the subkind, then a length-prefixed payload. The
//! transport-safe string form lives in [`super::codec`].

use yrs::encoding::read::{Cursor, Error as ReadError, Read};
use yrs::encoding::write::Write;

use crate::error::{ProviderError, Result};

pub mod message_type {
    pub const SYNC: u8 = 0;
    pub const PRESENCE: u8 = 1;
    /// Reserved; the remote may use it to deny access.
    pub const AUTH: u8 = 2;
    /// Reserved; asks a live peer for everyone's presence.
    pub const QUERY_PRESENCE: u8 = 3;
}

pub mod sync_type {
    pub const SYNC_STEP1: u8 = 0;
    pub const SYNC_STEP2: u8 = 1;
    pub const UPDATE: u8 = 2;
}

fn malformed(what: &'static str) -> impl FnOnce(ReadError) -> ProviderError {
    move |e| ProviderError::Decode(format!("Malformed {what}: {e}"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Sync(SyncMessage),
    /// Encoded awareness update.
    Presence(Vec<u8>),
    /// Access denied, with an optional reason.
    Auth(Option<String>),
    PresenceQuery,
    /// A kind this client does not know about, kept with its payload.
    Custom(u8, Vec<u8>),
}

impl Message {
    /// Decode one message from the start of `data`. Trailing bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_from(&mut Cursor::new(data))
    }

    /// Read one message from `reader`, leaving it positioned after it.
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let kind: u8 = reader.read_var().map_err(malformed("message kind"))?;
        let message = match kind {
            message_type::SYNC => Message::Sync(SyncMessage::decode_from(reader)?),
            message_type::PRESENCE => {
                let payload = reader.read_buf().map_err(malformed("presence payload"))?;
                Message::Presence(payload.to_vec())
            }
            message_type::AUTH => {
                let flag: u8 = reader.read_var().map_err(malformed("auth flag"))?;
                let reason = match flag {
                    0 => None,
                    _ => {
                        let bytes = reader.read_buf().map_err(malformed("auth reason"))?;
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                };
                Message::Auth(reason)
            }
            message_type::QUERY_PRESENCE => Message::PresenceQuery,
            // A payload is optional here, so a missing one is not an error.
            other => Message::Custom(
                other,
                reader.read_buf().map(<[u8]>::to_vec).unwrap_or_default(),
            ),
        };
        Ok(message)
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    /// Append the encoded message to `writer`.
    pub fn encode_to<W: Write>(&self, writer: &mut W) {
        match self {
            Message::Sync(sync) => {
                writer.write_var(message_type::SYNC);
                sync.encode_to(writer);
            }
            Message::Presence(payload) => {
                writer.write_var(message_type::PRESENCE);
                writer.write_buf(payload);
            }
            Message::Auth(None) => {
                writer.write_var(message_type::AUTH);
                writer.write_var(0u8);
            }
            Message::Auth(Some(reason)) => {
                writer.write_var(message_type::AUTH);
                writer.write_var(1u8);
                writer.write_buf(reason.as_bytes());
            }
            Message::PresenceQuery => writer.write_var(message_type::QUERY_PRESENCE),
            Message::Custom(kind, payload) => {
                writer.write_var(*kind);
                writer.write_buf(payload);
            }
        }
    }

    /// Wrap a document update.
    pub fn update(update: Vec<u8>) -> Self {
        Message::Sync(SyncMessage::Update(update))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// A state vector. Answering it needs a live peer, so the provider never
    /// sends one and skips it on receipt.
    SyncStep1(Vec<u8>),
    /// Everything the requester was missing.
    SyncStep2(Vec<u8>),
    Update(Vec<u8>),
}

impl SyncMessage {
    /// Read the subkind and payload that follow a `SYNC` kind tag.
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let subkind: u8 = reader.read_var().map_err(malformed("sync subkind"))?;
        let payload = reader.read_buf().map_err(malformed("sync payload"))?.to_vec();
        match subkind {
            sync_type::SYNC_STEP1 => Ok(SyncMessage::SyncStep1(payload)),
            sync_type::SYNC_STEP2 => Ok(SyncMessage::SyncStep2(payload)),
            sync_type::UPDATE => Ok(SyncMessage::Update(payload)),
            other => Err(ProviderError::Decode(format!("Unknown sync subkind {other}"))),
        }
    }

    /// Write the subkind and payload, without the leading `SYNC` tag.
    pub fn encode_to<W: Write>(&self, writer: &mut W) {
        let (subkind, payload) = match self {
            SyncMessage::SyncStep1(payload) => (sync_type::SYNC_STEP1, payload),
            SyncMessage::SyncStep2(payload) => (sync_type::SYNC_STEP2, payload),
            SyncMessage::Update(payload) => (sync_type::UPDATE, payload),
        };
        writer.write_var(subkind);
        writer.write_buf(payload);
    }

    /// The document update carried by this message, if any.
    pub fn update_payload(&self) -> Option<&[u8]> {
        match self {
            SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => Some(update),
            SyncMessage::SyncStep1(_) => None,
        }
    }
}
