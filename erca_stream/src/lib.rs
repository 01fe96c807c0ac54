//! Wire framing for the pellet-room replication bus.
//!
//! Every bus message is a fixed-size header followed by a MessagePack
//! payload. Store writes and replicated notes share the same framing so the
//! relay can forward them without understanding their contents.

use std::convert::TryFrom;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that prefix every bus message ("ERCA").
pub const HEADER_MAGIC: [u8; 4] = *b"ERCA";

/// Protocol revision understood by this crate.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

/// Message kinds carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Hello = 0x0001,
    StoreUpdate = 0x0002,
    Note = 0x0003,
}

/// Envelope describing the upcoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub kind: MessageKind,
    pub length: u32,
}

impl MessageHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&HEADER_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header from raw bytes.
    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }
        if input[..4] != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let mut version_bytes = &input[4..6];
        let version = version_bytes.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let mut kind_bytes = &input[6..8];
        let kind_raw = kind_bytes.get_u16();
        let kind = MessageKind::try_from(kind_raw)
            .map_err(|_| ProtocolError::UnknownMessageKind(kind_raw))?;
        let mut len_bytes = &input[8..12];
        let length = len_bytes.get_u32();
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Hello),
            0x0002 => Ok(Self::StoreUpdate),
            0x0003 => Ok(Self::Note),
            _ => Err(()),
        }
    }
}

/// Announces a replica to the relay when its player enters the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    pub player: u32,
    pub build: Option<String>,
}

impl Hello {
    pub fn new(player: u32, build: Option<String>) -> Self {
        Self {
            protocol: "ErcaBus".to_string(),
            player,
            build,
        }
    }
}

/// One shared-store field write, as broadcast to every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreUpdate {
    pub seq: u64,
    pub origin: u32,
    pub key: String,
    pub values: Vec<i32>,
}

/// Phase of the interaction that currently occupies the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum BusyPhase {
    #[default]
    Idle = 0,
    Held = 1,
    Linking = 2,
}

/// Closed set of notes a controller may broadcast to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum Note {
    TakePellet { phase: BusyPhase },
}

/// A note plus the player that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMessage {
    pub seq: u64,
    pub origin: u32,
    pub note: Note,
}

/// Any decoded bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Hello(Hello),
    StoreUpdate(StoreUpdate),
    Note(NoteMessage),
}

impl BusMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            BusMessage::Hello(_) => MessageKind::Hello,
            BusMessage::StoreUpdate(_) => MessageKind::StoreUpdate,
            BusMessage::Note(_) => MessageKind::Note,
        }
    }

    /// Frame this message for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            BusMessage::Hello(hello) => rmp_serde::to_vec_named(hello)?,
            BusMessage::StoreUpdate(update) => rmp_serde::to_vec_named(update)?,
            BusMessage::Note(note) => rmp_serde::to_vec_named(note)?,
        };
        frame(self.kind(), &payload)
    }

    /// Decode a framed message into its typed form.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (header, payload) = split_frame(bytes)?;
        let message = match header.kind {
            MessageKind::Hello => BusMessage::Hello(rmp_serde::from_slice(payload)?),
            MessageKind::StoreUpdate => BusMessage::StoreUpdate(rmp_serde::from_slice(payload)?),
            MessageKind::Note => BusMessage::Note(rmp_serde::from_slice(payload)?),
        };
        Ok(message)
    }
}

/// Error conditions returned by the protocol helpers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("protocol version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("message kind {0:#06x} is unknown")]
    UnknownMessageKind(u16),
    #[error("payload length mismatch: header declared {expected} bytes but read {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] rmp_serde::decode::Error),
    #[error("payload encode error: {0}")]
    PayloadEncode(#[from] rmp_serde::encode::Error),
}

/// Prefixes an encoded payload with its header.
pub fn frame(kind: MessageKind, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length =
        u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        kind,
        length,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits one frame into its header and exactly `header.length` payload bytes.
pub fn split_frame(bytes: &[u8]) -> Result<(MessageHeader, &[u8]), ProtocolError> {
    let header = MessageHeader::decode(bytes)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.length,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_foreign_magic() {
        let mut bytes = MessageHeader {
            version: PROTOCOL_VERSION,
            kind: MessageKind::Note,
            length: 0,
        }
        .encode();
        bytes[0] = b'G';
        assert!(matches!(
            MessageHeader::decode(&bytes),
            Err(ProtocolError::BadMagic)
        ));
    }

    #[test]
    fn header_rejects_unknown_kind() {
        let mut bytes = MessageHeader {
            version: PROTOCOL_VERSION,
            kind: MessageKind::Hello,
            length: 0,
        }
        .encode();
        bytes[6..8].copy_from_slice(&0x0042u16.to_be_bytes());
        assert!(matches!(
            MessageHeader::decode(&bytes),
            Err(ProtocolError::UnknownMessageKind(0x0042))
        ));
    }

    #[test]
    fn frame_detects_truncated_payload() {
        let update = BusMessage::StoreUpdate(StoreUpdate {
            seq: 3,
            origin: 7,
            key: "ercaPelletMachineChamber".to_string(),
            values: vec![2],
        });
        let bytes = update.encode().expect("encode");
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            split_frame(truncated),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn store_update_keeps_its_key_and_values() {
        let update = StoreUpdate {
            seq: 41,
            origin: 3,
            key: "ercaPelletMachineOpen".to_string(),
            values: vec![1],
        };
        let bytes = BusMessage::StoreUpdate(update.clone())
            .encode()
            .expect("encode");
        let (header, payload) = split_frame(&bytes).expect("frame");
        assert_eq!(header.kind, MessageKind::StoreUpdate);
        assert_eq!(header.length as usize, payload.len());
        match BusMessage::decode(&bytes).expect("decode") {
            BusMessage::StoreUpdate(decoded) => assert_eq!(decoded, update),
            other => panic!("expected a store update, got {other:?}"),
        }
    }

    #[test]
    fn payload_of_the_wrong_kind_fails_to_decode() {
        let hello = rmp_serde::to_vec_named(&Hello::new(1, None)).expect("encode hello");
        let bytes = frame(MessageKind::StoreUpdate, &hello).expect("frame");
        assert!(matches!(
            BusMessage::decode(&bytes),
            Err(ProtocolError::PayloadDecode(_))
        ));
    }

    #[test]
    fn note_survives_the_wire_with_numeric_phase() {
        let message = BusMessage::Note(NoteMessage {
            seq: 9,
            origin: 2,
            note: Note::TakePellet {
                phase: BusyPhase::Linking,
            },
        });
        let bytes = message.encode().expect("encode");
        let (header, _) = split_frame(&bytes).expect("frame");
        assert_eq!(header.kind, MessageKind::Note);
        assert_eq!(BusMessage::decode(&bytes).expect("decode"), message);
    }

    #[test]
    fn truncated_header_is_reported() {
        assert!(matches!(
            BusMessage::decode(b"ERC"),
            Err(ProtocolError::TruncatedHeader)
        ));
    }
}
