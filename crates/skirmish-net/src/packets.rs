//! Lockstep packet types and their wire encoding.
//!
//! Packets are serialized with [`postcard`], prefixed with a protocol version
//! byte, and then wrapped by [`crate::compression`]:
//!
//! ```text
//! [compression flag: u8] [version: u8] [postcard-encoded Packet]
//!                        \____ possibly LZ4-compressed ______/
//! ```

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandCodecError, decode_commands, encode_commands};
use crate::compression::{CompressionConfig, CompressionError, unwrap_payload, wrap_payload};

/// Current wire-protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest wire payload: one IPv4 UDP datagram less the reliability header.
pub const MAX_PAYLOAD_SIZE: usize = 65_507 - 5;

/// Every packet a lockstep peer can send. The enum discriminant is the type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Packet {
    /// The sender's commands for one frame.
    Commands(CommandsPacket),
    /// The sender holds every peer's commands for a frame.
    FrameCompleted(FrameCompletedPacket),
    /// The sender is leaving the match.
    RemovePlayer(RemovePlayerPacket),
}

/// Commands one faction issued during one command frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandsPacket {
    /// Frame the commands belong to.
    pub frame: u32,
    /// Back-to-back command records, see [`crate::command`].
    pub payload: Vec<u8>,
}

impl CommandsPacket {
    /// Encode `commands` for `frame`.
    pub fn new(frame: u32, commands: &[Command]) -> Result<Self, CommandCodecError> {
        Ok(Self {
            frame,
            payload: encode_commands(commands)?,
        })
    }

    /// Decode the carried commands.
    pub fn commands(&self) -> Result<Vec<Command>, CommandCodecError> {
        decode_commands(&self.payload)
    }
}

/// Completion report: the sender has every live peer's commands for `frame`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameCompletedPacket {
    /// Frame being reported.
    pub frame: u32,
    /// Ticks between the sender broadcasting its own commands for the frame
    /// and holding every peer's. Feeds the pacing model.
    pub tick_count: u32,
    /// World checksum at frame open; only sent with verification enabled.
    pub checksum: Option<u32>,
}

/// Leave notice. Carries no fields; the sender's endpoint identifies it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovePlayerPacket {}

/// Packet type tag, used for logging and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// [`Packet::Commands`].
    Commands,
    /// [`Packet::FrameCompleted`].
    FrameCompleted,
    /// [`Packet::RemovePlayer`].
    RemovePlayer,
}

impl Packet {
    /// Extract the type tag without consuming the packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Commands(_) => PacketKind::Commands,
            Packet::FrameCompleted(_) => PacketKind::FrameCompleted,
            Packet::RemovePlayer(_) => PacketKind::RemovePlayer,
        }
    }
}

/// Errors that can occur while encoding or decoding a packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The compression envelope was invalid.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// Nothing after the compression flag.
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard (de)serialization failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),

    /// Bytes left over after a complete packet.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    /// The encoded packet would not fit in a datagram, or would exceed what a
    /// receiver is willing to decompress.
    #[error("packet is {size} bytes, limit is {limit}")]
    Oversized {
        /// Encoded or uncompressed size.
        size: usize,
        /// The limit it broke.
        limit: usize,
    },
}

/// Serialize a packet into a datagram payload.
pub fn encode_packet(packet: &Packet, compression: &CompressionConfig) -> Result<Vec<u8>, PacketError> {
    let body = postcard::to_allocvec(packet)?;
    let mut versioned = Vec::with_capacity(1 + body.len());
    versioned.push(PROTOCOL_VERSION);
    versioned.extend_from_slice(&body);
    if versioned.len() > compression.max_decompressed_size {
        return Err(PacketError::Oversized {
            size: versioned.len(),
            limit: compression.max_decompressed_size,
        });
    }
    let wire = wrap_payload(&versioned, compression);
    if wire.len() > MAX_PAYLOAD_SIZE {
        return Err(PacketError::Oversized {
            size: wire.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(wire)
}

/// Deserialize a datagram payload into a packet.
pub fn decode_packet(data: &[u8], compression: &CompressionConfig) -> Result<Packet, PacketError> {
    let versioned = unwrap_payload(data, compression)?;
    let (&version, body) = versioned.split_first().ok_or(PacketError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(PacketError::UnsupportedVersion(version));
    }
    let (packet, rest) = postcard::take_from_bytes(body)?;
    if !rest.is_empty() {
        return Err(PacketError::TrailingBytes(rest.len()));
    }
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FactionId, TilePos, UnitId};
    use crate::compression::FLAG_RAW;

    fn config() -> CompressionConfig {
        CompressionConfig::default()
    }

    #[test]
    fn test_commands_packet_carries_commands() {
        let commands = vec![Command::Move {
            faction: FactionId(2),
            unit: UnitId(3),
            dest: TilePos::new(10, 4),
        }];
        let packet = Packet::Commands(CommandsPacket::new(7, &commands).unwrap());
        let bytes = encode_packet(&packet, &config()).unwrap();
        let Packet::Commands(decoded) = decode_packet(&bytes, &config()).unwrap() else {
            panic!("expected a commands packet");
        };
        assert_eq!(decoded.frame, 7);
        assert_eq!(decoded.commands().unwrap(), commands);
    }

    #[test]
    fn test_large_batch_survives_compression() {
        let commands: Vec<Command> = (0..400)
            .map(|i| Command::Stop {
                faction: FactionId(1),
                unit: UnitId(i),
            })
            .collect();
        let packet = Packet::Commands(CommandsPacket::new(1, &commands).unwrap());
        let bytes = encode_packet(&packet, &config()).unwrap();
        let decoded = decode_packet(&bytes, &config()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_completion_report_without_checksum() {
        let packet = Packet::FrameCompleted(FrameCompletedPacket {
            frame: 12,
            tick_count: 8,
            checksum: None,
        });
        let bytes = encode_packet(&packet, &config()).unwrap();
        assert_eq!(decode_packet(&bytes, &config()).unwrap(), packet);
        assert!(bytes.len() < 8, "completion report should be tiny");
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            Packet::RemovePlayer(RemovePlayerPacket {}).kind(),
            PacketKind::RemovePlayer
        );
        assert_eq!(
            Packet::FrameCompleted(FrameCompletedPacket {
                frame: 0,
                tick_count: 0,
                checksum: Some(1),
            })
            .kind(),
            PacketKind::FrameCompleted
        );
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes =
            encode_packet(&Packet::RemovePlayer(RemovePlayerPacket {}), &config()).unwrap();
        assert_eq!(bytes[0], FLAG_RAW);
        bytes[1] = 99;
        assert!(matches!(
            decode_packet(&bytes, &config()),
            Err(PacketError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes =
            encode_packet(&Packet::RemovePlayer(RemovePlayerPacket {}), &config()).unwrap();
        assert_eq!(bytes[0], FLAG_RAW);
        bytes.extend_from_slice(&[0x00, 0x07]);
        assert!(matches!(
            decode_packet(&bytes, &config()),
            Err(PacketError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_oversized_batch_refused() {
        let raw = CompressionConfig {
            enabled: false,
            max_decompressed_size: usize::MAX,
            ..config()
        };
        let packet = Packet::Commands(CommandsPacket {
            frame: 3,
            payload: vec![0x5A; 70_000],
        });
        assert!(matches!(
            encode_packet(&packet, &raw),
            Err(PacketError::Oversized { limit: MAX_PAYLOAD_SIZE, .. })
        ));

        // Compresses to almost nothing, but a receiver would refuse to inflate it.
        assert!(matches!(
            encode_packet(&packet, &config()),
            Err(PacketError::Oversized { limit: 65_536, .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_packet(&[], &config()).is_err());
        assert!(matches!(
            decode_packet(&[FLAG_RAW], &config()),
            Err(PacketError::EmptyPayload)
        ));
        assert!(decode_packet(&[FLAG_RAW, PROTOCOL_VERSION, 0xFF, 0xFF], &config()).is_err());
    }
}
