//! Networking for lockstep peers: command wire format, packet encoding and
//! dispatch, and the datagram transports underneath.

pub mod channel;
pub mod command;
pub mod compression;
pub mod loopback;
pub mod packets;
pub mod reliable;
pub mod transport;
pub mod udp;

pub use channel::{ChannelStats, PacketChannel, PacketHandler};
pub use command::{
    Command, CommandCodecError, FactionId, TilePos, UnitId, decode_commands, encode_commands,
};
pub use compression::{CompressionConfig, CompressionError};
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use packets::{
    CommandsPacket, FrameCompletedPacket, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION, Packet, PacketError,
    PacketKind, RemovePlayerPacket, decode_packet, encode_packet,
};
pub use reliable::{Datagram, DatagramError, LinkConfig, LinkOutcome, ReliableLink};
pub use transport::{Transport, TransportEvent};
pub use udp::{UdpConfig, UdpTransport};
