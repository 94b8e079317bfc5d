//! Packet channel: encode outgoing packets and dispatch incoming ones.
//!
//! [`PacketChannel::poll`] drains what the [`Transport`] holds at the moment
//! of the call, decodes each payload and hands it to the matching
//! [`PacketHandler`] method together with the sender's endpoint. Undecodable
//! payloads are logged, counted and dropped here; they never reach a handler.

use std::net::SocketAddr;

use crate::compression::CompressionConfig;
use crate::packets::{
    CommandsPacket, FrameCompletedPacket, Packet, decode_packet, encode_packet,
};
use crate::transport::{Transport, TransportEvent};

/// Receives decoded packets and transport notifications from
/// [`PacketChannel::poll`], one method per packet kind.
pub trait PacketHandler {
    /// A faction's commands for one frame.
    fn on_commands(&mut self, from: SocketAddr, packet: CommandsPacket);

    /// A peer has every faction's commands for a frame.
    fn on_frame_completed(&mut self, from: SocketAddr, packet: FrameCompletedPacket);

    /// A peer announced it is leaving.
    fn on_remove_player(&mut self, from: SocketAddr);

    /// The transport declared `endpoint` unreachable.
    fn on_peer_timed_out(&mut self, endpoint: SocketAddr);
}

/// Running totals kept by a [`PacketChannel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Packets handed to the transport (a broadcast counts once per target).
    pub sent: u64,
    /// Packets decoded and dispatched.
    pub received: u64,
    /// Payloads dropped because they failed to decode.
    pub malformed: u64,
    /// Timeout notifications dispatched.
    pub timeouts: u64,
    /// Outgoing packets dropped because they could not be encoded or were
    /// too large for a datagram.
    pub unsendable: u64,
}

/// Typed packet layer over a [`Transport`].
pub struct PacketChannel<T: Transport> {
    transport: T,
    compression: CompressionConfig,
    stats: ChannelStats,
}

impl<T: Transport> PacketChannel<T> {
    /// Wrap a transport.
    pub fn new(transport: T, compression: CompressionConfig) -> Self {
        Self {
            transport,
            compression,
            stats: ChannelStats::default(),
        }
    }

    /// Send one packet to one endpoint. Fire-and-forget.
    pub fn send(&mut self, packet: &Packet, to: SocketAddr) {
        self.broadcast(packet, [to]);
    }

    /// Encode `packet` once and send it to every endpoint in `targets`.
    ///
    /// A packet over [`MAX_PAYLOAD_SIZE`](crate::packets::MAX_PAYLOAD_SIZE) or
    /// the receivers' decompression limit is never handed to the transport,
    /// which would otherwise retry it until the peer timed out.
    pub fn broadcast<I>(&mut self, packet: &Packet, targets: I)
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let bytes = match encode_packet(packet, &self.compression) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Not sending {:?} packet: {e}", packet.kind());
                self.stats.unsendable += 1;
                return;
            }
        };
        for to in targets {
            tracing::trace!("Sending {:?} ({} bytes) to {to}", packet.kind(), bytes.len());
            self.transport.send(to, &bytes);
            self.stats.sent += 1;
        }
    }

    /// Dispatch everything currently available. Returns the number of events
    /// handed to `handler`.
    pub fn poll<H: PacketHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let mut dispatched = 0;
        for event in self.transport.poll() {
            match event {
                TransportEvent::Received { from, bytes } => {
                    let packet = match decode_packet(&bytes, &self.compression) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::warn!("Dropping malformed payload from {from}: {e}");
                            self.stats.malformed += 1;
                            continue;
                        }
                    };
                    tracing::trace!("Received {:?} from {from}", packet.kind());
                    self.stats.received += 1;
                    dispatched += 1;
                    match packet {
                        Packet::Commands(p) => handler.on_commands(from, p),
                        Packet::FrameCompleted(p) => handler.on_frame_completed(from, p),
                        Packet::RemovePlayer(_) => handler.on_remove_player(from),
                    }
                }
                TransportEvent::TimedOut { endpoint } => {
                    tracing::warn!("Transport timed out {endpoint}");
                    self.stats.timeouts += 1;
                    dispatched += 1;
                    handler.on_peer_timed_out(endpoint);
                }
            }
        }
        dispatched
    }

    /// Running totals.
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Endpoint peers use to reach us.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, FactionId, UnitId};
    use crate::loopback::LoopbackNetwork;
    use crate::packets::RemovePlayerPacket;

    #[derive(Default)]
    struct Recorder {
        commands: Vec<(SocketAddr, u32)>,
        completed: Vec<(SocketAddr, FrameCompletedPacket)>,
        removed: Vec<SocketAddr>,
        timed_out: Vec<SocketAddr>,
    }

    impl PacketHandler for Recorder {
        fn on_commands(&mut self, from: SocketAddr, packet: CommandsPacket) {
            self.commands.push((from, packet.frame));
        }
        fn on_frame_completed(&mut self, from: SocketAddr, packet: FrameCompletedPacket) {
            self.completed.push((from, packet));
        }
        fn on_remove_player(&mut self, from: SocketAddr) {
            self.removed.push(from);
        }
        fn on_peer_timed_out(&mut self, endpoint: SocketAddr) {
            self.timed_out.push(endpoint);
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn pair() -> (
        LoopbackNetwork,
        PacketChannel<crate::loopback::LoopbackTransport>,
        PacketChannel<crate::loopback::LoopbackTransport>,
    ) {
        let net = LoopbackNetwork::new();
        let a = PacketChannel::new(net.endpoint(addr(1)), CompressionConfig::default());
        let b = PacketChannel::new(net.endpoint(addr(2)), CompressionConfig::default());
        (net, a, b)
    }

    #[test]
    fn test_each_kind_reaches_its_handler_with_sender() {
        let (_net, mut a, mut b) = pair();
        let commands = [Command::Stop {
            faction: FactionId(1),
            unit: UnitId(1),
        }];
        a.send(
            &Packet::Commands(CommandsPacket::new(4, &commands).unwrap()),
            addr(2),
        );
        let report = FrameCompletedPacket {
            frame: 4,
            tick_count: 6,
            checksum: Some(0xABCD),
        };
        a.send(&Packet::FrameCompleted(report), addr(2));
        a.send(&Packet::RemovePlayer(RemovePlayerPacket {}), addr(2));

        let mut recorder = Recorder::default();
        assert_eq!(b.poll(&mut recorder), 3);
        assert_eq!(recorder.commands, vec![(addr(1), 4)]);
        assert_eq!(recorder.completed, vec![(addr(1), report)]);
        assert_eq!(recorder.removed, vec![addr(1)]);
        assert_eq!(b.stats().received, 3);
    }

    #[test]
    fn test_poll_without_traffic_is_a_no_op() {
        let (_net, _a, mut b) = pair();
        let mut recorder = Recorder::default();
        let before = b.stats();
        assert_eq!(b.poll(&mut recorder), 0);
        assert_eq!(b.stats(), before);
        assert!(recorder.commands.is_empty() && recorder.timed_out.is_empty());
    }

    #[test]
    fn test_malformed_payload_never_reaches_handler() {
        let (net, _a, mut b) = pair();
        net.inject(addr(1), addr(2), vec![0x00, 0x01, 0xFF, 0xFF, 0xFF]);
        net.inject(addr(1), addr(2), Vec::new());

        let mut recorder = Recorder::default();
        assert_eq!(b.poll(&mut recorder), 0);
        assert_eq!(b.stats().malformed, 2);
        assert!(recorder.commands.is_empty());
    }

    #[test]
    fn test_timeout_dispatched() {
        let (net, _a, mut b) = pair();
        net.time_out(addr(2), addr(1));
        let mut recorder = Recorder::default();
        b.poll(&mut recorder);
        assert_eq!(recorder.timed_out, vec![addr(1)]);
        assert_eq!(b.stats().timeouts, 1);
    }

    #[test]
    fn test_oversized_packet_never_reaches_transport() {
        let (net, mut a, _b) = pair();
        let packet = Packet::Commands(CommandsPacket {
            frame: 9,
            payload: vec![0x11; 100_000],
        });
        a.broadcast(&packet, [addr(2)]);

        assert_eq!(a.stats().sent, 0);
        assert_eq!(a.stats().unsendable, 1);
        assert_eq!(net.pending(addr(2)), 0);
    }

    #[test]
    fn test_broadcast_counts_every_target() {
        let net = LoopbackNetwork::new();
        let mut a = PacketChannel::new(net.endpoint(addr(1)), CompressionConfig::default());
        let mut b = PacketChannel::new(net.endpoint(addr(2)), CompressionConfig::default());
        let mut c = PacketChannel::new(net.endpoint(addr(3)), CompressionConfig::default());

        a.broadcast(&Packet::RemovePlayer(RemovePlayerPacket {}), [addr(2), addr(3)]);
        assert_eq!(a.stats().sent, 2);

        let mut rb = Recorder::default();
        let mut rc = Recorder::default();
        b.poll(&mut rb);
        c.poll(&mut rc);
        assert_eq!(rb.removed, vec![addr(1)]);
        assert_eq!(rc.removed, vec![addr(1)]);
    }
}
