//! The datagram service the packet channel runs on top of.

use std::net::SocketAddr;

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete payload arrived from `from`.
    Received {
        /// Sender endpoint.
        from: SocketAddr,
        /// Payload bytes, exactly as passed to [`Transport::send`] by the sender.
        bytes: Vec<u8>,
    },
    /// The transport gave up on `endpoint`. Raised at most once per endpoint.
    TimedOut {
        /// The unreachable endpoint.
        endpoint: SocketAddr,
    },
}

/// Point-to-point datagram delivery with transport-owned retry and timeout.
///
/// Implementations must never block: `send` is fire-and-forget and `poll`
/// returns only what has already arrived.
pub trait Transport {
    /// Queue `bytes` for delivery to `to`.
    fn send(&mut self, to: SocketAddr, bytes: &[u8]);

    /// Take every event available right now, in arrival order.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// The endpoint peers use to reach this transport.
    fn local_addr(&self) -> SocketAddr;
}
