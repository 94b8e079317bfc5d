//! Per-peer reliability over raw datagrams: sequencing, acks, resends,
//! duplicate suppression, heartbeats and silence timeout.
//!
//! Wire layout of every datagram:
//!
//! ```text
//! DATA       [0x00] [seq: u32 LE] [payload ...]
//! ACK        [0x01] [seq: u32 LE]
//! HEARTBEAT  [0x02]
//! ```
//!
//! [`ReliableLink`] is pure state driven by explicit `now` instants so it can
//! be tested without sockets or sleeping.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

const KIND_DATA: u8 = 0x00;
const KIND_ACK: u8 = 0x01;
const KIND_HEARTBEAT: u8 = 0x02;

/// A parsed datagram borrowing from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datagram<'a> {
    /// Application payload that must be acknowledged.
    Data {
        /// Sender-assigned sequence number.
        seq: u32,
        /// Payload for the layer above.
        payload: &'a [u8],
    },
    /// Acknowledgement of a `Data` datagram.
    Ack {
        /// Sequence number being acknowledged.
        seq: u32,
    },
    /// Keeps an idle link alive.
    Heartbeat,
}

/// Errors from [`Datagram::decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    /// Zero-length datagram.
    #[error("empty datagram")]
    Empty,
    /// Header shorter than its kind requires.
    #[error("truncated header for kind 0x{0:02X}")]
    Truncated(u8),
    /// Unrecognized kind byte.
    #[error("unknown datagram kind 0x{0:02X}")]
    UnknownKind(u8),
}

impl<'a> Datagram<'a> {
    /// Serialize into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datagram::Data { seq, payload } => {
                let mut out = Vec::with_capacity(5 + payload.len());
                out.push(KIND_DATA);
                out.extend_from_slice(&seq.to_le_bytes());
                out.extend_from_slice(payload);
                out
            }
            Datagram::Ack { seq } => {
                let mut out = Vec::with_capacity(5);
                out.push(KIND_ACK);
                out.extend_from_slice(&seq.to_le_bytes());
                out
            }
            Datagram::Heartbeat => vec![KIND_HEARTBEAT],
        }
    }

    /// Parse a received buffer.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, DatagramError> {
        let (&kind, rest) = bytes.split_first().ok_or(DatagramError::Empty)?;
        let seq = || -> Result<u32, DatagramError> {
            rest.get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or(DatagramError::Truncated(kind))
        };
        match kind {
            KIND_DATA => Ok(Datagram::Data {
                seq: seq()?,
                payload: &rest[4..],
            }),
            KIND_ACK => Ok(Datagram::Ack { seq: seq()? }),
            KIND_HEARTBEAT => Ok(Datagram::Heartbeat),
            other => Err(DatagramError::UnknownKind(other)),
        }
    }
}

/// Timing knobs for a [`ReliableLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Delay before an unacknowledged datagram is sent again. Default: 100 ms.
    pub resend_interval: Duration,
    /// Idle time before a heartbeat is sent. Default: 500 ms.
    pub heartbeat_interval: Duration,
    /// Silence after which the peer is considered gone. Default: 10 s.
    pub timeout: Duration,
    /// How many recent sequence numbers are remembered for duplicate
    /// suppression. Default: 4096.
    pub dedupe_window: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
            dedupe_window: 4096,
        }
    }
}

struct Unacked {
    datagram: Vec<u8>,
    last_sent: Instant,
}

/// What the caller should do with an incoming datagram.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Datagram to send back to the peer (an ack).
    pub reply: Option<Vec<u8>>,
    /// Payload to hand to the layer above.
    pub deliver: Option<Vec<u8>>,
}

/// Reliability state for one remote endpoint.
pub struct ReliableLink {
    config: LinkConfig,
    next_seq: u32,
    unacked: BTreeMap<u32, Unacked>,
    seen: HashSet<u32>,
    seen_order: VecDeque<u32>,
    last_heard: Instant,
    last_sent: Instant,
}

impl ReliableLink {
    /// A fresh link. The peer counts as heard from at `now`.
    pub fn new(config: LinkConfig, now: Instant) -> Self {
        Self {
            config,
            next_seq: 0,
            unacked: BTreeMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            last_heard: now,
            last_sent: now,
        }
    }

    /// Sequence `payload` and return the datagram to put on the wire. The
    /// datagram is kept until acknowledged.
    pub fn wrap(&mut self, payload: &[u8], now: Instant) -> Vec<u8> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let datagram = Datagram::Data { seq, payload }.encode();
        self.unacked.insert(
            seq,
            Unacked {
                datagram: datagram.clone(),
                last_sent: now,
            },
        );
        self.last_sent = now;
        datagram
    }

    /// Process a datagram received from the peer.
    pub fn on_datagram(&mut self, datagram: Datagram<'_>, now: Instant) -> LinkOutcome {
        self.last_heard = now;
        match datagram {
            Datagram::Data { seq, payload } => {
                let reply = Some(Datagram::Ack { seq }.encode());
                if !self.seen.insert(seq) {
                    tracing::trace!("Duplicate datagram seq={seq}");
                    return LinkOutcome {
                        reply,
                        deliver: None,
                    };
                }
                self.seen_order.push_back(seq);
                if self.seen_order.len() > self.config.dedupe_window
                    && let Some(old) = self.seen_order.pop_front()
                {
                    self.seen.remove(&old);
                }
                LinkOutcome {
                    reply,
                    deliver: Some(payload.to_vec()),
                }
            }
            Datagram::Ack { seq } => {
                self.unacked.remove(&seq);
                LinkOutcome::default()
            }
            Datagram::Heartbeat => LinkOutcome::default(),
        }
    }

    /// Datagrams that are due at `now`: resends of overdue unacked data, or a
    /// heartbeat when the link has been idle.
    pub fn due(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for pending in self.unacked.values_mut() {
            if now.saturating_duration_since(pending.last_sent) >= self.config.resend_interval {
                pending.last_sent = now;
                out.push(pending.datagram.clone());
            }
        }
        if out.is_empty()
            && now.saturating_duration_since(self.last_sent) >= self.config.heartbeat_interval
        {
            out.push(Datagram::Heartbeat.encode());
        }
        if !out.is_empty() {
            self.last_sent = now;
        }
        out
    }

    /// Whether the peer has been silent for longer than the timeout.
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heard) > self.config.timeout
    }

    /// Number of datagrams still waiting for an ack.
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }
}
