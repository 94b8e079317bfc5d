//! In-process transport mesh for tests and same-machine matches.
//!
//! Every [`LoopbackTransport`] created from one [`LoopbackNetwork`] can reach
//! every other. Delivery is lossless unless a link is held or an endpoint is
//! severed; a seeded shuffle reorders each polled batch to exercise arrival
//! order independence.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::transport::{Transport, TransportEvent};

#[derive(Default)]
struct MeshState {
    inboxes: HashMap<SocketAddr, Vec<TransportEvent>>,
    held_links: HashSet<(SocketAddr, SocketAddr)>,
    held: Vec<(SocketAddr, SocketAddr, Vec<u8>)>,
    severed: HashSet<SocketAddr>,
    shuffle: Option<StdRng>,
}

/// Shared handle to the mesh. Cloning yields another handle to the same mesh.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<MeshState>>,
}

impl LoopbackNetwork {
    /// A lossless, in-order mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mesh that shuffles every polled batch with a seeded RNG.
    pub fn with_shuffle(seed: u64) -> Self {
        let net = Self::default();
        net.lock().shuffle = Some(StdRng::seed_from_u64(seed));
        net
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a transport at `addr`.
    pub fn endpoint(&self, addr: SocketAddr) -> LoopbackTransport {
        self.lock().inboxes.entry(addr).or_default();
        LoopbackTransport {
            addr,
            network: self.clone(),
        }
    }

    /// Capture everything `from` sends to `to` until [`release`](Self::release).
    pub fn hold(&self, from: SocketAddr, to: SocketAddr) {
        self.lock().held_links.insert((from, to));
    }

    /// Deliver everything held on `from → to` and stop holding the link.
    pub fn release(&self, from: SocketAddr, to: SocketAddr) {
        let mut state = self.lock();
        state.held_links.remove(&(from, to));
        let held = std::mem::take(&mut state.held);
        for (f, t, bytes) in held {
            if (f, t) == (from, to) {
                deliver(&mut state, f, t, bytes);
            } else {
                state.held.push((f, t, bytes));
            }
        }
    }

    /// Silently drop all traffic to and from `addr`, as if the host vanished.
    pub fn sever(&self, addr: SocketAddr) {
        let mut state = self.lock();
        state.severed.insert(addr);
        state.held.retain(|(f, t, _)| *f != addr && *t != addr);
    }

    /// Raise a timeout for `endpoint` on the transport at `at`.
    pub fn time_out(&self, at: SocketAddr, endpoint: SocketAddr) {
        if let Some(inbox) = self.lock().inboxes.get_mut(&at) {
            inbox.push(TransportEvent::TimedOut { endpoint });
        }
    }

    /// Place raw bytes in `to`'s inbox as if `from` had sent them.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, bytes: Vec<u8>) {
        deliver(&mut self.lock(), from, to, bytes);
    }

    /// Number of events waiting at `addr`.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.lock().inboxes.get(&addr).map_or(0, Vec::len)
    }
}

fn deliver(state: &mut MeshState, from: SocketAddr, to: SocketAddr, bytes: Vec<u8>) {
    if let Some(inbox) = state.inboxes.get_mut(&to) {
        inbox.push(TransportEvent::Received { from, bytes });
    }
}

/// One endpoint on a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    addr: SocketAddr,
    network: LoopbackNetwork,
}

impl Transport for LoopbackTransport {
    fn send(&mut self, to: SocketAddr, bytes: &[u8]) {
        let mut state = self.network.lock();
        if state.severed.contains(&self.addr) || state.severed.contains(&to) {
            return;
        }
        if state.held_links.contains(&(self.addr, to)) {
            state.held.push((self.addr, to, bytes.to_vec()));
            return;
        }
        deliver(&mut state, self.addr, to, bytes.to_vec());
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut state = self.network.lock();
        let mut batch = state
            .inboxes
            .get_mut(&self.addr)
            .map(std::mem::take)
            .unwrap_or_default();
        if let Some(rng) = state.shuffle.as_mut() {
            batch.shuffle(rng);
        }
        batch
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_send_delivers_in_order() {
        let net = LoopbackNetwork::new();
        let mut a = net.endpoint(addr(1));
        let mut b = net.endpoint(addr(2));
        a.send(addr(2), b"one");
        a.send(addr(2), b"two");
        let events = b.poll();
        assert_eq!(
            events,
            vec![
                TransportEvent::Received {
                    from: addr(1),
                    bytes: b"one".to_vec()
                },
                TransportEvent::Received {
                    from: addr(1),
                    bytes: b"two".to_vec()
                },
            ]
        );
        assert!(b.poll().is_empty(), "poll drains the inbox");
    }

    #[test]
    fn test_hold_and_release() {
        let net = LoopbackNetwork::new();
        let mut a = net.endpoint(addr(1));
        let mut b = net.endpoint(addr(2));
        net.hold(addr(1), addr(2));
        a.send(addr(2), b"late");
        assert!(b.poll().is_empty());
        net.release(addr(1), addr(2));
        assert_eq!(b.poll().len(), 1);
    }

    #[test]
    fn test_severed_endpoint_is_silent() {
        let net = LoopbackNetwork::new();
        let mut a = net.endpoint(addr(1));
        let mut b = net.endpoint(addr(2));
        net.sever(addr(1));
        a.send(addr(2), b"lost");
        b.send(addr(1), b"lost too");
        assert_eq!(net.pending(addr(2)), 0);
        assert_eq!(net.pending(addr(1)), 0);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let order = |seed| {
            let net = LoopbackNetwork::with_shuffle(seed);
            let mut a = net.endpoint(addr(1));
            let mut b = net.endpoint(addr(2));
            for i in 0u8..16 {
                a.send(addr(2), &[i]);
            }
            b.poll()
        };
        assert_eq!(order(7), order(7));
        assert_eq!(order(7).len(), 16);
    }
}
