//! UDP transport: a tokio socket reader feeding the game thread, with a
//! [`ReliableLink`] per remote endpoint.
//!
//! The reader task owns the receive side of the socket and pushes every
//! datagram into a bounded [`mpsc`] channel. [`Transport::poll`] drains that
//! channel without blocking, runs each datagram through the sender's link
//! (acks, duplicate suppression), then services resends, heartbeats and
//! timeouts for every link.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::reliable::{Datagram, LinkConfig, ReliableLink};
use crate::transport::{Transport, TransportEvent};

/// Largest datagram the reader accepts.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Socket and reliability settings for [`UdpTransport`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// `SO_RCVBUF` in bytes; 0 keeps the OS default.
    pub recv_buffer_size: usize,
    /// Enable `SO_REUSEADDR`. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
    /// Datagrams buffered between the reader task and `poll`. Default: 1024.
    pub queue_capacity: usize,
    /// Per-peer reliability timing.
    pub link: LinkConfig,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 0,
            reuse_addr: !cfg!(target_os = "windows"),
            queue_capacity: 1024,
            link: LinkConfig::default(),
        }
    }
}

/// Bind a UDP socket with the configured options.
async fn create_socket(addr: SocketAddr, config: &UdpConfig) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    if config.recv_buffer_size > 0 {
        socket.set_recv_buffer_size(config.recv_buffer_size)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// [`Transport`] over a real UDP socket. Must be created and polled inside a
/// tokio runtime.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    incoming: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
    reader: JoinHandle<()>,
    links: HashMap<SocketAddr, ReliableLink>,
    gone: HashSet<SocketAddr>,
    link_config: LinkConfig,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind `addr` and start the reader task.
    pub async fn bind(addr: SocketAddr, config: UdpConfig) -> io::Result<Self> {
        let socket = Arc::new(create_socket(addr, &config).await?);
        let local_addr = socket.local_addr()?;
        let (tx, incoming) = mpsc::channel(config.queue_capacity.max(1));

        let reader_socket = Arc::clone(&socket);
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match reader_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => match tx.try_send((from, buf[..len].to_vec())) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!("Receive queue full, dropping datagram from {from}");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    // ICMP port-unreachable surfaces here on some platforms.
                    Err(e) => tracing::debug!("UDP receive error: {e}"),
                }
            }
        });

        tracing::info!("UDP transport bound on {local_addr}");
        Ok(Self {
            socket,
            incoming,
            reader,
            links: HashMap::new(),
            gone: HashSet::new(),
            link_config: config.link,
            local_addr,
        })
    }

    /// Start tracking `peer` so its silence counts toward a timeout even
    /// before anything is exchanged.
    pub fn connect(&mut self, peer: SocketAddr) {
        let config = self.link_config.clone();
        self.gone.remove(&peer);
        self.links
            .entry(peer)
            .or_insert_with(|| ReliableLink::new(config, Instant::now()));
    }

    /// Datagrams sent to `peer` and not yet acknowledged.
    pub fn in_flight(&self, peer: SocketAddr) -> usize {
        self.links.get(&peer).map_or(0, ReliableLink::in_flight)
    }

    fn send_raw(&self, to: SocketAddr, datagram: &[u8]) {
        match self.socket.try_send_to(datagram, to) {
            Ok(_) => {}
            // The resend timer retries; nothing else to do.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!("UDP send to {to} failed: {e}"),
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, to: SocketAddr, bytes: &[u8]) {
        if self.gone.contains(&to) {
            return;
        }
        let now = Instant::now();
        let config = self.link_config.clone();
        let datagram = self
            .links
            .entry(to)
            .or_insert_with(|| ReliableLink::new(config, now))
            .wrap(bytes, now);
        self.send_raw(to, &datagram);
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let now = Instant::now();
        let mut events = Vec::new();

        // Snapshot: datagrams arriving during this poll wait for the next one.
        for _ in 0..self.incoming.len() {
            let Ok((from, bytes)) = self.incoming.try_recv() else {
                break;
            };
            if self.gone.contains(&from) {
                continue;
            }
            let datagram = match Datagram::decode(&bytes) {
                Ok(datagram) => datagram,
                Err(e) => {
                    tracing::warn!("Dropping bad datagram from {from}: {e}");
                    continue;
                }
            };
            let config = self.link_config.clone();
            let outcome = self
                .links
                .entry(from)
                .or_insert_with(|| ReliableLink::new(config, now))
                .on_datagram(datagram, now);
            if let Some(reply) = outcome.reply {
                self.send_raw(from, &reply);
            }
            if let Some(bytes) = outcome.deliver {
                events.push(TransportEvent::Received { from, bytes });
            }
        }

        let mut timed_out = Vec::new();
        let mut outgoing = Vec::new();
        for (&peer, link) in &mut self.links {
            if link.is_timed_out(now) {
                timed_out.push(peer);
            } else {
                outgoing.extend(link.due(now).into_iter().map(|d| (peer, d)));
            }
        }
        for (peer, datagram) in outgoing {
            self.send_raw(peer, &datagram);
        }
        // Sorted so hosts observing several timeouts at once report them alike.
        timed_out.sort();
        for endpoint in timed_out {
            tracing::warn!("Peer {endpoint} silent for {:?}, giving up", self.link_config.timeout);
            self.links.remove(&endpoint);
            self.gone.insert(endpoint);
            events.push(TransportEvent::TimedOut { endpoint });
        }

        events
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
