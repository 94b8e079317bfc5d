//! Lockstep scheduler: decides when local commands go out and when a frame
//! is committed to the simulation.
//!
//! Each call to [`LockstepScheduler::update`] is one simulation tick:
//!
//! 1. poll the packet channel and route packets to peer sessions;
//! 2. count the tick against the current frame;
//! 3. at `target` ticks, broadcast the local command buffer for the frame;
//! 4. once every live peer's commands are in, report the frame complete
//!    along with how many ticks that took after our own commands went out;
//! 5. at `2 * target` ticks, commit if every live peer has sent commands and
//!    reported complete, otherwise stall until they have.
//!
//! A commit merges all command lists, sorts them by issuing faction, applies
//! them, checks checksums, feeds the pacing model and opens the next frame.
//!
//! Readiness takes two one-way trips after commands go out: peers' commands
//! in, then their completion reports. The pacing sample is therefore twice the
//! slowest reported exchange latency, which keeps `target + 2 * latency`
//! inside the `2 * target` deadline once the target settles.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use skirmish_config::LockstepConfig;
use skirmish_net::{
    Command, CommandsPacket, FactionId, FrameCompletedPacket, Packet, PacketChannel, PacketHandler,
    RemovePlayerPacket, Transport,
};

use crate::error::SchedulerError;
use crate::pacing::PacingModel;
use crate::peer::{Departure, PeerSession};
use crate::simulation::Simulation;

/// Frame timing and recovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Initial frame length and lower bound of the adaptive target.
    pub default_ticks_per_frame: u32,
    /// Upper bound of the adaptive target.
    pub max_ticks_per_frame: u32,
    /// Summed ticks of frame samples kept by the pacing window.
    pub pacing_window_ticks: u32,
    /// Stalled ticks before blocking peers are evicted; `None` waits forever.
    pub stall_forfeit_ticks: Option<u32>,
    /// Exchange and compare world checksums.
    pub verify_checksums: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&LockstepConfig::default())
    }
}

impl From<&LockstepConfig> for SchedulerConfig {
    fn from(config: &LockstepConfig) -> Self {
        Self {
            default_ticks_per_frame: config.default_ticks_per_frame,
            max_ticks_per_frame: config.max_ticks_per_frame,
            pacing_window_ticks: config.pacing_window_ticks,
            stall_forfeit_ticks: config.stall_forfeit_ticks,
            verify_checksums: config.verify_checksums,
        }
    }
}

/// Running totals kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames handed to the simulation.
    pub committed_frames: u64,
    /// Times a frame entered the stalled state.
    pub stalls: u64,
    /// Ticks spent stalled, over all stalls.
    pub stalled_ticks: u64,
    /// Peer commands dropped for carrying a foreign faction tag.
    pub rejected_commands: u64,
    /// Duplicate, stale, undecodable or unknown-sender packets.
    pub protocol_violations: u64,
    /// Peers found to have diverged.
    pub desyncs: u64,
    /// Peers removed for any reason.
    pub departures: u64,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The frame is still accumulating or awaiting peers.
    Waiting,
    /// This frame was committed.
    Committed(u32),
    /// The frame is overdue and the simulation is paused.
    Stalled,
    /// The local player left; nothing happens any more.
    Left,
}

/// Drives command frames for one local faction.
pub struct LockstepScheduler {
    config: SchedulerConfig,
    local: FactionId,
    peers: BTreeMap<FactionId, PeerSession>,
    by_endpoint: HashMap<SocketAddr, FactionId>,
    pacing: PacingModel,

    frame: u32,
    ticks_in_frame: u32,
    /// Commands for the next frame to be sent.
    local_buffer: Vec<Command>,
    /// Local commands already sent for the current frame.
    sent: Option<Vec<Command>>,
    sent_at_tick: u32,
    /// Exchange latency we reported for the current frame.
    reported_ticks: Option<u32>,
    opening_checksum: Option<u32>,

    stalled: bool,
    stall_ticks: u32,
    diverged: bool,
    left: bool,
    stats: SchedulerStats,
}

impl LockstepScheduler {
    /// A scheduler for `local`, synchronizing with `peers`.
    pub fn new<I>(local: FactionId, peers: I, config: SchedulerConfig) -> Result<Self, SchedulerError>
    where
        I: IntoIterator<Item = (FactionId, SocketAddr)>,
    {
        let mut sessions = BTreeMap::new();
        let mut by_endpoint = HashMap::new();
        for (faction, endpoint) in peers {
            if faction == local {
                return Err(SchedulerError::PeerIsLocal(faction));
            }
            if sessions.contains_key(&faction) {
                return Err(SchedulerError::DuplicatePeer(faction));
            }
            if by_endpoint.insert(endpoint, faction).is_some() {
                return Err(SchedulerError::DuplicateEndpoint(endpoint));
            }
            sessions.insert(faction, PeerSession::new(faction, endpoint));
        }

        let pacing = PacingModel::new(
            config.default_ticks_per_frame,
            config.max_ticks_per_frame,
            config.pacing_window_ticks,
        );
        tracing::info!(
            "Lockstep scheduler for {local} with {} peers, frame target {} ticks",
            sessions.len(),
            pacing.target()
        );

        Ok(Self {
            config,
            local,
            peers: sessions,
            by_endpoint,
            pacing,
            frame: 0,
            ticks_in_frame: 0,
            local_buffer: Vec::new(),
            sent: None,
            sent_at_tick: 0,
            reported_ticks: None,
            opening_checksum: None,
            stalled: false,
            stall_ticks: 0,
            diverged: false,
            left: false,
            stats: SchedulerStats::default(),
        })
    }

    /// Queue a local command for the next frame this host sends.
    pub fn issue(&mut self, command: Command) -> Result<(), SchedulerError> {
        if self.left {
            return Err(SchedulerError::Left);
        }
        if matches!(command, Command::Evict { .. }) {
            return Err(SchedulerError::ReservedCommand);
        }
        let found = command.faction();
        if found != self.local {
            return Err(SchedulerError::ForeignCommand {
                local: self.local,
                found,
            });
        }
        self.local_buffer.push(command);
        Ok(())
    }

    /// Run one tick.
    pub fn update<T, S>(&mut self, channel: &mut PacketChannel<T>, sim: &mut S) -> TickOutcome
    where
        T: Transport,
        S: Simulation + ?Sized,
    {
        if self.left {
            return TickOutcome::Left;
        }
        if self.config.verify_checksums && self.opening_checksum.is_none() {
            self.opening_checksum = Some(sim.state_checksum());
        }

        channel.poll(&mut *self);
        for faction in sim.drain_defeated() {
            self.remove_defeated(faction);
        }

        self.ticks_in_frame = self.ticks_in_frame.saturating_add(1);
        let target = self.pacing.target();

        if self.sent.is_none() && self.ticks_in_frame >= target {
            self.send_local_commands(channel);
        }
        self.report_done_if_complete(channel);

        if self.ticks_in_frame < target.saturating_mul(2) {
            return TickOutcome::Waiting;
        }
        if self.is_ready() {
            return TickOutcome::Committed(self.commit(sim));
        }

        if !self.stalled {
            self.stalled = true;
            self.stats.stalls += 1;
            tracing::info!(
                "Frame {} stalled waiting for {:?}",
                self.frame,
                self.blocking_peers()
            );
            sim.pause();
        }
        self.stall_ticks += 1;
        self.stats.stalled_ticks += 1;

        if let Some(limit) = self.config.stall_forfeit_ticks
            && self.stall_ticks >= limit
        {
            for faction in self.blocking_peers() {
                let departure = self
                    .peers
                    .get_mut(&faction)
                    .and_then(PeerSession::on_peer_unresponsive);
                if let Some(departure) = departure {
                    self.handle_departure(departure);
                }
            }
            // Evicting may have unblocked the frame.
            self.report_done_if_complete(channel);
            if self.is_ready() {
                return TickOutcome::Committed(self.commit(sim));
            }
        }
        TickOutcome::Stalled
    }

    fn send_local_commands<T: Transport>(&mut self, channel: &mut PacketChannel<T>) {
        let commands = std::mem::take(&mut self.local_buffer);
        match CommandsPacket::new(self.frame, &commands) {
            Ok(packet) => {
                channel.broadcast(&Packet::Commands(packet), self.live_endpoints());
            }
            // Peers will stall on this frame; nothing sensible to fall back to.
            Err(e) => tracing::error!("Failed to encode commands for frame {}: {e}", self.frame),
        }
        tracing::debug!(
            "Sent {} commands for frame {} after {} ticks",
            commands.len(),
            self.frame,
            self.ticks_in_frame
        );
        self.sent = Some(commands);
        self.sent_at_tick = self.ticks_in_frame;
    }

    fn report_done_if_complete<T: Transport>(&mut self, channel: &mut PacketChannel<T>) {
        if self.sent.is_none() || self.reported_ticks.is_some() {
            return;
        }
        let frame = self.frame;
        if !self.peers.values().all(|p| p.has_commands_for(frame)) {
            return;
        }
        let waited = self.ticks_in_frame - self.sent_at_tick;
        let report = FrameCompletedPacket {
            frame,
            tick_count: waited,
            checksum: if self.config.verify_checksums {
                self.opening_checksum
            } else {
                None
            },
        };
        channel.broadcast(&Packet::FrameCompleted(report), self.live_endpoints());
        self.reported_ticks = Some(waited);
    }

    fn is_ready(&self) -> bool {
        let frame = self.frame;
        self.sent.is_some()
            && self.reported_ticks.is_some()
            && self
                .peers
                .values()
                .all(|p| p.has_commands_for(frame) && p.is_done_for(frame))
    }

    fn blocking_peers(&self) -> Vec<FactionId> {
        let frame = self.frame;
        self.peers
            .values()
            .filter(|p| !(p.has_commands_for(frame) && p.is_done_for(frame)))
            .map(PeerSession::faction)
            .collect()
    }

    fn commit<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> u32 {
        let frame = self.frame;

        let mut merged = self.sent.take().unwrap_or_default();
        for peer in self.peers.values() {
            merged.extend_from_slice(peer.commands_for(frame));
        }
        // Stable: each faction's commands keep their issue order.
        merged.sort_by_key(Command::faction);
        sim.apply_commands(frame, &merged);

        if self.config.verify_checksums
            && let Some(local) = self.opening_checksum
        {
            for peer in self.peers.values_mut() {
                if let Err(e) = peer.verify_checksum(frame, local) {
                    tracing::error!("{e}");
                    self.stats.desyncs += 1;
                    self.diverged = true;
                }
            }
        }

        let slowest = self
            .peers
            .values()
            .filter_map(|p| p.ticks_reported_for(frame))
            .chain(self.reported_ticks)
            .max()
            .unwrap_or_default();
        // Commands out and reports back: two legs.
        let target = self.pacing.record(slowest.saturating_mul(2));

        for peer in self.peers.values_mut() {
            peer.discard_through(frame);
        }
        self.frame = frame + 1;
        self.ticks_in_frame = 0;
        self.reported_ticks = None;
        self.opening_checksum = self.config.verify_checksums.then(|| sim.state_checksum());
        self.stats.committed_frames += 1;

        if self.stalled {
            tracing::info!("Frame {frame} unstalled after {} ticks", self.stall_ticks);
            self.stalled = false;
            self.stall_ticks = 0;
            sim.resume();
        }
        tracing::debug!(
            "Committed frame {frame}: {} commands, slowest {slowest} ticks, next target {target}",
            merged.len()
        );
        frame
    }

    fn handle_departure(&mut self, departure: Departure) {
        let Departure { faction, reason } = departure;
        if let Some(peer) = self.peers.remove(&faction) {
            self.by_endpoint.remove(&peer.endpoint());
        }
        self.stats.departures += 1;
        tracing::info!("{faction} departed ({reason:?}) during frame {}", self.frame);
        self.local_buffer.push(Command::Evict {
            faction: self.local,
            target: faction,
        });
    }

    fn remove_defeated(&mut self, faction: FactionId) {
        if let Some(peer) = self.peers.remove(&faction) {
            self.by_endpoint.remove(&peer.endpoint());
            self.stats.departures += 1;
            tracing::info!("{faction} defeated, no longer waiting on it");
        }
    }

    fn live_endpoints(&self) -> Vec<SocketAddr> {
        self.peers.values().map(PeerSession::endpoint).collect()
    }

    fn peer_at(&mut self, from: SocketAddr) -> Option<&mut PeerSession> {
        let faction = self.by_endpoint.get(&from).copied();
        match faction.and_then(|f| self.peers.get_mut(&f)) {
            Some(peer) => Some(peer),
            None => {
                tracing::warn!("Ignoring packet from unknown endpoint {from}");
                self.stats.protocol_violations += 1;
                None
            }
        }
    }

    /// Tell every live peer we are leaving. Later ticks do nothing.
    pub fn leave<T: Transport>(&mut self, channel: &mut PacketChannel<T>) {
        if self.left {
            return;
        }
        channel.broadcast(
            &Packet::RemovePlayer(RemovePlayerPacket {}),
            self.live_endpoints(),
        );
        self.left = true;
        tracing::info!("{} left the match at frame {}", self.local, self.frame);
    }

    /// The frame currently being accumulated or awaited.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Current frame length target in ticks.
    pub fn target_ticks(&self) -> u32 {
        self.pacing.target()
    }

    /// Ticks elapsed in the current frame.
    pub fn ticks_in_frame(&self) -> u32 {
        self.ticks_in_frame
    }

    /// Whether the current frame is overdue and the simulation paused.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Whether any peer's checksum has disagreed with ours.
    pub fn is_diverged(&self) -> bool {
        self.diverged
    }

    /// Whether [`leave`](Self::leave) has been called.
    pub fn has_left(&self) -> bool {
        self.left
    }

    /// This host's faction.
    pub fn local_faction(&self) -> FactionId {
        self.local
    }

    /// Factions still being synchronized with, in ascending order.
    pub fn live_peers(&self) -> impl Iterator<Item = FactionId> + '_ {
        self.peers.keys().copied()
    }

    /// A peer's session, if it is still live.
    pub fn peer(&self, faction: FactionId) -> Option<&PeerSession> {
        self.peers.get(&faction)
    }

    /// Running totals.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}

impl PacketHandler for LockstepScheduler {
    fn on_commands(&mut self, from: SocketAddr, packet: CommandsPacket) {
        let commands = match packet.commands() {
            Ok(commands) => commands,
            Err(e) => {
                tracing::warn!("Undecodable commands for frame {} from {from}: {e}", packet.frame);
                self.stats.protocol_violations += 1;
                return;
            }
        };
        let Some(peer) = self.peer_at(from) else {
            return;
        };
        match peer.record_commands(packet.frame, commands) {
            Ok(rejected) => self.stats.rejected_commands += rejected as u64,
            Err(e) => {
                tracing::warn!("{e}");
                self.stats.protocol_violations += 1;
            }
        }
    }

    fn on_frame_completed(&mut self, from: SocketAddr, packet: FrameCompletedPacket) {
        let Some(peer) = self.peer_at(from) else {
            return;
        };
        if let Err(e) = peer.record_done(packet.frame, packet.tick_count, packet.checksum) {
            tracing::warn!("{e}");
            self.stats.protocol_violations += 1;
        }
    }

    fn on_remove_player(&mut self, from: SocketAddr) {
        if let Some(departure) = self.peer_at(from).and_then(PeerSession::on_peer_left) {
            self.handle_departure(departure);
        }
    }

    fn on_peer_timed_out(&mut self, endpoint: SocketAddr) {
        // Timeouts for endpoints already removed are expected, not violations.
        let faction = self.by_endpoint.get(&endpoint).copied();
        let departure = faction
            .and_then(|f| self.peers.get_mut(&f))
            .and_then(PeerSession::on_peer_timed_out);
        if let Some(departure) = departure {
            self.handle_departure(departure);
        }
    }
}
