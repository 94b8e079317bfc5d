//! One match from this host's point of view.
//!
//! [`MatchSession`] owns the packet channel, the scheduler and through it every
//! peer session. Several matches can run side by side in one process.

use std::net::SocketAddr;

use skirmish_config::{Config, ConfigError};
use skirmish_net::{
    ChannelStats, Command, CompressionConfig, FactionId, PacketChannel, Transport,
};

use crate::error::SchedulerError;
use crate::scheduler::{LockstepScheduler, SchedulerConfig, SchedulerStats, TickOutcome};
use crate::simulation::Simulation;

/// Everything needed to start a match.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Faction played on this host.
    pub local_faction: FactionId,
    /// Remote participants.
    pub peers: Vec<(FactionId, SocketAddr)>,
    /// Frame timing and recovery.
    pub scheduler: SchedulerConfig,
    /// Packet compression.
    pub compression: CompressionConfig,
}

impl MatchConfig {
    /// Build from a loaded node configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let peers = config
            .network
            .peers
            .iter()
            .map(|peer| Ok((FactionId(peer.faction), peer.socket_addr()?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            local_faction: FactionId(config.network.local_faction),
            peers,
            scheduler: SchedulerConfig::from(&config.lockstep),
            compression: CompressionConfig {
                threshold: config.network.compression_threshold,
                ..CompressionConfig::default()
            },
        })
    }
}

/// A running match over transport `T`.
pub struct MatchSession<T: Transport> {
    channel: PacketChannel<T>,
    scheduler: LockstepScheduler,
}

impl<T: Transport> MatchSession<T> {
    /// Start a match on `transport`.
    pub fn new(transport: T, config: MatchConfig) -> Result<Self, SchedulerError> {
        let scheduler = LockstepScheduler::new(config.local_faction, config.peers, config.scheduler)?;
        let channel = PacketChannel::new(transport, config.compression);
        tracing::info!(
            "Match started on {} as {}",
            channel.local_addr(),
            scheduler.local_faction()
        );
        Ok(Self { channel, scheduler })
    }

    /// Queue a local player command.
    pub fn issue(&mut self, command: Command) -> Result<(), SchedulerError> {
        self.scheduler.issue(command)
    }

    /// Advance one tick.
    pub fn update<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> TickOutcome {
        self.scheduler.update(&mut self.channel, sim)
    }

    /// Announce departure to every peer.
    pub fn leave(&mut self) {
        self.scheduler.leave(&mut self.channel);
    }

    /// Current command frame.
    pub fn frame(&self) -> u32 {
        self.scheduler.frame()
    }

    /// Whether the simulation is paused waiting on peers.
    pub fn is_stalled(&self) -> bool {
        self.scheduler.is_stalled()
    }

    /// Whether a peer's checksum has disagreed with ours.
    pub fn is_diverged(&self) -> bool {
        self.scheduler.is_diverged()
    }

    /// Factions still in the match besides ours.
    pub fn live_peers(&self) -> Vec<FactionId> {
        self.scheduler.live_peers().collect()
    }

    /// The scheduler, for inspection.
    pub fn scheduler(&self) -> &LockstepScheduler {
        &self.scheduler
    }

    /// Scheduler totals.
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Packet channel totals.
    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    /// The transport underneath.
    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }
}
