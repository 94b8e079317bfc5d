//! Error types for peer sessions and the scheduler.

use std::net::SocketAddr;

use skirmish_net::FactionId;

/// Protocol violations detected while recording a peer's packets. The
/// offending data is dropped and whatever was recorded first is kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// A second command list for a frame that already has one.
    #[error("{faction} sent commands for frame {frame} twice")]
    DuplicateFrame {
        /// Sending faction.
        faction: FactionId,
        /// Repeated frame.
        frame: u32,
    },

    /// A second completion report for the same frame.
    #[error("{faction} reported frame {frame} complete twice")]
    DuplicateDone {
        /// Sending faction.
        faction: FactionId,
        /// Repeated frame.
        frame: u32,
    },

    /// Data for a frame this host has already committed.
    #[error("{faction} sent data for frame {frame}, already committed (now at {current})")]
    StaleFrame {
        /// Sending faction.
        faction: FactionId,
        /// Frame carried by the packet.
        frame: u32,
        /// Oldest frame still accepted.
        current: u32,
    },

    /// A command claims to come from a faction other than its sender.
    #[error("command from {expected} claims to be issued by {found}")]
    FactionMismatch {
        /// Faction owning the session the command arrived on.
        expected: FactionId,
        /// Faction tag carried by the command.
        found: FactionId,
    },
}

/// A peer reported a different world checksum for a frame than this host
/// computed. Raised at most once per peer session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("desync with {faction} at frame {frame}: local {local:#010x}, remote {remote:#010x}")]
pub struct DesyncError {
    /// Diverged peer.
    pub faction: FactionId,
    /// Frame whose opening state differs.
    pub frame: u32,
    /// Checksum computed here.
    pub local: u32,
    /// Checksum the peer reported.
    pub remote: u32,
}

/// Errors returned by the scheduler's public operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// A locally issued command is tagged with another faction.
    #[error("local faction {local} cannot issue a command for {found}")]
    ForeignCommand {
        /// This host's faction.
        local: FactionId,
        /// Faction tag carried by the command.
        found: FactionId,
    },

    /// The command kind is only ever issued by the scheduler itself.
    #[error("evictions are issued by the scheduler, not the player")]
    ReservedCommand,

    /// The same faction was registered twice.
    #[error("{0} registered more than once")]
    DuplicatePeer(FactionId),

    /// Two peers were registered at the same endpoint.
    #[error("endpoint {0} registered for more than one faction")]
    DuplicateEndpoint(SocketAddr),

    /// A peer was registered with the local faction.
    #[error("{0} is the local faction and cannot also be a peer")]
    PeerIsLocal(FactionId),

    /// The local host already left the match.
    #[error("the local player has left the match")]
    Left,
}
