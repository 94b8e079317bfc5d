//! Per-faction view of one remote participant.
//!
//! A [`PeerSession`] buffers the commands and completion reports a peer sends
//! for each frame until the scheduler commits that frame. Frames are written
//! once: repeats are reported as [`PeerError`]s and the first record wins.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use skirmish_net::{Command, FactionId};

use crate::error::{DesyncError, PeerError};

/// Why a peer left the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureReason {
    /// The transport gave up on the peer's endpoint.
    TimedOut,
    /// The peer announced it was leaving.
    Left,
    /// The peer blocked a stalled frame for longer than the configured limit.
    Unresponsive,
}

/// Returned the first time a session departs. The owner drops the session and
/// evicts the faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// Departed faction.
    pub faction: FactionId,
    /// What happened.
    pub reason: DepartureReason,
}

/// A peer's completion report for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DoneReport {
    tick_count: u32,
    checksum: Option<u32>,
}

/// Buffers and completion state for one remote faction.
#[derive(Debug)]
pub struct PeerSession {
    faction: FactionId,
    endpoint: SocketAddr,
    commands: BTreeMap<u32, Vec<Command>>,
    done: BTreeMap<u32, DoneReport>,
    oldest_open_frame: u32,
    desync_reported: bool,
    departed: bool,
}

impl PeerSession {
    /// A session for `faction`, reachable at `endpoint`.
    pub fn new(faction: FactionId, endpoint: SocketAddr) -> Self {
        Self {
            faction,
            endpoint,
            commands: BTreeMap::new(),
            done: BTreeMap::new(),
            oldest_open_frame: 0,
            desync_reported: false,
            departed: false,
        }
    }

    /// The faction this session speaks for.
    pub fn faction(&self) -> FactionId {
        self.faction
    }

    /// Where the peer's packets come from and where ours go.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn check_stale(&self, frame: u32) -> Result<(), PeerError> {
        if frame < self.oldest_open_frame {
            return Err(PeerError::StaleFrame {
                faction: self.faction,
                frame,
                current: self.oldest_open_frame,
            });
        }
        Ok(())
    }

    /// Store the peer's commands for `frame`.
    ///
    /// Commands tagged with another faction are dropped and logged; the rest
    /// are stored. Returns the number of dropped commands.
    pub fn record_commands(&mut self, frame: u32, commands: Vec<Command>) -> Result<usize, PeerError> {
        self.check_stale(frame)?;
        if self.commands.contains_key(&frame) {
            return Err(PeerError::DuplicateFrame {
                faction: self.faction,
                frame,
            });
        }

        let before = commands.len();
        let own: Vec<Command> = commands
            .into_iter()
            .filter(|command| {
                let found = command.faction();
                if found == self.faction {
                    return true;
                }
                let err = PeerError::FactionMismatch {
                    expected: self.faction,
                    found,
                };
                tracing::warn!("Dropping command for frame {frame}: {err}");
                false
            })
            .collect();
        let rejected = before - own.len();

        tracing::trace!("{} commands for frame {frame}: {}", self.faction, own.len());
        self.commands.insert(frame, own);
        Ok(rejected)
    }

    /// Store the peer's completion report for `frame`.
    pub fn record_done(&mut self, frame: u32, tick_count: u32, checksum: Option<u32>) -> Result<(), PeerError> {
        self.check_stale(frame)?;
        if self.done.contains_key(&frame) {
            return Err(PeerError::DuplicateDone {
                faction: self.faction,
                frame,
            });
        }
        self.done.insert(frame, DoneReport { tick_count, checksum });
        Ok(())
    }

    /// Whether commands for `frame` have arrived.
    pub fn has_commands_for(&self, frame: u32) -> bool {
        self.commands.contains_key(&frame)
    }

    /// The peer's commands for `frame`.
    ///
    /// # Panics
    ///
    /// If none have arrived. Check [`has_commands_for`](Self::has_commands_for)
    /// first.
    pub fn commands_for(&self, frame: u32) -> &[Command] {
        match self.commands.get(&frame) {
            Some(commands) => commands,
            None => panic!("{} has no commands for frame {frame}", self.faction),
        }
    }

    /// Whether the peer reported `frame` complete.
    pub fn is_done_for(&self, frame: u32) -> bool {
        self.done.contains_key(&frame)
    }

    /// Tick count the peer reported for `frame`, if it has.
    pub fn ticks_reported_for(&self, frame: u32) -> Option<u32> {
        self.done.get(&frame).map(|report| report.tick_count)
    }

    /// Whether this session has departed.
    pub fn is_departed(&self) -> bool {
        self.departed
    }

    fn depart(&mut self, reason: DepartureReason) -> Option<Departure> {
        if self.departed {
            return None;
        }
        self.departed = true;
        Some(Departure {
            faction: self.faction,
            reason,
        })
    }

    /// The transport gave up on this peer.
    pub fn on_peer_timed_out(&mut self) -> Option<Departure> {
        self.depart(DepartureReason::TimedOut)
    }

    /// The peer announced it is leaving.
    pub fn on_peer_left(&mut self) -> Option<Departure> {
        self.depart(DepartureReason::Left)
    }

    /// The peer held up a stalled frame for too long.
    pub fn on_peer_unresponsive(&mut self) -> Option<Departure> {
        self.depart(DepartureReason::Unresponsive)
    }

    /// Compare the peer's reported checksum for `frame` with ours.
    ///
    /// The first mismatch is returned as an error; later ones are silent. A
    /// report without a checksum never mismatches.
    pub fn verify_checksum(&mut self, frame: u32, local: u32) -> Result<(), DesyncError> {
        if self.desync_reported {
            return Ok(());
        }
        let Some(remote) = self.done.get(&frame).and_then(|report| report.checksum) else {
            return Ok(());
        };
        if remote == local {
            return Ok(());
        }
        self.desync_reported = true;
        Err(DesyncError {
            faction: self.faction,
            frame,
            local,
            remote,
        })
    }

    /// Forget everything about frames up to and including `frame`; later
    /// packets for them are stale.
    pub fn discard_through(&mut self, frame: u32) {
        let keep_from = frame.saturating_add(1);
        self.commands = self.commands.split_off(&keep_from);
        self.done = self.done.split_off(&keep_from);
        self.oldest_open_frame = self.oldest_open_frame.max(keep_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_net::{TilePos, UnitId};

    const F2: FactionId = FactionId(2);

    fn session() -> PeerSession {
        PeerSession::new(F2, SocketAddr::from(([10, 0, 0, 2], 41234)))
    }

    fn mv(faction: FactionId, unit: u32) -> Command {
        Command::Move {
            faction,
            unit: UnitId(unit),
            dest: TilePos::new(0, 0),
        }
    }

    #[test]
    fn test_nothing_recorded_is_waiting_not_error() {
        let s = session();
        assert!(!s.has_commands_for(0));
        assert!(!s.is_done_for(0));
        assert_eq!(s.ticks_reported_for(0), None);
    }

    #[test]
    fn test_commands_are_write_once() {
        let mut s = session();
        s.record_commands(3, vec![mv(F2, 1)]).unwrap();
        let err = s.record_commands(3, vec![mv(F2, 2)]).unwrap_err();
        assert_eq!(err, PeerError::DuplicateFrame { faction: F2, frame: 3 });
        assert_eq!(s.commands_for(3), &[mv(F2, 1)]);
    }

    #[test]
    fn test_empty_command_list_counts_as_delivered() {
        let mut s = session();
        s.record_commands(0, Vec::new()).unwrap();
        assert!(s.has_commands_for(0));
        assert!(s.commands_for(0).is_empty());
    }

    #[test]
    fn test_foreign_commands_filtered_rest_kept() {
        let mut s = session();
        let rejected = s
            .record_commands(1, vec![mv(F2, 1), mv(FactionId(1), 9), mv(F2, 2)])
            .unwrap();
        assert_eq!(rejected, 1);
        assert_eq!(s.commands_for(1), &[mv(F2, 1), mv(F2, 2)]);
    }

    #[test]
    fn test_done_is_write_once() {
        let mut s = session();
        s.record_done(0, 7, None).unwrap();
        assert_eq!(
            s.record_done(0, 9, None),
            Err(PeerError::DuplicateDone { faction: F2, frame: 0 })
        );
        assert_eq!(s.ticks_reported_for(0), Some(7));
    }

    #[test]
    #[should_panic(expected = "no commands for frame 4")]
    fn test_commands_for_missing_frame_panics() {
        session().commands_for(4);
    }

    #[test]
    fn test_discarded_frames_become_stale() {
        let mut s = session();
        s.record_commands(0, Vec::new()).unwrap();
        s.record_commands(1, Vec::new()).unwrap();
        s.discard_through(0);
        assert!(!s.has_commands_for(0));
        assert!(s.has_commands_for(1));
        assert!(matches!(
            s.record_commands(0, Vec::new()),
            Err(PeerError::StaleFrame { frame: 0, current: 1, .. })
        ));
        assert!(matches!(s.record_done(0, 6, None), Err(PeerError::StaleFrame { .. })));
    }

    #[test]
    fn test_departure_is_reported_once() {
        let mut s = session();
        assert_eq!(
            s.on_peer_timed_out(),
            Some(Departure {
                faction: F2,
                reason: DepartureReason::TimedOut
            })
        );
        assert_eq!(s.on_peer_left(), None);
        assert_eq!(s.on_peer_timed_out(), None);
        assert!(s.is_departed());
    }

    #[test]
    fn test_desync_reported_once() {
        let mut s = session();
        s.record_done(0, 6, Some(0xAAAA)).unwrap();
        s.record_done(1, 6, Some(0xBBBB)).unwrap();
        s.record_done(2, 6, Some(0x1234)).unwrap();

        assert!(s.verify_checksum(2, 0x1234).is_ok());
        let err = s.verify_checksum(0, 0x1111).unwrap_err();
        assert_eq!(err.remote, 0xAAAA);
        assert!(s.verify_checksum(1, 0x1111).is_ok(), "later mismatches are silent");
    }

    #[test]
    fn test_missing_checksum_never_mismatches() {
        let mut s = session();
        s.record_done(0, 6, None).unwrap();
        assert!(s.verify_checksum(0, 42).is_ok());
    }
}
