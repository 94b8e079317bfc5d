//! The boundary between the scheduler and the game world.

use skirmish_net::{Command, FactionId};

/// The deterministic world the scheduler drives.
///
/// Every host must produce the same state (and the same
/// [`state_checksum`](Simulation::state_checksum)) after applying the same
/// command lists in the same frame order.
pub trait Simulation {
    /// Stop advancing world time; called once when a frame stalls.
    fn pause(&mut self);

    /// Continue after a stall.
    fn resume(&mut self);

    /// Apply one committed frame. `commands` are already in execution order.
    fn apply_commands(&mut self, frame: u32, commands: &[Command]);

    /// Hash of the deterministic world state.
    fn state_checksum(&self) -> u32;

    /// Factions defeated since the last call.
    fn drain_defeated(&mut self) -> Vec<FactionId> {
        Vec::new()
    }
}
