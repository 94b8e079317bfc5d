//! Player commands and their wire encoding.
//!
//! A command batch travels as a flat byte buffer of back-to-back postcard
//! records. Each record starts with the enum variant tag, followed by the
//! variant's fields; entities and factions are referenced by stable numeric
//! handles only. [`decode_commands`] reads records until the buffer is
//! exhausted.

use serde::{Deserialize, Serialize};

/// Stable handle of a faction (one per participant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactionId(pub u8);

impl std::fmt::Display for FactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "faction{}", self.0)
    }
}

/// Stable handle of a unit or structure in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u32);

/// Tile coordinate on the map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilePos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl TilePos {
    /// Shorthand constructor.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An instruction to the simulation, tagged with the faction that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Order a unit to walk to a tile.
    Move {
        /// Issuing faction.
        faction: FactionId,
        /// Unit being ordered.
        unit: UnitId,
        /// Destination tile.
        dest: TilePos,
    },
    /// Order a unit to attack another entity.
    Attack {
        /// Issuing faction.
        faction: FactionId,
        /// Attacker.
        unit: UnitId,
        /// Entity under attack.
        target: UnitId,
    },
    /// Cancel whatever a unit is doing.
    Stop {
        /// Issuing faction.
        faction: FactionId,
        /// Unit being ordered.
        unit: UnitId,
    },
    /// Place a structure blueprint.
    Build {
        /// Issuing faction.
        faction: FactionId,
        /// Worker doing the construction.
        builder: UnitId,
        /// Blueprint type id.
        blueprint: u16,
        /// Anchor tile of the structure.
        at: TilePos,
    },
    /// Send a worker to harvest a resource node.
    Gather {
        /// Issuing faction.
        faction: FactionId,
        /// Worker being ordered.
        unit: UnitId,
        /// Resource node entity.
        node: UnitId,
    },
    /// The faction gives up; all its units are destroyed.
    Forfeit {
        /// Faction leaving the match.
        faction: FactionId,
    },
    /// Issued by the scheduler when `target` times out or leaves, so every
    /// host removes it in the same frame. Applying it for a faction that is
    /// already gone must be a no-op.
    Evict {
        /// Faction whose host observed the departure.
        faction: FactionId,
        /// Departed faction.
        target: FactionId,
    },
}

impl Command {
    /// The faction that issued this command. This is the merge ordering key.
    pub fn faction(&self) -> FactionId {
        match self {
            Self::Move { faction, .. }
            | Self::Attack { faction, .. }
            | Self::Stop { faction, .. }
            | Self::Build { faction, .. }
            | Self::Gather { faction, .. }
            | Self::Forfeit { faction }
            | Self::Evict { faction, .. } => *faction,
        }
    }
}

/// Errors produced while decoding a command buffer.
#[derive(Debug, thiserror::Error)]
pub enum CommandCodecError {
    /// A record could not be decoded. `index` is the number of records that
    /// were read successfully before it.
    #[error("malformed command record #{index}: {source}")]
    Malformed {
        /// Position of the bad record in the buffer.
        index: usize,
        /// Postcard failure.
        #[source]
        source: postcard::Error,
    },

    /// Encoding one of our own commands failed.
    #[error("command encoding failed: {0}")]
    Encode(#[source] postcard::Error),
}

/// Append the records for `commands` into one flat buffer.
pub fn encode_commands(commands: &[Command]) -> Result<Vec<u8>, CommandCodecError> {
    let mut out = Vec::with_capacity(commands.len() * 12);
    for command in commands {
        let record = postcard::to_allocvec(command).map_err(CommandCodecError::Encode)?;
        out.extend_from_slice(&record);
    }
    Ok(out)
}

/// Decode records from `bytes` until the buffer is empty.
///
/// A truncated trailing record fails the whole buffer; a partially decoded
/// batch is never returned.
pub fn decode_commands(bytes: &[u8]) -> Result<Vec<Command>, CommandCodecError> {
    let mut commands = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (command, tail) = postcard::take_from_bytes::<Command>(rest).map_err(|source| {
            CommandCodecError::Malformed {
                index: commands.len(),
                source,
            }
        })?;
        commands.push(command);
        rest = tail;
    }
    Ok(commands)
}
