//! A tiny deterministic world so a node has something to keep in lockstep.
//!
//! Every faction starts with a few workers on its own corner of a grid. Moves
//! set a destination and each committed frame walks every unit one tile
//! toward it. Stop, Attack, Build and Gather are recorded as unit orders only.

use std::collections::{BTreeMap, BTreeSet};

use skirmish_lockstep::Simulation;
use skirmish_net::{Command, FactionId, TilePos, UnitId};

/// Workers each faction starts with.
pub const STARTING_UNITS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Idle,
    Move(TilePos),
    Attack(UnitId),
    Build { blueprint: u16, at: TilePos },
    Gather(UnitId),
}

impl Order {
    /// Values folded into the world checksum.
    fn fingerprint(&self) -> [i64; 4] {
        match *self {
            Order::Idle => [0, 0, 0, 0],
            Order::Move(dest) => [1, dest.x.into(), dest.y.into(), 0],
            Order::Attack(target) => [2, target.0.into(), 0, 0],
            Order::Build { blueprint, at } => [3, blueprint.into(), at.x.into(), at.y.into()],
            Order::Gather(node) => [4, node.0.into(), 0, 0],
        }
    }
}

#[derive(Debug, Clone)]
struct Unit {
    owner: FactionId,
    pos: TilePos,
    order: Order,
}

/// Grid world driven only by committed command frames.
#[derive(Debug)]
pub struct ScriptedWorld {
    units: BTreeMap<UnitId, Unit>,
    alive: BTreeSet<FactionId>,
    defeated: Vec<FactionId>,
    frame: u32,
    paused: bool,
}

impl ScriptedWorld {
    /// Spawn starting units for every faction in `factions`.
    pub fn new(factions: impl IntoIterator<Item = FactionId>) -> Self {
        let mut units = BTreeMap::new();
        let mut alive = BTreeSet::new();
        for faction in factions {
            alive.insert(faction);
            let base = i32::from(faction.0) * 16;
            for i in 0..STARTING_UNITS {
                units.insert(
                    unit_id(faction, i),
                    Unit {
                        owner: faction,
                        pos: TilePos::new(base + i as i32, base),
                        order: Order::Idle,
                    },
                );
            }
        }
        Self {
            units,
            alive,
            defeated: Vec::new(),
            frame: 0,
            paused: false,
        }
    }

    /// Factions that still own units.
    pub fn alive(&self) -> impl Iterator<Item = FactionId> + '_ {
        self.alive.iter().copied()
    }

    /// Units owned by `faction`, in id order.
    pub fn units_of(&self, faction: FactionId) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|(_, unit)| unit.owner == faction)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Position of a unit, if it exists.
    pub fn position(&self, unit: UnitId) -> Option<TilePos> {
        self.units.get(&unit).map(|u| u.pos)
    }

    /// Whether the world clock is paused by a stall.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn order(&mut self, faction: FactionId, unit: UnitId, order: Order) {
        match self.units.get_mut(&unit) {
            Some(u) if u.owner == faction => u.order = order,
            // Orders for dead or foreign units are ignored identically everywhere.
            _ => tracing::debug!("{faction} cannot order unit {}", unit.0),
        }
    }

    fn eliminate(&mut self, faction: FactionId) {
        if !self.alive.remove(&faction) {
            return;
        }
        self.units.retain(|_, unit| unit.owner != faction);
        self.defeated.push(faction);
        tracing::info!("{faction} eliminated at frame {}", self.frame);
    }

    fn step(&mut self) {
        for unit in self.units.values_mut() {
            if let Order::Move(dest) = unit.order {
                unit.pos.x += (dest.x - unit.pos.x).signum();
                unit.pos.y += (dest.y - unit.pos.y).signum();
                if unit.pos == dest {
                    unit.order = Order::Idle;
                }
            }
        }
    }
}

/// Stable unit id for the `index`th starting unit of `faction`.
pub fn unit_id(faction: FactionId, index: u32) -> UnitId {
    UnitId(u32::from(faction.0) * 1000 + index)
}

impl Simulation for ScriptedWorld {
    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn apply_commands(&mut self, frame: u32, commands: &[Command]) {
        self.frame = frame;
        for command in commands {
            match *command {
                Command::Move { faction, unit, dest } => self.order(faction, unit, Order::Move(dest)),
                Command::Attack {
                    faction,
                    unit,
                    target,
                } => self.order(faction, unit, Order::Attack(target)),
                Command::Stop { faction, unit } => self.order(faction, unit, Order::Idle),
                Command::Build {
                    faction,
                    builder,
                    blueprint,
                    at,
                } => self.order(faction, builder, Order::Build { blueprint, at }),
                Command::Gather {
                    faction,
                    unit,
                    node,
                } => self.order(faction, unit, Order::Gather(node)),
                Command::Forfeit { faction } => self.eliminate(faction),
                Command::Evict { target, .. } => self.eliminate(target),
            }
        }
        self.step();
    }

    fn state_checksum(&self) -> u32 {
        // FNV-1a over units in id order.
        let mut hash: u32 = 0x811C_9DC5;
        let mut feed = |value: i64| {
            for byte in value.to_le_bytes() {
                hash = (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193);
            }
        };
        for (id, unit) in &self.units {
            feed(i64::from(id.0));
            feed(i64::from(unit.owner.0));
            feed(i64::from(unit.pos.x));
            feed(i64::from(unit.pos.y));
            for value in unit.order.fingerprint() {
                feed(value);
            }
        }
        hash
    }

    fn drain_defeated(&mut self) -> Vec<FactionId> {
        std::mem::take(&mut self.defeated)
    }
}
