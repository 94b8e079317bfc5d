//! Deterministic lockstep command synchronization.
//!
//! Every host runs the full simulation. Player commands are collected into
//! command frames, exchanged with every peer, and applied on all hosts in the
//! same order at the same frame. Frame length adapts to observed latency.

pub mod error;
pub mod pacing;
pub mod peer;
pub mod scheduler;
pub mod session;
pub mod simulation;

pub use error::{DesyncError, PeerError, SchedulerError};
pub use pacing::PacingModel;
pub use peer::{Departure, DepartureReason, PeerSession};
pub use scheduler::{LockstepScheduler, SchedulerConfig, SchedulerStats, TickOutcome};
pub use session::{MatchConfig, MatchSession};
pub use simulation::Simulation;
