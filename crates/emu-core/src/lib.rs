//! Core traits and types for cycle-accurate TRS-80 emulation.
//!
//! Everything is timed in T-states of the CPU crystal. All component
//! timing derives from this. No exceptions.

mod clock;
mod cpu;
mod snapshot;
mod ticks;

pub use clock::MasterClock;
pub use cpu::Cpu;
pub use snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};
pub use ticks::Ticks;
