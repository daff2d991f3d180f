//! TRS-80 Model III timing core.
//!
//! The pieces whose correctness is timing- and bit-level exact: the
//! discrete-event clock and pulse scheduler, the hardware signal latches,
//! the interrupt lines built on them, and the versioned machine snapshot
//! container. The Model III crystal runs the Z80 at 2.02752 MHz; every
//! delay in the machine is expressed in T-states of that clock.
//!
//! The CPU itself, the floppy controller state machine, and the screen
//! are collaborators behind traits; this crate never renders, decodes
//! opcodes, or touches the host UI.

mod clock;
mod interrupts;
mod scheduler;
mod snapshot;
mod trigger;

pub use clock::{Clock, ClockClient, ClockHandle};
pub use interrupts::{InterruptManager, NMI_ENABLE_FDC, NMI_ENABLE_MOTOR_OFF};
pub use scheduler::{Delay, PulseKind, PulseReq, Scheduler};
pub use snapshot::{
    OLDEST_SUPPORTED_SNAPSHOT, SECTION_COUNT, SNAPSHOT_VERSION, StagedSnapshot, load_snapshot,
    save_snapshot, stage_snapshot,
};
pub use trigger::{Trigger, TriggerEdge};

/// Model III crystal frequency in Hz.
pub const CLOCK_RATE_HZ: u64 = 2_027_520;
