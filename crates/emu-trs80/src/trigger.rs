//! Hardware signal latch.
//!
//! A [`Trigger`] models one edge- or level-triggered signal line: the
//! floppy motor and NMI request lines, the cassette edge detectors, and
//! the reset button. The latch has an enable (mask) input and a latch
//! input; the derived `triggered` output asserts while both are set.
//!
//! Two modifiers cover the hardware variants:
//! - `can_latch_before_enabled`: the line latches while masked and fires
//!   as soon as it is unmasked (pending-while-masked interrupts).
//! - `trigger_lock`: the output stays asserted until explicitly
//!   acknowledged with [`Trigger::reset_trigger`] (sticky status lines).
//!
//! Edge notifications are returned from every mutating call rather than
//! delivered through stored callbacks; the caller (interrupt manager,
//! floppy controller) dispatches them. An edge is reported at most once
//! per transition of the output.

use emu_core::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};

/// An output transition produced by a latch update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    /// The output rose: the signal is now asserted.
    Fired,
    /// The output fell: the signal was deasserted.
    Reset,
}

/// A five-flag latch state machine for one hardware signal line.
#[derive(Debug, Clone)]
pub struct Trigger {
    enabled: bool,
    latched: bool,
    triggered: bool,
    trigger_lock: bool,
    can_latch_before_enabled: bool,
}

impl Trigger {
    #[must_use]
    pub const fn new(trigger_lock: bool, can_latch_before_enabled: bool) -> Self {
        Self {
            enabled: false,
            latched: false,
            triggered: false,
            trigger_lock,
            can_latch_before_enabled,
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn latched(&self) -> bool {
        self.latched
    }

    /// The derived output: asserted while latched and enabled (and, with
    /// `trigger_lock`, until acknowledged).
    #[must_use]
    pub const fn triggered(&self) -> bool {
        self.triggered
    }

    /// Enable or mask the line.
    pub fn set_enabled(&mut self, enabled: bool) -> Option<TriggerEdge> {
        self.update(Some(enabled), None)
    }

    /// Assert the latch input.
    pub fn latch(&mut self) -> Option<TriggerEdge> {
        self.update(None, Some(true))
    }

    /// Deassert the latch input.
    pub fn unlatch(&mut self) -> Option<TriggerEdge> {
        self.update(None, Some(false))
    }

    /// Assert or deassert the latch input.
    pub fn latch_if(&mut self, latch: bool) -> Option<TriggerEdge> {
        self.update(None, Some(latch))
    }

    /// Force-clear the output without producing an edge. This is the
    /// explicit acknowledgement for `trigger_lock` lines.
    pub fn reset_trigger(&mut self) {
        self.triggered = false;
    }

    /// The latch transition function. Callers pass at most one of the two
    /// inputs per call; passing both is a programming error.
    pub fn update(
        &mut self,
        enabled: Option<bool>,
        latched: Option<bool>,
    ) -> Option<TriggerEdge> {
        debug_assert!(
            enabled.is_none() || latched.is_none(),
            "a trigger update changes the enable or the latch, never both"
        );

        let was_active = self.latched && self.enabled;

        if let Some(e) = enabled {
            self.enabled = e;
        }

        if enabled == Some(false) && !self.can_latch_before_enabled {
            self.latched = false;
        } else if latched == Some(true) && (self.enabled || self.can_latch_before_enabled) {
            self.latched = true;
        } else if let Some(l) = latched {
            self.latched = l;
        }

        if self.latched && self.enabled {
            if !self.triggered {
                self.triggered = true;
                return Some(TriggerEdge::Fired);
            }
        } else {
            if !self.trigger_lock {
                self.triggered = false;
            }
            if was_active {
                return Some(TriggerEdge::Reset);
            }
        }
        None
    }
}

impl Snapshot for Trigger {
    fn save(&self, writer: &mut SnapshotWriter) {
        writer.write_bool(self.enabled);
        writer.write_bool(self.latched);
        writer.write_bool(self.trigger_lock);
        writer.write_bool(self.can_latch_before_enabled);
        writer.write_bool(self.triggered);
    }

    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        let enabled = reader.read_bool()?;
        let latched = reader.read_bool()?;
        let trigger_lock = reader.read_bool()?;
        let can_latch_before_enabled = reader.read_bool()?;
        let triggered = reader.read_bool()?;

        self.enabled = enabled;
        self.latched = latched;
        self.trigger_lock = trigger_lock;
        self.can_latch_before_enabled = can_latch_before_enabled;
        self.triggered = triggered;
        Ok(())
    }
}
