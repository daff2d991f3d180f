//! The machine's trigger-backed signal lines.
//!
//! The Model III raises NMI for floppy-controller command completion,
//! drive motor timeout, and the reset button, and raises the maskable
//! interrupt for the 30 Hz real-time clock heartbeat and the cassette
//! edge detectors. This manager owns one [`Trigger`] per line; the port
//! layer (out of scope here) feeds mask writes in and status reads out.

use emu_core::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};

use crate::trigger::{Trigger, TriggerEdge};

/// NMI enable mask bit for FDC command completion (port 0xE4 write).
pub const NMI_ENABLE_FDC: u8 = 0x80;
/// NMI enable mask bit for the drive motor-off timeout.
pub const NMI_ENABLE_MOTOR_OFF: u8 = 0x40;

/// Owner of the machine's interrupt and status latches.
#[derive(Debug, Clone)]
pub struct InterruptManager {
    /// 30 Hz heartbeat IRQ. Sticky until the ROM acknowledges it, and it
    /// keeps time while masked.
    rtc: Trigger,
    fdc_nmi: Trigger,
    fdc_motor_off_nmi: Trigger,
    /// The reset button is never masked and stays pending until the
    /// machine explicitly acknowledges it.
    reset_button: Trigger,
    cassette_rising_edge: Trigger,
    cassette_falling_edge: Trigger,
}

impl InterruptManager {
    #[must_use]
    pub fn new() -> Self {
        let mut reset_button = Trigger::new(true, true);
        reset_button.set_enabled(true);
        let mut rtc = Trigger::new(true, true);
        rtc.set_enabled(true);

        Self {
            rtc,
            fdc_nmi: Trigger::new(false, true),
            fdc_motor_off_nmi: Trigger::new(false, true),
            reset_button,
            cassette_rising_edge: Trigger::new(false, true),
            cassette_falling_edge: Trigger::new(false, true),
        }
    }

    /// Latch the 30 Hz heartbeat (called from the clock's IRQ pulse).
    pub fn rtc_tick(&mut self) -> Option<TriggerEdge> {
        self.rtc.latch()
    }

    /// ROM interrupt handler acknowledgement of the heartbeat.
    pub fn acknowledge_rtc(&mut self) {
        self.rtc.unlatch();
        self.rtc.reset_trigger();
    }

    pub fn press_reset_button(&mut self) -> Option<TriggerEdge> {
        self.reset_button.latch()
    }

    /// Explicit acknowledgement of the sticky reset line.
    pub fn acknowledge_reset_button(&mut self) {
        self.reset_button.unlatch();
        self.reset_button.reset_trigger();
    }

    pub fn fdc_nmi(&mut self) -> &mut Trigger {
        &mut self.fdc_nmi
    }

    pub fn fdc_motor_off_nmi(&mut self) -> &mut Trigger {
        &mut self.fdc_motor_off_nmi
    }

    pub fn cassette_rising_edge(&mut self) -> &mut Trigger {
        &mut self.cassette_rising_edge
    }

    pub fn cassette_falling_edge(&mut self) -> &mut Trigger {
        &mut self.cassette_falling_edge
    }

    /// NMI mask register write (port 0xE4): bit 7 enables the FDC
    /// completion NMI, bit 6 the motor-off NMI. Sources latched while
    /// masked fire as soon as they are enabled.
    pub fn set_nmi_mask(&mut self, value: u8) {
        self.fdc_nmi.set_enabled(value & NMI_ENABLE_FDC != 0);
        self.fdc_motor_off_nmi
            .set_enabled(value & NMI_ENABLE_MOTOR_OFF != 0);
    }

    /// NMI status read (port 0xE4): latched sources read back as zero
    /// bits, everything else high.
    #[must_use]
    pub fn nmi_status_byte(&self) -> u8 {
        let mut status = 0xFF;
        if self.fdc_nmi.latched() {
            status &= !0x80;
        }
        if self.fdc_motor_off_nmi.latched() {
            status &= !0x40;
        }
        if self.reset_button.latched() {
            status &= !0x20;
        }
        status
    }

    #[must_use]
    pub fn nmi_pending(&self) -> bool {
        self.fdc_nmi.triggered()
            || self.fdc_motor_off_nmi.triggered()
            || self.reset_button.triggered()
    }

    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.rtc.triggered()
            || self.cassette_rising_edge.triggered()
            || self.cassette_falling_edge.triggered()
    }

    /// Hardware reset: every line returns to its power-on state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for InterruptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot for InterruptManager {
    fn save(&self, writer: &mut SnapshotWriter) {
        self.rtc.save(writer);
        self.fdc_nmi.save(writer);
        self.fdc_motor_off_nmi.save(writer);
        self.reset_button.save(writer);
        self.cassette_rising_edge.save(writer);
        self.cassette_falling_edge.save(writer);
    }

    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        let mut staged = self.clone();
        staged.rtc.restore(reader)?;
        staged.fdc_nmi.restore(reader)?;
        staged.fdc_motor_off_nmi.restore(reader)?;
        staged.reset_button.restore(reader)?;
        staged.cassette_rising_edge.restore(reader)?;
        staged.cassette_falling_edge.restore(reader)?;
        *self = staged;
        Ok(())
    }
}
