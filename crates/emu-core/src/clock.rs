//! Master clock configuration.

use crate::Ticks;

/// Master clock configuration for a system.
///
/// The machine has one crystal that drives all timing. Components may run
/// at divided rates, but everything derives from this frequency.
#[derive(Debug, Clone, Copy)]
pub struct MasterClock {
    /// Crystal frequency in Hz (e.g., `2_027_520` for the Model III).
    pub frequency_hz: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// T-states elapsed in the given number of microseconds of machine
    /// time (truncating). Used to schedule hardware delays that the
    /// datasheets give in wall-clock units.
    #[must_use]
    pub const fn ticks_for_microseconds(&self, microseconds: u64) -> Ticks {
        Ticks::new((microseconds as u128 * self.frequency_hz as u128 / 1_000_000) as u64)
    }

    /// T-states per frame at the given refresh rate (integer division).
    #[must_use]
    pub const fn ticks_per_frame(&self, frames_per_second: u64) -> Ticks {
        Ticks::new(self.frequency_hz / frames_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microsecond_conversion_truncates() {
        let clock = MasterClock::new(2_027_520);
        // One second of microseconds is exactly the crystal rate.
        assert_eq!(clock.ticks_for_microseconds(1_000_000).get(), 2_027_520);
        // 500 us at 2.02752 MHz = 1013.76 T-states, truncated.
        assert_eq!(clock.ticks_for_microseconds(500).get(), 1013);
    }

    #[test]
    fn frame_ticks() {
        let clock = MasterClock::new(2_027_520);
        assert_eq!(clock.ticks_per_frame(30).get(), 67_584);
    }
}
