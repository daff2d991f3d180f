//! The fundamental unit of time in the emulator.

/// A count of CPU clock T-states.
///
/// All timing is expressed in T-states of the processor crystal: an
/// instruction's cost, a pulse's expiry, a motor timeout. Keeping the
/// count in its own type stops tick quantities from being mixed with
/// ordinary integers (byte counts, addresses) by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(u64);

impl Ticks {
    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Ticks remaining until `deadline`, zero if it has passed.
    #[must_use]
    pub const fn until(self, deadline: Self) -> Self {
        Self(deadline.0.saturating_sub(self.0))
    }
}

impl core::ops::Add for Ticks {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl core::ops::AddAssign for Ticks {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl core::iter::Sum for Ticks {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(Ticks::get).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_costs_accumulate() {
        let total: Ticks = [4, 7, 11].into_iter().map(Ticks::new).sum();
        assert_eq!(total, Ticks::new(22));

        let mut elapsed = Ticks::default();
        elapsed += total;
        assert_eq!(elapsed.get(), 22);
    }

    #[test]
    fn until_saturates_at_a_passed_deadline() {
        assert_eq!(Ticks::new(10).until(Ticks::new(25)), Ticks::new(15));
        assert_eq!(Ticks::new(30).until(Ticks::new(25)), Ticks::new(0));
    }
}
