//! Discrete-event pulse scheduler.
//!
//! Components that need a future hardware callback install a [`PulseReq`]
//! keyed to a tick count. The clock loop advances elapsed time after each
//! instruction and drains expired pulses in expiry order. A pulse fires at
//! most once; callbacks re-arm explicitly if they want to recur.

use emu_core::{MasterClock, Snapshot, SnapshotError, SnapshotReader, SnapshotWriter, Ticks};

/// A machine-defined pulse identity.
///
/// Each logical hardware timer (motor-off, IRQ heartbeat, sound sample,
/// cassette edge) is one kind. [`Scheduler::activate`] replaces by kind,
/// and snapshots store the kind as a single byte.
pub trait PulseKind: Copy + Eq {
    fn encode(self) -> u8;
    fn decode(byte: u8) -> Option<Self>;
}

/// Delay basis for a pulse request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// A count of T-states.
    TStates(u64),
    /// Machine-time microseconds, converted to T-states at install time.
    Microseconds(u64),
}

/// A request for one scheduled hardware callback.
#[derive(Debug, Clone, Copy)]
pub struct PulseReq<P> {
    kind: P,
    delay: Delay,
}

impl<P: PulseKind> PulseReq<P> {
    #[must_use]
    pub const fn in_tstates(kind: P, tstates: u64) -> Self {
        Self {
            kind,
            delay: Delay::TStates(tstates),
        }
    }

    #[must_use]
    pub const fn in_microseconds(kind: P, microseconds: u64) -> Self {
        Self {
            kind,
            delay: Delay::Microseconds(microseconds),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> P {
        self.kind
    }
}

/// One installed pulse. `seq` breaks expiry ties in installation order.
#[derive(Debug, Clone, Copy)]
struct Pulse<P> {
    kind: P,
    expires_at: u64,
    seq: u64,
    active: bool,
}

/// Elapsed-time counter plus the set of pending pulses.
#[derive(Debug, Clone)]
pub struct Scheduler<P> {
    master: MasterClock,
    elapsed: u64,
    next_seq: u64,
    pulses: Vec<Pulse<P>>,
}

impl<P: PulseKind> Scheduler<P> {
    #[must_use]
    pub fn new(master: MasterClock) -> Self {
        Self {
            master,
            elapsed: 0,
            next_seq: 0,
            pulses: Vec::new(),
        }
    }

    /// T-states elapsed since the last hardware reset.
    #[must_use]
    pub fn elapsed_tstates(&self) -> u64 {
        self.elapsed
    }

    /// Advance elapsed time by one instruction's cost.
    pub fn advance(&mut self, cost: Ticks) {
        self.elapsed += cost.get();
    }

    /// Install a pulse, replacing any pending pulse of the same kind.
    /// The expiry is computed from the current elapsed time, so calling
    /// this again for the same kind restarts the delay from "now".
    pub fn activate(&mut self, req: PulseReq<P>) {
        self.pulses.retain(|p| p.kind != req.kind);
        self.push(req);
    }

    /// Install a pulse without disturbing pending pulses of the same
    /// kind. Used when multiple independent timers of one kind must
    /// coexist (e.g., queued sound samples).
    pub fn add(&mut self, req: PulseReq<P>) {
        self.push(req);
    }

    /// Cooperatively cancel every pending pulse of the given kind.
    /// A cancelled pulse never fires.
    pub fn cancel(&mut self, kind: P) {
        for pulse in &mut self.pulses {
            if pulse.kind == kind {
                pulse.active = false;
            }
        }
    }

    /// Whether any pulse of the given kind is still pending.
    #[must_use]
    pub fn is_scheduled(&self, kind: P) -> bool {
        self.pulses.iter().any(|p| p.active && p.kind == kind)
    }

    /// Expiry tick of the earliest pending pulse, if any.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.pulses
            .iter()
            .filter(|p| p.active)
            .map(|p| p.expires_at)
            .min()
    }

    /// Number of pending pulses.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.pulses.iter().filter(|p| p.active).count()
    }

    /// Drain every pulse whose expiry has been reached, in ascending
    /// expiry order (ties in installation order), into `out`. Each
    /// drained pulse is deactivated; the caller dispatches them.
    pub fn take_expired(&mut self, out: &mut Vec<P>) {
        loop {
            let mut best: Option<usize> = None;
            for (i, pulse) in self.pulses.iter().enumerate() {
                if !pulse.active || pulse.expires_at > self.elapsed {
                    continue;
                }
                let earlier = best.is_none_or(|j| {
                    let other = &self.pulses[j];
                    (pulse.expires_at, pulse.seq) < (other.expires_at, other.seq)
                });
                if earlier {
                    best = Some(i);
                }
            }
            let Some(i) = best else { break };
            self.pulses[i].active = false;
            out.push(self.pulses[i].kind);
        }
        self.pulses.retain(|p| p.active);
    }

    /// Reset elapsed time and drop all pending pulses (hardware reset).
    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.next_seq = 0;
        self.pulses.clear();
    }

    fn push(&mut self, req: PulseReq<P>) {
        let ticks = match req.delay {
            Delay::TStates(t) => t,
            Delay::Microseconds(us) => self.master.ticks_for_microseconds(us).get(),
        };
        let pulse = Pulse {
            kind: req.kind,
            expires_at: self.elapsed + ticks,
            seq: self.next_seq,
            active: true,
        };
        self.next_seq += 1;
        self.pulses.push(pulse);
    }
}

impl<P: PulseKind> Snapshot for Scheduler<P> {
    fn save(&self, writer: &mut SnapshotWriter) {
        writer.write_u64(self.elapsed);
        writer.write_u64(self.next_seq);
        writer.write_u32(self.pulses.len() as u32);
        for pulse in &self.pulses {
            writer.write_u8(pulse.kind.encode());
            writer.write_u64(pulse.expires_at);
            writer.write_u64(pulse.seq);
            writer.write_bool(pulse.active);
        }
    }

    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        let elapsed = reader.read_u64()?;
        let next_seq = reader.read_u64()?;
        let count = reader.read_u32()? as usize;
        let mut pulses = Vec::with_capacity(count);
        for _ in 0..count {
            let byte = reader.read_u8()?;
            let kind = P::decode(byte)
                .ok_or_else(|| SnapshotError::InvalidData(format!("unknown pulse kind {byte}")))?;
            let expires_at = reader.read_u64()?;
            let seq = reader.read_u64()?;
            let active = reader.read_bool()?;
            pulses.push(Pulse {
                kind,
                expires_at,
                seq,
                active,
            });
        }

        self.elapsed = elapsed;
        self.next_seq = next_seq;
        self.pulses = pulses;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestPulse {
        MotorOff,
        IrqHeartbeat,
        SoundSample,
    }

    impl PulseKind for TestPulse {
        fn encode(self) -> u8 {
            match self {
                Self::MotorOff => 0,
                Self::IrqHeartbeat => 1,
                Self::SoundSample => 2,
            }
        }

        fn decode(byte: u8) -> Option<Self> {
            match byte {
                0 => Some(Self::MotorOff),
                1 => Some(Self::IrqHeartbeat),
                2 => Some(Self::SoundSample),
                _ => None,
            }
        }
    }

    fn scheduler() -> Scheduler<TestPulse> {
        Scheduler::new(MasterClock::new(2_027_520))
    }

    #[test]
    fn fires_in_expiry_order_regardless_of_install_order() {
        let mut sched = scheduler();
        sched.add(PulseReq::in_tstates(TestPulse::MotorOff, 100));
        sched.add(PulseReq::in_tstates(TestPulse::IrqHeartbeat, 50));

        let mut fired = Vec::new();
        sched.advance(Ticks::new(49));
        sched.take_expired(&mut fired);
        assert!(fired.is_empty(), "nothing is due before tick 50");

        sched.advance(Ticks::new(51));
        sched.take_expired(&mut fired);
        assert_eq!(fired, vec![TestPulse::IrqHeartbeat, TestPulse::MotorOff]);
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn tie_breaks_in_installation_order() {
        let mut sched = scheduler();
        sched.add(PulseReq::in_tstates(TestPulse::SoundSample, 10));
        sched.add(PulseReq::in_tstates(TestPulse::MotorOff, 10));

        let mut fired = Vec::new();
        sched.advance(Ticks::new(10));
        sched.take_expired(&mut fired);
        assert_eq!(fired, vec![TestPulse::SoundSample, TestPulse::MotorOff]);
    }

    #[test]
    fn activate_restarts_delay_from_now() {
        let mut sched = scheduler();
        sched.activate(PulseReq::in_tstates(TestPulse::MotorOff, 100));
        sched.advance(Ticks::new(80));
        sched.activate(PulseReq::in_tstates(TestPulse::MotorOff, 100));

        let mut fired = Vec::new();
        sched.advance(Ticks::new(50)); // tick 130 < 180
        sched.take_expired(&mut fired);
        assert!(fired.is_empty());
        assert_eq!(sched.active_count(), 1);

        sched.advance(Ticks::new(50)); // tick 180
        sched.take_expired(&mut fired);
        assert_eq!(fired, vec![TestPulse::MotorOff]);
    }

    #[test]
    fn add_leaves_both_pulses_scheduled() {
        let mut sched = scheduler();
        sched.add(PulseReq::in_tstates(TestPulse::SoundSample, 10));
        sched.add(PulseReq::in_tstates(TestPulse::SoundSample, 20));
        assert_eq!(sched.active_count(), 2);

        let mut fired = Vec::new();
        sched.advance(Ticks::new(20));
        sched.take_expired(&mut fired);
        assert_eq!(fired, vec![TestPulse::SoundSample, TestPulse::SoundSample]);
    }

    #[test]
    fn cancelled_pulse_never_fires() {
        let mut sched = scheduler();
        sched.activate(PulseReq::in_tstates(TestPulse::MotorOff, 10));
        sched.cancel(TestPulse::MotorOff);
        assert!(!sched.is_scheduled(TestPulse::MotorOff));

        let mut fired = Vec::new();
        sched.advance(Ticks::new(100));
        sched.take_expired(&mut fired);
        assert!(fired.is_empty());
    }

    #[test]
    fn microsecond_delay_converts_at_crystal_rate() {
        let mut sched = scheduler();
        // 1000 us at 2.02752 MHz = 2027 T-states (truncated).
        sched.activate(PulseReq::in_microseconds(TestPulse::MotorOff, 1000));
        assert_eq!(sched.next_due(), Some(2027));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut sched = scheduler();
        sched.advance(Ticks::new(500));
        sched.activate(PulseReq::in_tstates(TestPulse::MotorOff, 100));
        sched.add(PulseReq::in_tstates(TestPulse::SoundSample, 25));

        let mut w = SnapshotWriter::new();
        sched.save(&mut w);
        let bytes = w.into_bytes();

        let mut restored = scheduler();
        restored
            .restore(&mut SnapshotReader::new(&bytes))
            .expect("restore");
        assert_eq!(restored.elapsed_tstates(), 500);
        assert_eq!(restored.active_count(), 2);
        assert_eq!(restored.next_due(), Some(525));
    }

    #[test]
    fn unknown_pulse_kind_rejected() {
        let mut w = SnapshotWriter::new();
        w.write_u64(0); // elapsed
        w.write_u64(1); // next_seq
        w.write_u32(1); // one pulse
        w.write_u8(0xEE); // bogus kind
        w.write_u64(10);
        w.write_u64(0);
        w.write_bool(true);
        let bytes = w.into_bytes();

        let mut sched = scheduler();
        let err = sched.restore(&mut SnapshotReader::new(&bytes));
        assert!(matches!(err, Err(SnapshotError::InvalidData(_))));
    }
}
