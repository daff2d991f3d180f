//! The clock run loop.
//!
//! [`Clock`] owns the machine and the pulse scheduler and advances them one
//! instruction at a time. [`ClockHandle`] runs that loop on its own thread
//! and is the only surface other threads touch: start, stop, single-step,
//! speed control, and (while stopped) state access.
//!
//! Pulse callbacks are dispatched synchronously on the loop thread, after
//! the instruction whose T-state cost carried elapsed time past their
//! expiry. Nothing else ever advances machine time, so a callback that
//! flips a [`crate::Trigger`] can never race processor state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use emu_core::{MasterClock, Snapshot, SnapshotError, SnapshotReader, SnapshotWriter, Ticks};

use crate::scheduler::{PulseKind, Scheduler};

/// The machine as the clock loop sees it: execute one instruction, and
/// handle the pulses whose expiry that instruction carried time past.
pub trait ClockClient {
    type Pulse: PulseKind;

    /// Execute the next instruction and return its T-state cost.
    fn execute_instruction(&mut self) -> Ticks;

    /// Handle one expired pulse. The scheduler is passed back in so the
    /// handler can re-arm itself or schedule follow-up pulses.
    fn pulse(&mut self, pulse: Self::Pulse, scheduler: &mut Scheduler<Self::Pulse>);
}

/// The single-threaded timing core: machine + scheduler + elapsed time.
pub struct Clock<M: ClockClient> {
    machine: M,
    scheduler: Scheduler<M::Pulse>,
    master: MasterClock,
    /// Scratch buffer for expired pulses, reused across instructions.
    fired: Vec<M::Pulse>,
}

impl<M: ClockClient> Clock<M> {
    pub fn new(machine: M, master: MasterClock) -> Self {
        Self {
            machine,
            scheduler: Scheduler::new(master),
            master,
            fired: Vec::new(),
        }
    }

    #[must_use]
    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<M::Pulse> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<M::Pulse> {
        &mut self.scheduler
    }

    /// T-states since the last hardware reset.
    #[must_use]
    pub fn elapsed_tstates(&self) -> u64 {
        self.scheduler.elapsed_tstates()
    }

    /// One iteration of the run loop: execute an instruction, account
    /// its cost, then dispatch every pulse that expired, in expiry order.
    pub fn run_one_instruction(&mut self) {
        let cost = self.machine.execute_instruction();
        self.scheduler.advance(cost);

        let mut fired = std::mem::take(&mut self.fired);
        self.scheduler.take_expired(&mut fired);
        for pulse in fired.drain(..) {
            self.machine.pulse(pulse, &mut self.scheduler);
        }
        self.fired = fired;
    }

    /// Plain-text clock report for debug displays.
    #[must_use]
    pub fn internals_report(&self, include_tick_count: bool) -> String {
        let mut report = format!(
            "Crystal: {} Hz\nPending pulses: {}",
            self.master.frequency_hz,
            self.scheduler.active_count(),
        );
        if let Some(due) = self.scheduler.next_due() {
            report.push_str(&format!("\nNext pulse due: T-state {due}"));
        }
        if include_tick_count {
            report.push_str(&format!(
                "\nElapsed T-states: {}",
                self.scheduler.elapsed_tstates()
            ));
        }
        report
    }
}

impl<M: ClockClient> Snapshot for Clock<M> {
    fn save(&self, writer: &mut SnapshotWriter) {
        self.scheduler.save(writer);
    }

    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        self.scheduler.restore(reader)
    }
}

/// Flags shared between the control surface and the loop thread.
struct ClockShared {
    /// The loop keeps going while this is set.
    run_requested: AtomicBool,
    /// Set for the whole lifetime of a loop pass; cleared (even on
    /// panic) once the loop has fully exited.
    running: AtomicBool,
    /// Throttle to the crystal rate when set; run flat out otherwise.
    normal_speed: AtomicBool,
}

/// Clears the running flag when the loop thread exits, however it exits.
struct RunningGuard(Arc<ClockShared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Thread-facing control surface for a [`Clock`].
///
/// Only the loop thread ever executes instructions or dispatches pulses.
/// Other threads start and stop the loop, step while stopped, and read
/// state through [`ClockHandle::with_clock`] between runs.
pub struct ClockHandle<M>
where
    M: ClockClient + Send + 'static,
    M::Pulse: Send,
{
    clock: Arc<Mutex<Clock<M>>>,
    shared: Arc<ClockShared>,
    worker: Option<JoinHandle<()>>,
    speed_observers: Vec<Box<dyn Fn(bool) + Send>>,
}

impl<M> ClockHandle<M>
where
    M: ClockClient + Send + 'static,
    M::Pulse: Send,
{
    #[must_use]
    pub fn new(clock: Clock<M>, normal_speed: bool) -> Self {
        Self {
            clock: Arc::new(Mutex::new(clock)),
            shared: Arc::new(ClockShared {
                run_requested: AtomicBool::new(false),
                running: AtomicBool::new(false),
                normal_speed: AtomicBool::new(normal_speed),
            }),
            worker: None,
            speed_observers: Vec::new(),
        }
    }

    /// Begin the run loop on its own thread. Idempotent while running.
    pub fn start(&mut self) {
        // A live run request plus a running loop means the loop stays up.
        if self.shared.run_requested.load(Ordering::Acquire) && self.is_running() {
            return;
        }
        // Otherwise any loop still showing as running is mid-exit from a
        // non-blocking stop. The run request is false, so it is guaranteed
        // to drain; wait it out before re-asserting the request, or the
        // old loop could pick the request up and the new thread never
        // spawn.
        while self.shared.running.load(Ordering::Acquire) {
            thread::yield_now();
        }
        self.reap_worker();

        self.shared.run_requested.store(true, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let clock = Arc::clone(&self.clock);
        let shared = Arc::clone(&self.shared);
        self.worker = Some(thread::spawn(move || run_loop(&clock, shared)));
    }

    /// Request the loop to exit after its current instruction. With
    /// `wait_for_stop`, does not return until the loop has observably
    /// exited, so the caller never sees a partially executed instruction
    /// or a half-applied pulse.
    pub fn stop(&mut self, wait_for_stop: bool) {
        self.shared.run_requested.store(false, Ordering::Release);
        if wait_for_stop {
            while self.shared.running.load(Ordering::Acquire) {
                thread::yield_now();
            }
            self.reap_worker();
        }
    }

    /// Execute exactly one instruction while stopped, honoring pulse
    /// expiry for that slice of time. Returns false (and does nothing)
    /// while the loop is running.
    pub fn single_step(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.reap_worker();
        let Ok(mut clock) = self.clock.try_lock() else {
            return false;
        };
        clock.run_one_instruction();
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn normal_speed(&self) -> bool {
        self.shared.normal_speed.load(Ordering::Acquire)
    }

    /// Toggle between crystal-rate and unthrottled execution. Observers
    /// registered with [`ClockHandle::on_speed_changed`] are notified on
    /// an actual change.
    pub fn set_normal_speed(&self, normal_speed: bool) {
        let previous = self.shared.normal_speed.swap(normal_speed, Ordering::AcqRel);
        if previous != normal_speed {
            for observer in &self.speed_observers {
                observer(normal_speed);
            }
        }
    }

    /// Register a speed-change observer (e.g., mute audio while fast
    /// forwarding).
    pub fn on_speed_changed(&mut self, observer: impl Fn(bool) + Send + 'static) {
        self.speed_observers.push(Box::new(observer));
    }

    /// Access the clock while the loop is stopped. Returns `None` while
    /// the loop thread holds the state.
    pub fn with_clock<R>(&self, f: impl FnOnce(&mut Clock<M>) -> R) -> Option<R> {
        let Ok(mut clock) = self.clock.try_lock() else {
            return None;
        };
        Some(f(&mut clock))
    }

    fn reap_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            // The loop has already cleared the running flag; joining only
            // collects the finished thread.
            let _ = worker.join();
        }
    }
}

impl<M> Drop for ClockHandle<M>
where
    M: ClockClient + Send + 'static,
    M::Pulse: Send,
{
    fn drop(&mut self) {
        self.stop(true);
    }
}

fn run_loop<M>(clock: &Mutex<Clock<M>>, shared: Arc<ClockShared>)
where
    M: ClockClient + Send,
    M::Pulse: Send,
{
    // Declared before the lock so the running flag clears only after the
    // clock state has been released, even if the machine panics.
    let _guard = RunningGuard(Arc::clone(&shared));
    let mut clock = clock.lock().unwrap_or_else(PoisonError::into_inner);
    let frequency = clock.master.frequency_hz;
    let mut throttle = Throttle::new(clock.elapsed_tstates());
    let mut instructions: u64 = 0;

    while shared.run_requested.load(Ordering::Acquire) {
        clock.run_one_instruction();
        instructions += 1;
        // Wall-clock checks are far coarser than instruction granularity.
        if instructions.is_multiple_of(1024) {
            let normal = shared.normal_speed.load(Ordering::Acquire);
            throttle.pace(clock.elapsed_tstates(), normal, frequency);
        }
    }
}

/// Paces the loop to the crystal rate by comparing virtual elapsed time
/// against the wall clock and sleeping off any lead. Re-anchors
/// periodically (and on speed toggles) so a long fast-forward does not
/// turn into a sleep marathon afterwards.
struct Throttle {
    anchor: Instant,
    anchor_ticks: u64,
    throttled: bool,
}

impl Throttle {
    fn new(elapsed_ticks: u64) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_ticks: elapsed_ticks,
            throttled: false,
        }
    }

    fn pace(&mut self, elapsed_ticks: u64, normal_speed: bool, frequency_hz: u64) {
        if normal_speed != self.throttled {
            self.throttled = normal_speed;
            self.anchor = Instant::now();
            self.anchor_ticks = elapsed_ticks;
        }
        if !normal_speed {
            return;
        }

        let virtual_secs = (elapsed_ticks - self.anchor_ticks) as f64 / frequency_hz as f64;
        let wall_secs = self.anchor.elapsed().as_secs_f64();
        let lead = virtual_secs - wall_secs;
        if lead > 0.000_5 {
            thread::sleep(Duration::from_secs_f64(lead));
        }

        if wall_secs >= 1.0 {
            self.anchor = Instant::now();
            self.anchor_ticks = elapsed_ticks;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PulseReq;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestPulse {
        MotorOff,
        Heartbeat,
    }

    impl PulseKind for TestPulse {
        fn encode(self) -> u8 {
            match self {
                Self::MotorOff => 0,
                Self::Heartbeat => 1,
            }
        }

        fn decode(byte: u8) -> Option<Self> {
            match byte {
                0 => Some(Self::MotorOff),
                1 => Some(Self::Heartbeat),
                _ => None,
            }
        }
    }

    /// A fake machine: every instruction costs four T-states; fired
    /// pulses are recorded, and heartbeats re-arm themselves.
    struct TestMachine {
        executed: u64,
        fired: Vec<(TestPulse, u64)>,
        heartbeat_period: Option<u64>,
    }

    impl TestMachine {
        fn new() -> Self {
            Self {
                executed: 0,
                fired: Vec::new(),
                heartbeat_period: None,
            }
        }
    }

    impl ClockClient for TestMachine {
        type Pulse = TestPulse;

        fn execute_instruction(&mut self) -> Ticks {
            self.executed += 1;
            Ticks::new(4)
        }

        fn pulse(&mut self, pulse: TestPulse, scheduler: &mut Scheduler<TestPulse>) {
            self.fired.push((pulse, scheduler.elapsed_tstates()));
            if pulse == TestPulse::Heartbeat {
                if let Some(period) = self.heartbeat_period {
                    scheduler.activate(PulseReq::in_tstates(TestPulse::Heartbeat, period));
                }
            }
        }
    }

    fn clock() -> Clock<TestMachine> {
        Clock::new(TestMachine::new(), MasterClock::new(2_027_520))
    }

    #[test]
    fn instruction_cost_accumulates() {
        let mut clock = clock();
        clock.run_one_instruction();
        clock.run_one_instruction();
        assert_eq!(clock.elapsed_tstates(), 8);
        assert_eq!(clock.machine().executed, 2);
    }

    #[test]
    fn pulse_fires_after_expiry_on_loop_thread() {
        let mut clock = clock();
        clock
            .scheduler_mut()
            .activate(PulseReq::in_tstates(TestPulse::MotorOff, 10));

        // Two instructions reach tick 8: not due yet.
        clock.run_one_instruction();
        clock.run_one_instruction();
        assert!(clock.machine().fired.is_empty());

        // Third instruction passes tick 10.
        clock.run_one_instruction();
        assert_eq!(clock.machine().fired, vec![(TestPulse::MotorOff, 12)]);
    }

    #[test]
    fn rearming_heartbeat_recurs() {
        let mut clock = clock();
        clock.machine_mut().heartbeat_period = Some(20);
        clock
            .scheduler_mut()
            .activate(PulseReq::in_tstates(TestPulse::Heartbeat, 20));

        for _ in 0..25 {
            clock.run_one_instruction();
        }
        // 100 T-states at one beat per 20: five beats.
        assert_eq!(clock.machine().fired.len(), 5);
    }

    #[test]
    fn stop_with_wait_quiesces_the_loop() {
        let mut handle = ClockHandle::new(clock(), false);
        handle.start();
        assert!(handle.is_running());
        thread::sleep(Duration::from_millis(20));

        handle.stop(true);
        assert!(!handle.is_running());

        let elapsed = handle
            .with_clock(|c| (c.elapsed_tstates(), c.machine().executed))
            .expect("stopped clock is accessible");
        // Every executed instruction was fully accounted.
        assert_eq!(elapsed.0, elapsed.1 * 4);
        assert!(elapsed.1 > 0, "the loop ran at all");
    }

    #[test]
    fn start_after_nonblocking_stop_always_restarts() {
        // A non-blocking stop leaves the old loop draining; an immediate
        // start must wait out the drain and spawn a fresh loop rather
        // than mistaking the dying loop for a live one.
        let mut handle = ClockHandle::new(clock(), false);
        handle.start();
        for _ in 0..1000 {
            handle.stop(false);
            handle.start();
            assert!(handle.is_running(), "restart was lost");
        }
        handle.stop(true);

        let executed = handle
            .with_clock(|c| c.machine().executed)
            .expect("stopped");
        assert!(executed > 0);
    }

    #[test]
    fn start_is_idempotent_and_resumes_cleanly() {
        let mut handle = ClockHandle::new(clock(), false);
        handle.start();
        handle.start();
        thread::sleep(Duration::from_millis(10));
        handle.stop(true);

        let before = handle.with_clock(|c| c.elapsed_tstates()).expect("stopped");
        handle.start();
        thread::sleep(Duration::from_millis(10));
        handle.stop(true);
        let after = handle.with_clock(|c| c.elapsed_tstates()).expect("stopped");
        assert!(after > before, "second run resumed from quiesced state");
    }

    #[test]
    fn single_step_executes_exactly_one_instruction() {
        let mut handle = ClockHandle::new(clock(), true);
        assert!(handle.single_step());
        assert!(handle.single_step());
        let (elapsed, executed) = handle
            .with_clock(|c| (c.elapsed_tstates(), c.machine().executed))
            .expect("stopped");
        assert_eq!(executed, 2);
        assert_eq!(elapsed, 8);
    }

    #[test]
    fn single_step_honors_pulse_expiry() {
        let mut handle = ClockHandle::new(clock(), true);
        handle.with_clock(|c| {
            c.scheduler_mut()
                .activate(PulseReq::in_tstates(TestPulse::MotorOff, 3));
        });
        handle.single_step();
        let fired = handle
            .with_clock(|c| c.machine().fired.clone())
            .expect("stopped");
        assert_eq!(fired, vec![(TestPulse::MotorOff, 4)]);
    }

    #[test]
    fn single_step_refused_while_running() {
        let mut handle = ClockHandle::new(clock(), false);
        handle.start();
        assert!(!handle.single_step());
        handle.stop(true);
    }

    #[test]
    fn speed_change_notifies_observers_once_per_toggle() {
        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handle = ClockHandle::new(clock(), true);
        let observed = Arc::clone(&count);
        handle.on_speed_changed(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        handle.set_normal_speed(true); // no change
        handle.set_normal_speed(false);
        handle.set_normal_speed(false); // no change
        handle.set_normal_speed(true);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn internals_report_mentions_pending_pulses() {
        let mut clock = clock();
        clock
            .scheduler_mut()
            .activate(PulseReq::in_tstates(TestPulse::MotorOff, 64));
        let report = clock.internals_report(true);
        assert!(report.contains("Pending pulses: 1"));
        assert!(report.contains("T-state 64"));
        assert!(report.contains("Elapsed T-states: 0"));
        assert!(!clock.internals_report(false).contains("Elapsed"));
    }
}
