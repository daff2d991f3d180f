//! End-to-end snapshot container test: a machine's worth of sections,
//! including a real floppy image, saved and restored through the
//! versioned container.

use emu_core::{MasterClock, Snapshot, SnapshotError, SnapshotReader, SnapshotWriter, Ticks};
use emu_trs80::{
    CLOCK_RATE_HZ, Clock, ClockClient, InterruptManager, PulseKind, PulseReq, Scheduler,
    load_snapshot, save_snapshot, stage_snapshot,
};
use format_dmk::{Dam, Floppy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pulse {
    MotorOff,
}

impl PulseKind for Pulse {
    fn encode(self) -> u8 {
        0
    }

    fn decode(byte: u8) -> Option<Self> {
        (byte == 0).then_some(Pulse::MotorOff)
    }
}

struct Machine;

impl ClockClient for Machine {
    type Pulse = Pulse;

    fn execute_instruction(&mut self) -> Ticks {
        Ticks::new(4)
    }

    fn pulse(&mut self, _pulse: Pulse, _scheduler: &mut Scheduler<Pulse>) {}
}

/// Stand-in for a section whose internals live elsewhere (processor,
/// screen, tape): a handful of bytes that must survive verbatim.
struct Blob(Vec<u8>);

impl Snapshot for Blob {
    fn save(&self, writer: &mut SnapshotWriter) {
        writer.write_block(&self.0);
    }

    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        self.0 = reader.read_block()?.to_vec();
        Ok(())
    }
}

#[test]
fn full_machine_roundtrip() {
    let processor = Blob(vec![0x3E, 0x42, 0xC9]);
    let mut clock = Clock::new(Machine, MasterClock::new(CLOCK_RATE_HZ));
    clock
        .scheduler_mut()
        .activate(PulseReq::in_microseconds(Pulse::MotorOff, 2_000_000));
    clock.run_one_instruction();

    let mut floppy = Floppy::blank_formatted();
    floppy.set_file_path("scripsit.dmk");
    floppy.write_sector(1, false, 7, Dam::Normal, &[0x5A; 0x100]);

    let mut interrupts = InterruptManager::new();
    interrupts.rtc_tick();

    let screen = Blob(vec![b' '; 64]);
    let tape = Blob(vec![0x55; 16]);

    let bytes = save_snapshot(&[&processor, &clock, &floppy, &interrupts, &screen, &tape]);

    // Restore into a machine that looks nothing like the saved one.
    let mut processor2 = Blob(Vec::new());
    let mut clock2 = Clock::new(Machine, MasterClock::new(CLOCK_RATE_HZ));
    let mut floppy2 = Floppy::blank_unformatted();
    let mut interrupts2 = InterruptManager::new();
    let mut screen2 = Blob(Vec::new());
    let mut tape2 = Blob(Vec::new());

    load_snapshot(
        &bytes,
        &mut [
            &mut processor2,
            &mut clock2,
            &mut floppy2,
            &mut interrupts2,
            &mut screen2,
            &mut tape2,
        ],
    )
    .expect("snapshot restores");

    assert_eq!(processor2.0, vec![0x3E, 0x42, 0xC9]);
    assert_eq!(clock2.elapsed_tstates(), 4);
    assert!(clock2.scheduler().is_scheduled(Pulse::MotorOff));
    assert_eq!(
        clock2.scheduler().next_due(),
        clock.scheduler().next_due(),
        "pulse expiry survives"
    );
    assert_eq!(floppy2.file_path(), "scripsit.dmk");
    assert_eq!(
        floppy2.read_sector(1, false, 7).expect("sector restored").data,
        vec![0x5A; 0x100]
    );
    assert_eq!(interrupts2.nmi_pending(), interrupts.nmi_pending());
    assert_eq!(screen2.0, vec![b' '; 64]);
    assert_eq!(tape2.0, vec![0x55; 16]);
}

#[test]
fn corrupt_container_leaves_every_section_untouched() {
    let sections: [&dyn Snapshot; 6] = [
        &Blob(vec![1]),
        &Blob(vec![2]),
        &Blob(vec![3]),
        &Blob(vec![4]),
        &Blob(vec![5]),
        &Blob(vec![6]),
    ];
    let mut bytes = save_snapshot(&sections);
    bytes.truncate(bytes.len() - 1);

    let target = Blob(vec![0xAA]);
    let staged = stage_snapshot(&bytes);
    assert!(staged.is_err(), "truncated container fails at staging");
    assert_eq!(target.0, vec![0xAA], "nothing was committed");
}
