//! Whole-machine snapshot container.
//!
//! A snapshot file is a `u32` format version followed by one
//! length-prefixed block per subsystem, in fixed order: processor, clock,
//! floppy controller, interrupt manager, screen, tape. Version 2 predates
//! the tape block and carries five sections.
//!
//! Loading is staged: [`stage_snapshot`] checks the version and splits
//! every block without touching machine state, and only a successful
//! stage can be committed. A truncated or incompatible file therefore
//! never leaves the machine half-restored.

use emu_core::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 3;

/// Oldest format version this build still reads.
pub const OLDEST_SUPPORTED_SNAPSHOT: u32 = 2;

/// Number of subsystem sections in the current format.
pub const SECTION_COUNT: usize = 6;

/// Serialise the machine. `sections` must hold all [`SECTION_COUNT`]
/// subsystems in container order.
#[must_use]
pub fn save_snapshot(sections: &[&dyn Snapshot]) -> Vec<u8> {
    debug_assert_eq!(sections.len(), SECTION_COUNT);

    let mut container = SnapshotWriter::new();
    container.write_u32(SNAPSHOT_VERSION);
    for section in sections {
        let mut body = SnapshotWriter::new();
        section.save(&mut body);
        container.write_block(&body.into_bytes());
    }
    container.into_bytes()
}

/// A validated snapshot: version accepted, every section block located.
/// Holds borrowed slices; no machine state has been touched yet.
#[derive(Debug)]
pub struct StagedSnapshot<'a> {
    version: u32,
    blocks: Vec<&'a [u8]>,
}

/// Validate a snapshot file and split it into section blocks.
///
/// # Errors
///
/// `UnsupportedVersion` for files newer than this build or older than
/// the supported range; `UnexpectedEnd` for truncated files.
pub fn stage_snapshot(data: &[u8]) -> Result<StagedSnapshot<'_>, SnapshotError> {
    let mut reader = SnapshotReader::new(data);
    let version = reader.read_u32()?;
    if !(OLDEST_SUPPORTED_SNAPSHOT..=SNAPSHOT_VERSION).contains(&version) {
        return Err(SnapshotError::UnsupportedVersion { found: version });
    }

    // Version 2 has no tape section.
    let count = if version >= 3 {
        SECTION_COUNT
    } else {
        SECTION_COUNT - 1
    };
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        blocks.push(reader.read_block()?);
    }
    Ok(StagedSnapshot { version, blocks })
}

impl StagedSnapshot<'_> {
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Restore every staged section, in container order. Sections the
    /// staged version does not carry (the tape block before version 3)
    /// are left at their current state.
    pub fn commit(&self, sections: &mut [&mut dyn Snapshot]) -> Result<(), SnapshotError> {
        debug_assert_eq!(sections.len(), SECTION_COUNT);

        for (section, block) in sections.iter_mut().zip(&self.blocks) {
            section.restore(&mut SnapshotReader::new(block))?;
        }
        Ok(())
    }
}

/// Stage and commit in one call, for callers with no use for the
/// intermediate staged form.
pub fn load_snapshot(
    data: &[u8],
    sections: &mut [&mut dyn Snapshot],
) -> Result<(), SnapshotError> {
    stage_snapshot(data)?.commit(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stand-in subsystem: one u64 of state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Register(u64);

    impl Snapshot for Register {
        fn save(&self, writer: &mut SnapshotWriter) {
            writer.write_u64(self.0);
        }

        fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
            self.0 = reader.read_u64()?;
            Ok(())
        }
    }

    fn machine() -> [Register; SECTION_COUNT] {
        [
            Register(1),
            Register(2),
            Register(3),
            Register(4),
            Register(5),
            Register(6),
        ]
    }

    fn save(sections: &[Register; SECTION_COUNT]) -> Vec<u8> {
        let refs: Vec<&dyn Snapshot> = sections.iter().map(|s| s as &dyn Snapshot).collect();
        save_snapshot(&refs)
    }

    fn load(data: &[u8], sections: &mut [Register; SECTION_COUNT]) -> Result<(), SnapshotError> {
        let mut refs: Vec<&mut dyn Snapshot> = sections
            .iter_mut()
            .map(|s| s as &mut dyn Snapshot)
            .collect();
        load_snapshot(data, &mut refs)
    }

    #[test]
    fn round_trip_restores_every_section_in_order() {
        let saved = machine();
        let bytes = save(&saved);

        let mut target = [Register(0); SECTION_COUNT];
        load(&bytes, &mut target).expect("load");
        assert_eq!(target, saved);
    }

    #[test]
    fn future_version_rejected_without_mutation() {
        let mut bytes = save(&machine());
        bytes[..4].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());

        let mut target = [Register(9); SECTION_COUNT];
        let err = load(&bytes, &mut target);
        assert!(matches!(
            err,
            Err(SnapshotError::UnsupportedVersion { found }) if found == SNAPSHOT_VERSION + 1
        ));
        assert_eq!(target, [Register(9); SECTION_COUNT]);
    }

    #[test]
    fn ancient_version_rejected() {
        let mut bytes = save(&machine());
        bytes[..4].copy_from_slice(&1u32.to_le_bytes());

        let mut target = machine();
        assert!(matches!(
            load(&bytes, &mut target),
            Err(SnapshotError::UnsupportedVersion { found: 1 })
        ));
    }

    #[test]
    fn truncated_file_fails_at_stage_without_mutation() {
        let bytes = save(&machine());

        let mut target = [Register(7); SECTION_COUNT];
        let err = load(&bytes[..bytes.len() - 3], &mut target);
        assert!(matches!(err, Err(SnapshotError::UnexpectedEnd)));
        assert_eq!(target, [Register(7); SECTION_COUNT], "stage must not mutate");
    }

    #[test]
    fn version_two_leaves_tape_section_untouched() {
        // Hand-build a five-section version 2 container.
        let mut w = SnapshotWriter::new();
        w.write_u32(2);
        for value in 1..=5u64 {
            let mut body = SnapshotWriter::new();
            body.write_u64(value * 10);
            w.write_block(&body.into_bytes());
        }
        let bytes = w.into_bytes();

        let mut target = [Register(0); SECTION_COUNT];
        target[5] = Register(999); // tape
        load(&bytes, &mut target).expect("v2 load");
        assert_eq!(target[0], Register(10));
        assert_eq!(target[4], Register(50));
        assert_eq!(target[5], Register(999), "tape predates v2");
    }

    #[test]
    fn staged_version_is_reported() {
        let bytes = save(&machine());
        let staged = stage_snapshot(&bytes).expect("stage");
        assert_eq!(staged.version(), SNAPSHOT_VERSION);
    }
}
