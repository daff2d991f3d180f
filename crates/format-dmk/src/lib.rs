//! Floppy disk images for the TRS-80 Model III.
//!
//! Three interchange formats are understood: DMK (raw track images,
//! the canonical form), JV1 (bare single-density sector dumps), and
//! JV3 (sector dumps with per-sector metadata). Whatever the source,
//! a loaded disk is held as raw track bytes and sectors are recovered
//! by scanning, so controller-level detail such as deleted data marks
//! and deliberate CRC errors survives.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use emu_core::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};
use log::{debug, warn};

pub mod crc;
mod dmk;
mod jv1;
mod jv3;
pub mod track;
pub mod trsdos;

pub use track::{Dam, SectorDescriptor, Track, TrackBuilder};

pub const MAX_TRACKS: u8 = 80;
pub const MAX_SECTORS_PER_TRACK: usize = 0x40;
pub const STANDARD_TRACK_LENGTH_SD: usize = 0x0E00;
pub const STANDARD_TRACK_LENGTH_DD: usize = 0x1880;
pub const MAX_TRACK_LENGTH: usize = 0x3980;

pub const IDAM: u8 = 0xFE;
pub const DAM_NORMAL: u8 = 0xFB;
pub const DAM_DELETED: u8 = 0xF8;
pub const FILLER_SD: u8 = 0xFF;
pub const FILLER_DD: u8 = 0x4E;

/// Placeholder paths for drive slots and disks that did not come from
/// a file.
pub const FILE_NAME_NONE: &str = "<empty>";
pub const FILE_NAME_BLANK: &str = "<blank>";
pub const FILE_NAME_UNFORMATTED: &str = "<unformatted>";

#[derive(Debug)]
pub enum FloppyError {
    Io(io::Error),
    Empty,
    Malformed(String),
}

impl fmt::Display for FloppyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloppyError::Io(e) => write!(f, "i/o error: {e}"),
            FloppyError::Empty => write!(f, "image file is empty"),
            FloppyError::Malformed(why) => write!(f, "malformed image: {why}"),
        }
    }
}

impl std::error::Error for FloppyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FloppyError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FloppyError {
    fn from(e: io::Error) -> FloppyError {
        FloppyError::Io(e)
    }
}

/// The interchange format an image was loaded from. Writing back
/// prefers this format when the disk is still expressible in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Dmk,
    Jv1,
    Jv3,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceFormat::Dmk => "DMK",
            SourceFormat::Jv1 => "JV1",
            SourceFormat::Jv3 => "JV3",
        })
    }
}

/// A loaded floppy disk.
#[derive(Debug, Clone)]
pub struct Floppy {
    file_path: String,
    source: SourceFormat,
    write_protected: bool,
    changed: bool,
    tracks: Vec<Track>,
}

impl Floppy {
    /// Reads and decodes an image file. The extension picks the
    /// decoder when it names one; otherwise the contents are sniffed.
    pub fn load(path: &Path) -> Result<Floppy, FloppyError> {
        let data = fs::read(path).map_err(|e| {
            warn!("failed to read floppy image {}: {e}", path.display());
            e
        })?;
        let extension = path.extension().and_then(|e| e.to_str());
        let mut floppy = Floppy::from_bytes(&data, extension)?;
        floppy.file_path = path.display().to_string();
        debug!(
            "loaded {} as {}: {} tracks, {}",
            path.display(),
            floppy.source,
            floppy.num_tracks(),
            if floppy.double_sided() {
                "double sided"
            } else {
                "single sided"
            }
        );
        Ok(floppy)
    }

    /// Decodes an in-memory image. Format selection: a recognized
    /// extension wins; else a length divisible by the JV1 track size
    /// means JV1, zeroes in the reserved DMK header bytes 0x0C..0x10
    /// mean DMK, and anything else is tried as JV3.
    pub fn from_bytes(data: &[u8], extension: Option<&str>) -> Result<Floppy, FloppyError> {
        if data.is_empty() {
            return Err(FloppyError::Empty);
        }
        let source = match extension.map(str::to_ascii_lowercase).as_deref() {
            Some("dmk") => SourceFormat::Dmk,
            Some("jv1") => SourceFormat::Jv1,
            Some("jv3") => SourceFormat::Jv3,
            _ => {
                if data.len() % jv1::TRACK_BYTES == 0 {
                    SourceFormat::Jv1
                } else if data.len() >= 0x10 && data[0x0C..0x10] == [0, 0, 0, 0] {
                    SourceFormat::Dmk
                } else {
                    SourceFormat::Jv3
                }
            }
        };
        let (write_protected, tracks) = match source {
            SourceFormat::Dmk => {
                let image = dmk::parse(data)?;
                (image.write_protected, image.tracks)
            }
            SourceFormat::Jv1 => (false, jv1::parse(data)?),
            SourceFormat::Jv3 => (jv3::write_protected(data), jv3::parse(data)?),
        };
        Ok(Floppy {
            file_path: String::new(),
            source,
            write_protected,
            changed: false,
            tracks,
        })
    }

    /// A formatted blank disk: 40 tracks, single sided, double
    /// density, eighteen 256-byte sectors per track.
    #[must_use]
    pub fn blank_formatted() -> Floppy {
        let mut tracks = Vec::with_capacity(40);
        for t in 0..40u8 {
            let mut builder = TrackBuilder::new(true);
            for sector in 0..18u8 {
                let dam = if t == 17 { Dam::Deleted } else { Dam::Normal };
                builder.add_sector(t, false, sector, dam, &[0xE5; 0x100], true, true);
            }
            tracks.push(builder.build(t, false));
        }
        Floppy {
            file_path: FILE_NAME_BLANK.to_string(),
            source: SourceFormat::Dmk,
            write_protected: false,
            changed: false,
            tracks,
        }
    }

    /// A disk with no address marks at all, as from the factory.
    #[must_use]
    pub fn blank_unformatted() -> Floppy {
        let tracks = (0..40u8).map(|t| Track::unformatted(t, false)).collect();
        Floppy {
            file_path: FILE_NAME_UNFORMATTED.to_string(),
            source: SourceFormat::Dmk,
            write_protected: false,
            changed: false,
            tracks,
        }
    }

    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn set_file_path(&mut self, path: &str) {
        self.file_path = path.to_string();
    }

    #[must_use]
    pub fn source_format(&self) -> SourceFormat {
        self.source
    }

    #[must_use]
    pub fn write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, write_protected: bool) {
        if self.write_protected != write_protected {
            self.write_protected = write_protected;
            self.changed = true;
        }
    }

    /// One past the highest physical track number present.
    #[must_use]
    pub fn num_tracks(&self) -> u8 {
        self.tracks
            .iter()
            .map(|t| t.physical_track_number() + 1)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn double_sided(&self) -> bool {
        self.tracks.iter().any(Track::side_one)
    }

    /// Whether any track holds a readable sector.
    #[must_use]
    pub fn formatted(&self) -> bool {
        self.tracks.iter().any(Track::formatted)
    }

    /// True once any sector write or attribute change has happened
    /// since the disk was loaded or last saved.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed || self.tracks.iter().any(Track::changed)
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
        for track in &mut self.tracks {
            track.clear_changed();
        }
    }

    #[must_use]
    pub fn track(&self, physical_track: u8, side_one: bool) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| t.physical_track_number() == physical_track && t.side_one() == side_one)
    }

    pub fn track_mut(&mut self, physical_track: u8, side_one: bool) -> Option<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.physical_track_number() == physical_track && t.side_one() == side_one)
    }

    #[must_use]
    pub fn sector_count(&self, physical_track: u8, side_one: bool) -> usize {
        self.track(physical_track, side_one)
            .map_or(0, |t| t.sectors().len())
    }

    /// Reads one sector by its ID-field sector number.
    #[must_use]
    pub fn read_sector(
        &self,
        physical_track: u8,
        side_one: bool,
        sector_number: u8,
    ) -> Option<SectorDescriptor> {
        self.track(physical_track, side_one)?
            .sectors()
            .into_iter()
            .find(|s| s.sector_number == sector_number)
    }

    /// Rewrites one sector in place. Refused on a write-protected disk
    /// or when the sector does not exist.
    pub fn write_sector(
        &mut self,
        physical_track: u8,
        side_one: bool,
        sector_number: u8,
        dam: Dam,
        payload: &[u8],
    ) -> bool {
        if self.write_protected {
            return false;
        }
        self.track_mut(physical_track, side_one)
            .is_some_and(|t| t.write_sector(sector_number, dam, payload))
    }

    /// Encodes the disk for writing back to a file.
    ///
    /// By default the source format is preferred, falling back to DMK
    /// when the disk no longer fits it (a JV1 disk reformatted double
    /// density, for instance). `force_canonical` always yields DMK.
    #[must_use]
    pub fn serialize(&self, force_canonical: bool) -> Vec<u8> {
        if !force_canonical {
            match self.source {
                SourceFormat::Jv1 => {
                    if let Some(bytes) = jv1::serialize(&self.tracks) {
                        return bytes;
                    }
                    debug!("disk outgrew JV1, writing DMK instead");
                }
                SourceFormat::Jv3 => {
                    if let Some(bytes) = jv3::serialize(&self.tracks, self.write_protected) {
                        return bytes;
                    }
                    debug!("disk outgrew JV3, writing DMK instead");
                }
                SourceFormat::Dmk => {}
            }
        }
        dmk::serialize(self.write_protected, &self.tracks)
    }
}

impl Snapshot for Floppy {
    fn save(&self, writer: &mut SnapshotWriter) {
        writer.write_block(&self.serialize(true));
        writer.write_str(&self.file_path);
    }

    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        let image = reader.read_block()?;
        let file_path = reader.read_str()?;
        let parsed = dmk::parse(image).map_err(|e| SnapshotError::InvalidData(e.to_string()))?;
        self.tracks = parsed.tracks;
        self.write_protected = parsed.write_protected;
        self.source = SourceFormat::Dmk;
        self.file_path = file_path;
        self.changed = false;
        Ok(())
    }
}
