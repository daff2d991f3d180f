//! Raw track images and the sector structure recovered from them.
//!
//! A [`Track`] is the byte stream a drive head would see: gaps, sync
//! runs, address marks, ID fields, payloads, and CRCs. Sector layout is
//! not stored separately; it is rediscovered by scanning for address
//! marks and checking the ID CRC, exactly as a controller would.

use crate::crc;
use crate::{
    DAM_DELETED, DAM_NORMAL, FILLER_DD, FILLER_SD, IDAM, STANDARD_TRACK_LENGTH_DD,
    STANDARD_TRACK_LENGTH_SD,
};

/// Data address mark preceding a sector payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dam {
    Normal,
    Deleted,
}

impl Dam {
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Dam::Normal => DAM_NORMAL,
            Dam::Deleted => DAM_DELETED,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Dam> {
        match byte {
            DAM_NORMAL => Some(Dam::Normal),
            DAM_DELETED => Some(Dam::Deleted),
            _ => None,
        }
    }
}

/// Sector payload length for an ID-field size code (two low bits).
#[must_use]
pub fn data_length(size_code: u8) -> usize {
    0x80 << (size_code & 0x03)
}

/// Size code for a payload length, for lengths a WD1793 can express.
#[must_use]
pub fn size_code(data_length: usize) -> Option<u8> {
    match data_length {
        0x080 => Some(0),
        0x100 => Some(1),
        0x200 => Some(2),
        0x400 => Some(3),
        _ => None,
    }
}

/// One sector as recovered from a track scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorDescriptor {
    /// Track number from the ID field (may disagree with the physical track).
    pub track_number: u8,
    /// Side number from the ID field.
    pub side_one: bool,
    /// Sector number from the ID field.
    pub sector_number: u8,
    pub size_code: u8,
    pub double_density: bool,
    pub dam: Dam,
    /// Whether the stored data CRC matches the payload.
    pub crc_valid: bool,
    /// Offset of the 0xFE address mark within the track image.
    pub idam_offset: usize,
    /// Offset of the first payload byte within the track image.
    pub data_start: usize,
    pub data: Vec<u8>,
}

impl SectorDescriptor {
    #[must_use]
    pub fn data_length(&self) -> usize {
        data_length(self.size_code)
    }
}

/// A single physical track image.
#[derive(Debug, Clone)]
pub struct Track {
    physical_track: u8,
    side_one: bool,
    data: Vec<u8>,
    changed: bool,
}

impl Track {
    #[must_use]
    pub fn new(physical_track: u8, side_one: bool, data: Vec<u8>) -> Track {
        Track {
            physical_track,
            side_one,
            data,
            changed: false,
        }
    }

    /// A track with no address marks, filled with double-density filler.
    #[must_use]
    pub fn unformatted(physical_track: u8, side_one: bool) -> Track {
        Track::new(
            physical_track,
            side_one,
            vec![FILLER_DD; STANDARD_TRACK_LENGTH_DD],
        )
    }

    #[must_use]
    pub fn physical_track_number(&self) -> u8 {
        self.physical_track
    }

    #[must_use]
    pub fn side_one(&self) -> bool {
        self.side_one
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed = false;
    }

    /// Whether the track contains at least one readable sector.
    #[must_use]
    pub fn formatted(&self) -> bool {
        !self.sectors().is_empty()
    }

    /// True if any readable sector on this track is double density.
    #[must_use]
    pub fn double_density(&self) -> bool {
        self.sectors().iter().any(|s| s.double_density)
    }

    /// Scans the track for sectors, in the order they pass the head.
    ///
    /// An ID field is accepted only when its CRC checks out, which
    /// keeps payload bytes that happen to equal 0xFE from being taken
    /// for address marks.
    #[must_use]
    pub fn sectors(&self) -> Vec<SectorDescriptor> {
        let mut found = Vec::new();
        let data = &self.data;
        let mut i = 0;
        while i < data.len() {
            if data[i] != IDAM {
                i += 1;
                continue;
            }
            let double_density = i >= 3 && data[i - 3..i] == [0xA1, 0xA1, 0xA1];
            if !double_density && (i == 0 || data[i - 1] != 0x00) {
                // Single-density address marks follow a 0x00 sync run.
                i += 1;
                continue;
            }
            match self.read_sector_at(i, double_density) {
                Some(sector) => {
                    i = sector.data_start + sector.data_length() + 2;
                    found.push(sector);
                }
                None => i += 1,
            }
        }
        found
    }

    fn read_sector_at(&self, idam: usize, double_density: bool) -> Option<SectorDescriptor> {
        let data = &self.data;
        if idam + 7 > data.len() {
            return None;
        }
        let id_seed = if double_density {
            crc::CRC_RESET_A1_A1_A1
        } else {
            crc::CRC_RESET
        };
        let id_crc = crc::over(id_seed, &data[idam..idam + 5]);
        if id_crc != read_crc(data, idam + 5)? {
            return None;
        }
        let track_number = data[idam + 1];
        let side_one = data[idam + 2] & 1 != 0;
        let sector_number = data[idam + 3];
        let size_code = data[idam + 4] & 0x03;
        let length = data_length(size_code);

        // The DAM follows within the gap-2 window.
        let dam_at = self.find_dam(idam + 7, double_density)?;
        let dam = Dam::from_byte(data[dam_at])?;
        let data_start = dam_at + 1;
        if data_start + length + 2 > data.len() {
            return None;
        }
        let payload = &data[data_start..data_start + length];
        let data_crc = crc::over(crc::over(id_seed, &[dam.byte()]), payload);
        let crc_valid = data_crc == read_crc(data, data_start + length)?;

        Some(SectorDescriptor {
            track_number,
            side_one,
            sector_number,
            size_code,
            double_density,
            dam,
            crc_valid,
            idam_offset: idam,
            data_start,
            data: payload.to_vec(),
        })
    }

    fn find_dam(&self, from: usize, double_density: bool) -> Option<usize> {
        let data = &self.data;
        let window = from + 48;
        for j in from..window.min(data.len()) {
            if Dam::from_byte(data[j]).is_none() {
                continue;
            }
            let marked = if double_density {
                j >= 3 && data[j - 3..j] == [0xA1, 0xA1, 0xA1]
            } else {
                j >= 1 && data[j - 1] == 0x00
            };
            if marked {
                return Some(j);
            }
        }
        None
    }

    /// Rewrites the payload of the sector with the given ID, updating
    /// the data CRC. Returns false if no such sector exists. Payloads
    /// shorter than the sector are zero-padded; longer ones truncated.
    pub fn write_sector(&mut self, sector_number: u8, dam: Dam, payload: &[u8]) -> bool {
        let Some(sector) = self
            .sectors()
            .into_iter()
            .find(|s| s.sector_number == sector_number)
        else {
            return false;
        };
        let length = sector.data_length();
        let start = sector.data_start;
        let seed = if sector.double_density {
            crc::CRC_RESET_A1_A1_A1
        } else {
            crc::CRC_RESET
        };
        self.data[start - 1] = dam.byte();
        for i in 0..length {
            self.data[start + i] = payload.get(i).copied().unwrap_or(0);
        }
        let data_crc = crc::over(
            crc::over(seed, &[dam.byte()]),
            &self.data[start..start + length],
        );
        self.data[start + length] = (data_crc >> 8) as u8;
        self.data[start + length + 1] = (data_crc & 0xFF) as u8;
        self.changed = true;
        true
    }
}

fn read_crc(data: &[u8], at: usize) -> Option<u16> {
    if at + 2 > data.len() {
        return None;
    }
    Some(u16::from(data[at]) << 8 | u16::from(data[at + 1]))
}

/// Builds a track image sector by sector, in head order.
pub struct TrackBuilder {
    data: Vec<u8>,
    double_density: bool,
}

impl TrackBuilder {
    #[must_use]
    pub fn new(double_density: bool) -> TrackBuilder {
        let mut data = Vec::with_capacity(if double_density {
            STANDARD_TRACK_LENGTH_DD
        } else {
            STANDARD_TRACK_LENGTH_SD
        });
        // Post-index gap.
        if double_density {
            data.resize(32, FILLER_DD);
        } else {
            data.resize(16, FILLER_SD);
        }
        TrackBuilder {
            data,
            double_density,
        }
    }

    /// Appends one sector. `crc_valid: false` stores a deliberately
    /// wrong data CRC, preserving a source image's recorded CRC error.
    pub fn add_sector(
        &mut self,
        track_number: u8,
        side_one: bool,
        sector_number: u8,
        dam: Dam,
        payload: &[u8],
        double_density: bool,
        crc_valid: bool,
    ) {
        let size_code = size_code(payload.len()).unwrap_or(1);
        let seed = if double_density {
            self.data.extend_from_slice(&[0x00; 12]);
            self.data.extend_from_slice(&[0xA1, 0xA1, 0xA1]);
            crc::CRC_RESET_A1_A1_A1
        } else {
            self.data.extend_from_slice(&[0x00; 6]);
            crc::CRC_RESET
        };

        let id = [IDAM, track_number, u8::from(side_one), sector_number, size_code];
        self.data.extend_from_slice(&id);
        self.push_crc(crc::over(seed, &id));

        // Gap 2 between the ID field and the data field.
        if double_density {
            self.data.extend_from_slice(&[FILLER_DD; 22]);
            self.data.extend_from_slice(&[0x00; 12]);
            self.data.extend_from_slice(&[0xA1, 0xA1, 0xA1]);
        } else {
            self.data.extend_from_slice(&[FILLER_SD; 11]);
            self.data.extend_from_slice(&[0x00; 6]);
        }
        self.data.push(dam.byte());
        self.data.extend_from_slice(payload);
        let mut data_crc = crc::over(crc::over(seed, &[dam.byte()]), payload);
        if !crc_valid {
            data_crc = !data_crc;
        }
        self.push_crc(data_crc);

        // Gap 3 before the next sector.
        if double_density {
            self.data.extend_from_slice(&[FILLER_DD; 24]);
        } else {
            self.data.extend_from_slice(&[FILLER_SD; 10]);
        }
    }

    fn push_crc(&mut self, crc: u16) {
        self.data.push((crc >> 8) as u8);
        self.data.push((crc & 0xFF) as u8);
    }

    /// Pads to the standard track length for the density and produces
    /// the finished track.
    #[must_use]
    pub fn build(mut self, physical_track: u8, side_one: bool) -> Track {
        let (target, filler) = if self.double_density {
            (STANDARD_TRACK_LENGTH_DD, FILLER_DD)
        } else {
            (STANDARD_TRACK_LENGTH_SD, FILLER_SD)
        };
        if self.data.len() < target {
            self.data.resize(target, filler);
        }
        Track::new(physical_track, side_one, self.data)
    }
}
