//! The DMK container: a 16-byte header followed by fixed-size track
//! blocks, each a 128-byte IDAM pointer table plus the raw track
//! bytes. DMK is the canonical form here because it is the only one of
//! the three that can hold anything a real track can.

use crate::track::Track;
use crate::{FloppyError, MAX_TRACK_LENGTH, MAX_TRACKS};

pub(crate) const HEADER_BYTES: usize = 16;
pub(crate) const IDAM_TABLE_BYTES: usize = 128;

const FLAG_SINGLE_SIDED: u8 = 0x10;
const FLAG_SINGLE_DENSITY: u8 = 0x40;
const IDAM_POINTER_DD: u16 = 0x8000;
const IDAM_POINTER_OFFSET: u16 = 0x3FFF;

pub(crate) struct Image {
    pub write_protected: bool,
    pub tracks: Vec<Track>,
}

pub(crate) fn parse(data: &[u8]) -> Result<Image, FloppyError> {
    if data.len() < HEADER_BYTES {
        return Err(FloppyError::Malformed(format!(
            "DMK image is {} bytes, shorter than the header",
            data.len()
        )));
    }
    let write_protected = data[0] == 0xFF;
    let num_tracks = usize::from(data[1]);
    let block_len = usize::from(u16::from_le_bytes([data[2], data[3]]));
    let single_sided = data[4] & FLAG_SINGLE_SIDED != 0;
    let sides = if single_sided { 1 } else { 2 };

    if num_tracks > usize::from(MAX_TRACKS) {
        return Err(FloppyError::Malformed(format!(
            "DMK header names {num_tracks} tracks, more than the supported {MAX_TRACKS}"
        )));
    }
    if block_len <= IDAM_TABLE_BYTES || block_len > IDAM_TABLE_BYTES + MAX_TRACK_LENGTH {
        return Err(FloppyError::Malformed(format!(
            "DMK track block length {block_len:#x} is out of range"
        )));
    }

    let mut tracks = Vec::new();
    for t in 0..num_tracks {
        for side in 0..sides {
            let at = HEADER_BYTES + (t * sides + side) * block_len;
            let Some(block) = data.get(at..at + block_len) else {
                return Err(FloppyError::Malformed(format!(
                    "DMK image ends inside track {t} side {side}"
                )));
            };
            // The pointer table is advisory; sectors are rediscovered
            // by scanning, so it is only skipped over here.
            tracks.push(Track::new(
                t as u8,
                side == 1,
                block[IDAM_TABLE_BYTES..].to_vec(),
            ));
        }
    }
    Ok(Image {
        write_protected,
        tracks,
    })
}

pub(crate) fn serialize(write_protected: bool, tracks: &[Track]) -> Vec<u8> {
    let num_tracks = tracks
        .iter()
        .map(|t| usize::from(t.physical_track_number()) + 1)
        .max()
        .unwrap_or(0);
    let double_sided = tracks.iter().any(Track::side_one);
    let sides = if double_sided { 2 } else { 1 };
    let longest = tracks.iter().map(|t| t.data().len()).max().unwrap_or(0);
    let block_len = IDAM_TABLE_BYTES + longest.max(1);
    let single_density = tracks.iter().all(|t| !t.double_density());

    let mut out = vec![0u8; HEADER_BYTES + num_tracks * sides * block_len];
    out[0] = if write_protected { 0xFF } else { 0x00 };
    out[1] = num_tracks as u8;
    out[2..4].copy_from_slice(&(block_len as u16).to_le_bytes());
    if !double_sided {
        out[4] |= FLAG_SINGLE_SIDED;
    }
    if single_density && !tracks.is_empty() {
        out[4] |= FLAG_SINGLE_DENSITY;
    }

    for track in tracks {
        let index =
            usize::from(track.physical_track_number()) * sides + usize::from(track.side_one());
        let at = HEADER_BYTES + index * block_len;
        let block = &mut out[at..at + block_len];
        for (slot, sector) in track.sectors().iter().take(IDAM_TABLE_BYTES / 2).enumerate() {
            // Pointers are relative to the start of the block, table
            // included.
            let mut pointer =
                (sector.idam_offset + IDAM_TABLE_BYTES) as u16 & IDAM_POINTER_OFFSET;
            if sector.double_density {
                pointer |= IDAM_POINTER_DD;
            }
            block[slot * 2..slot * 2 + 2].copy_from_slice(&pointer.to_le_bytes());
        }
        block[IDAM_TABLE_BYTES..IDAM_TABLE_BYTES + track.data().len()]
            .copy_from_slice(track.data());
        // Unused tail of a shorter-than-block track stays zero, which
        // scans as unformatted space.
    }
    out
}
