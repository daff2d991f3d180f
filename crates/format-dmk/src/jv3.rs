//! JV3 sector dumps: a fixed table of three-byte sector headers, a
//! write-protect byte, then the sector payloads in header order.
//!
//! Unlike JV1, JV3 carries per-sector density, side, data address
//! mark, and a recorded-CRC-error flag, so mixed-density and
//! double-sided disks are expressible.

use crate::track::{Dam, Track, TrackBuilder};
use crate::{FloppyError, MAX_TRACKS};

pub(crate) const SECTOR_SLOTS: usize = 2901;
pub(crate) const HEADER_BYTES: usize = SECTOR_SLOTS * 3 + 1;

const FREE: u8 = 0xFF;

const FLAG_DENSITY: u8 = 0x80;
/// Two-bit DAM field. Zero is a normal mark; JV3 defines several
/// non-zero encodings for the historical deleted/alternate marks, all
/// of which map onto the deleted DAM here. Writes use the double-
/// density deleted encoding.
const FLAG_DAM: u8 = 0x60;
const FLAG_DAM_DELETED: u8 = 0x20;
const FLAG_SIDE: u8 = 0x10;
const FLAG_CRC_ERROR: u8 = 0x08;
const FLAG_SIZE: u8 = 0x03;

/// Payload length for an in-use header's size bits. The encoding
/// differs from the WD1793 size code: 0 means 256 bytes.
fn slot_data_length(flags: u8) -> usize {
    match flags & FLAG_SIZE {
        0 => 0x100,
        1 => 0x080,
        2 => 0x400,
        _ => 0x200,
    }
}

fn slot_size_bits(data_length: usize) -> Option<u8> {
    match data_length {
        0x100 => Some(0),
        0x080 => Some(1),
        0x400 => Some(2),
        0x200 => Some(3),
        _ => None,
    }
}

struct SlotHeader {
    track: u8,
    sector: u8,
    flags: u8,
}

pub(crate) fn parse(data: &[u8]) -> Result<Vec<Track>, FloppyError> {
    if data.len() < HEADER_BYTES {
        return Err(FloppyError::Malformed(format!(
            "JV3 image is {} bytes, shorter than the {HEADER_BYTES}-byte header",
            data.len()
        )));
    }
    let mut headers = Vec::new();
    for slot in 0..SECTOR_SLOTS {
        let h = &data[slot * 3..slot * 3 + 3];
        if h[0] == FREE && h[1] == FREE {
            continue;
        }
        if h[0] >= MAX_TRACKS {
            return Err(FloppyError::Malformed(format!(
                "JV3 header names track {}, beyond the supported {MAX_TRACKS}",
                h[0]
            )));
        }
        headers.push(SlotHeader {
            track: h[0],
            sector: h[1],
            flags: h[2],
        });
    }

    // Payloads follow the header block in header order.
    let mut offset = HEADER_BYTES;
    let mut sectors = Vec::with_capacity(headers.len());
    for h in headers {
        let length = slot_data_length(h.flags);
        if offset + length > data.len() {
            return Err(FloppyError::Malformed(
                "JV3 image ends inside a sector payload".to_string(),
            ));
        }
        sectors.push((h, data[offset..offset + length].to_vec()));
        offset += length;
    }

    // Group by physical track, keeping each track's sectors in file
    // order so interleave survives a round trip.
    let mut tracks: Vec<Track> = Vec::new();
    let mut order: Vec<(u8, bool)> = Vec::new();
    for (h, _) in &sectors {
        let key = (h.track, h.flags & FLAG_SIDE != 0);
        if !order.contains(&key) {
            order.push(key);
        }
    }
    order.sort_unstable();
    for (track_number, side_one) in order {
        let members: Vec<&(SlotHeader, Vec<u8>)> = sectors
            .iter()
            .filter(|(h, _)| h.track == track_number && (h.flags & FLAG_SIDE != 0) == side_one)
            .collect();
        let double_density = members.iter().any(|(h, _)| h.flags & FLAG_DENSITY != 0);
        let mut builder = TrackBuilder::new(double_density);
        for (h, payload) in members {
            let dam = if h.flags & FLAG_DAM == 0 {
                Dam::Normal
            } else {
                Dam::Deleted
            };
            builder.add_sector(
                h.track,
                side_one,
                h.sector,
                dam,
                payload,
                h.flags & FLAG_DENSITY != 0,
                h.flags & FLAG_CRC_ERROR == 0,
            );
        }
        tracks.push(builder.build(track_number, side_one));
    }
    Ok(tracks)
}

pub(crate) fn write_protected(data: &[u8]) -> bool {
    // The byte after the sector headers is 0xFF when writable.
    data.get(HEADER_BYTES - 1).is_some_and(|&b| b != 0xFF)
}

/// Serializes tracks back to JV3, or `None` when the disk holds more
/// sectors than the header table, or a sector size JV3 cannot encode.
pub(crate) fn serialize(tracks: &[Track], write_protected: bool) -> Option<Vec<u8>> {
    let mut header = vec![FREE; HEADER_BYTES];
    header[HEADER_BYTES - 1] = if write_protected { 0x00 } else { 0xFF };
    let mut payloads = Vec::new();
    let mut slot = 0;
    for track in tracks {
        for sector in track.sectors() {
            if slot >= SECTOR_SLOTS {
                return None;
            }
            let mut flags = slot_size_bits(sector.data.len())?;
            if sector.double_density {
                flags |= FLAG_DENSITY;
            }
            if track.side_one() {
                flags |= FLAG_SIDE;
            }
            if sector.dam == Dam::Deleted {
                flags |= FLAG_DAM_DELETED;
            }
            if !sector.crc_valid {
                flags |= FLAG_CRC_ERROR;
            }
            header[slot * 3] = track.physical_track_number();
            header[slot * 3 + 1] = sector.sector_number;
            header[slot * 3 + 2] = flags;
            payloads.extend_from_slice(&sector.data);
            slot += 1;
        }
    }
    header.extend_from_slice(&payloads);
    Some(header)
}
