//! JV1 sector dumps: raw tracks of ten 256-byte single-density
//! sectors, side 0 only, with no header and no metadata.

use crate::track::{Dam, Track, TrackBuilder};
use crate::{FloppyError, MAX_TRACKS};

pub(crate) const SECTORS_PER_TRACK: u8 = 10;
pub(crate) const SECTOR_BYTES: usize = 0x100;
pub(crate) const TRACK_BYTES: usize = SECTORS_PER_TRACK as usize * SECTOR_BYTES;

pub(crate) fn parse(data: &[u8]) -> Result<Vec<Track>, FloppyError> {
    if data.is_empty() || data.len() % TRACK_BYTES != 0 {
        return Err(FloppyError::Malformed(format!(
            "JV1 image length {} is not a multiple of {TRACK_BYTES}",
            data.len()
        )));
    }
    let num_tracks = data.len() / TRACK_BYTES;
    if num_tracks > usize::from(MAX_TRACKS) {
        return Err(FloppyError::Malformed(format!(
            "JV1 image holds {num_tracks} tracks, more than the supported {MAX_TRACKS}"
        )));
    }
    let mut tracks = Vec::with_capacity(num_tracks);
    for (t, chunk) in data.chunks_exact(TRACK_BYTES).enumerate() {
        let track_number = t as u8;
        let mut builder = TrackBuilder::new(false);
        for (sector, payload) in chunk.chunks_exact(SECTOR_BYTES).enumerate() {
            // Track 17 holds the directory, which TRSDOS marks with
            // deleted data address marks.
            let dam = if track_number == 17 {
                Dam::Deleted
            } else {
                Dam::Normal
            };
            builder.add_sector(
                track_number,
                false,
                sector as u8,
                dam,
                payload,
                false,
                true,
            );
        }
        tracks.push(builder.build(track_number, false));
    }
    Ok(tracks)
}

/// Serializes tracks back to JV1, or `None` when the geometry cannot
/// be expressed: any second side, density other than single, sector
/// size other than 256, or sector numbers outside 0..=9.
pub(crate) fn serialize(tracks: &[Track]) -> Option<Vec<u8>> {
    let num_tracks = tracks
        .iter()
        .map(|t| usize::from(t.physical_track_number()) + 1)
        .max()?;
    let mut out = vec![0u8; num_tracks * TRACK_BYTES];
    for track in tracks {
        if track.side_one() {
            return None;
        }
        let base = usize::from(track.physical_track_number()) * TRACK_BYTES;
        let mut seen = [false; SECTORS_PER_TRACK as usize];
        for sector in track.sectors() {
            if sector.double_density
                || sector.data.len() != SECTOR_BYTES
                || sector.sector_number >= SECTORS_PER_TRACK
            {
                return None;
            }
            let slot = usize::from(sector.sector_number);
            seen[slot] = true;
            let at = base + slot * SECTOR_BYTES;
            out[at..at + SECTOR_BYTES].copy_from_slice(&sector.data);
        }
        if !seen.iter().all(|&s| s) {
            return None;
        }
    }
    Some(out)
}
