//! TRSDOS directory-entry helpers.
//!
//! TRSDOS stores a file name as eleven bytes: eight for the name and
//! three for the extension, each space-padded, and indexes the
//! directory with a one-byte hash of those eleven bytes.

/// Hash of an eleven-byte `NNNNNNNNEEE` file name, as computed by the
/// TRSDOS directory code: XOR each byte into the accumulator, then
/// rotate left through bit 7. A result of zero is mapped to one, since
/// zero marks an unused hash slot.
#[must_use]
pub fn hash_filename(name: &[u8; 11]) -> u8 {
    let mut hash: u8 = 0;
    for &b in name {
        hash ^= b;
        hash = hash.rotate_left(1);
    }
    if hash == 0 { 1 } else { hash }
}

/// Converts a host file name into the eleven-byte TRSDOS form.
///
/// The portion before the last dot becomes the name, uppercased and
/// truncated to eight characters; the portion after becomes the
/// extension, truncated to three. The first name character must be a
/// letter and the rest letters or digits; anything invalid becomes 'X'.
/// The name is space-padded to eight bytes, the extension 'X'-padded to
/// three.
#[must_use]
pub fn trsdos_filename(host: &str) -> [u8; 11] {
    let (stem, ext) = match host.rfind('.') {
        Some(dot) => (&host[..dot], &host[dot + 1..]),
        None => (host, ""),
    };

    let mut out = [b' '; 11];
    for (i, c) in stem.chars().take(8).enumerate() {
        out[i] = sanitize(c, i == 0);
    }
    for slot in &mut out[8..] {
        *slot = b'X';
    }
    for (i, c) in ext.chars().take(3).enumerate() {
        out[8 + i] = sanitize(c, false);
    }
    out
}

fn sanitize(c: char, first: bool) -> u8 {
    let c = c.to_ascii_uppercase();
    if c.is_ascii_uppercase() || (!first && c.is_ascii_digit()) {
        c as u8
    } else {
        b'X'
    }
}
