//! Gear table and rolling-hash scan for content-defined chunking.
//!
//! The rolling hash is `h = (h << 1) + GEAR[b]` over a 64-byte effective
//! window (older bytes shift out of the register); a boundary triggers when
//! `h & mask == 0`. The table maps each byte value to a 64-bit constant
//! derived from the tree hash of that single byte, so boundary placement
//! depends only on primitives this workspace already carries.

use std::sync::LazyLock;

/// Lookup table mapping byte values to gear constants.
pub type GearTable = [u64; 256];

/// The default gear table, computed once at first use.
pub static GEAR_TABLE: LazyLock<GearTable> = LazyLock::new(gear_table);

/// Derive the default gear table.
///
/// For each byte value 0-255, hash that single byte and take the first
/// 8 bytes of the digest as a little-endian u64.
///
/// Spot checks:
/// - `GEAR[0]   == 0xf1611bf1dfde3a2d`
/// - `GEAR[1]   == 0xe072c1bb1f72fc48`
/// - `GEAR[255] == 0x6d93c57b374dd499`
pub fn gear_table() -> GearTable {
    let mut table = [0u64; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let digest = seine_hash::hash(&[i as u8]);
        *entry = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
    }
    table
}

/// Scan `buf` for the next boundary.
///
/// Returns the end-exclusive offset of the boundary (the position just
/// after the matching byte) if one is found, along with the rolling hash
/// state after the last byte examined. When no boundary is found the whole
/// buffer has been absorbed into the hash.
pub fn next_match(buf: &[u8], table: &GearTable, mask: u64, mut hash: u64) -> (Option<usize>, u64) {
    for (i, &b) in buf.iter().enumerate() {
        hash = (hash << 1).wrapping_add(table[b as usize]);
        if hash & mask == 0 {
            return (Some(i + 1), hash);
        }
    }
    (None, hash)
}
