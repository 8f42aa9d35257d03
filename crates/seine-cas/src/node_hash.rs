//! Keyed node-tree hashing over (hash, length) sequences.
//!
//! Xorbs and files are identified by a hash over their ordered chunk list
//! rather than over raw bytes. Chunks are grouped into nodes of 2 to 8
//! children (mean 4, steered by a byte of each chunk's own hash so grouping
//! is content-defined), each node hashed with a keyed hash over its
//! children's `(hash, length le u64)` records, and the levels reduced until
//! a single root remains. The key separates this hash domain from plain
//! chunk hashing.

use seine_types::ChunkHash;

/// Mean number of children per tree node. Power of two below 256, so the
/// grouping test only needs one byte of the hash.
const MEAN_CHILDREN_PER_NODE: usize = 4;

/// Byte of the chunk hash consulted for content-defined group breaks: the
/// lowest byte of the fourth little-endian u64.
const GROUP_BREAK_BYTE: usize = 24;

/// Domain-separation key for node hashing.
pub const BLAKE3_NODE_KEY: [u8; 32] = [
    1, 126, 197, 199, 165, 71, 41, 150, 253, 148, 102, 102, 180, 138, 2, 230, 93, 221, 83, 111,
    55, 199, 109, 210, 248, 99, 82, 230, 74, 83, 113, 63,
];

/// Hash one node from its children's (hash, length) records.
fn node_hash(children: &[([u8; 32], u64)]) -> ([u8; 32], u64) {
    let mut input = Vec::with_capacity(children.len() * 40);
    let mut total_length = 0u64;
    for (hash, length) in children {
        input.extend_from_slice(hash);
        input.extend_from_slice(&length.to_le_bytes());
        total_length += length;
    }
    (seine_hash::keyed_hash(&BLAKE3_NODE_KEY, &input), total_length)
}

/// Reduce an ordered (hash, length) sequence to its tree root hash.
///
/// An empty sequence hashes to all zeroes. A non-empty sequence is always
/// wrapped in at least one node, so a single chunk's tree hash differs from
/// the chunk hash itself.
pub fn tree_hash(chunks: &[(ChunkHash, u64)]) -> [u8; 32] {
    if chunks.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<([u8; 32], u64)> =
        chunks.iter().map(|(h, len)| (*h.as_bytes(), *len)).collect();

    while level.len() > 1 {
        let mut parents = Vec::new();
        let mut group_start = 0;
        // Counts one child fewer than the group holds; kept for wire
        // compatibility with existing xorb hashes.
        let mut children_so_far = 0;
        for i in 0..level.len() {
            let break_here = i == level.len() - 1
                || children_so_far == 2 * MEAN_CHILDREN_PER_NODE
                || (children_so_far >= 2
                    && level[i].0[GROUP_BREAK_BYTE] as usize % MEAN_CHILDREN_PER_NODE == 0);
            if break_here {
                parents.push(node_hash(&level[group_start..=i]));
                group_start = i + 1;
                children_so_far = 0;
            } else {
                children_so_far += 1;
            }
        }
        level = parents;
    }

    node_hash(&level).0
}

/// Keyed hash over a consecutive run of chunk hashes, written into shard
/// verification entries so the server can spot a corrupted range listing.
pub fn range_hash(chunk_hashes: &[ChunkHash]) -> [u8; 32] {
    let mut input = Vec::with_capacity(chunk_hashes.len() * 32);
    for hash in chunk_hashes {
        input.extend_from_slice(hash.as_bytes());
    }
    seine_hash::keyed_hash(&BLAKE3_NODE_KEY, &input)
}
