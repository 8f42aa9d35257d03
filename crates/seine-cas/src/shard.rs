//! Shard binary index: builder and parser.
//!
//! A shard maps files onto chunk ranges and chunks onto xorbs. It owns no
//! chunk bytes, only 32-byte hashes and fixed-width little-endian integers.
//!
//! Layout:
//!
//! ```text
//! header (48)      magic tag [32] | version u64 | footer size u64
//! file info        per file: header entry, rep entries,
//!                  verification entries, metadata-ext entry (48 bytes each)
//! bookend (48)     32 x 0xFF | 16 x 0x00
//! xorb info        per xorb: header entry (48), chunk entries (48 each)
//! bookend (48)
//! footer (192)     section offsets, totals, creation timestamp; the last
//!                  8 bytes are the absolute offset of the footer itself
//! ```
//!
//! All section locations are recovered from the footer, reached through the
//! trailing back-pointer. Two serializations of the same logical content are
//! byte-identical except for the creation-timestamp field, which the parser
//! never reads.

use bytes::{BufMut, Bytes, BytesMut};
use seine_types::{ChunkHash, Sha256Hash, XorbHash};

use crate::error::CasError;
use crate::xorb::{SealedXorb, XorbChunkInfo};

pub const SHARD_HEADER_SIZE: usize = 48;
pub const SHARD_FOOTER_SIZE: usize = 192;
const SHARD_HEADER_VERSION: u64 = 2;
const SHARD_FOOTER_VERSION: u64 = 1;
const BOOKEND_SIZE: usize = 48;
const ENTRY_SIZE: usize = 48;

/// The file entry is followed by one verification entry per rep.
pub const FILE_FLAG_WITH_VERIFICATION: u32 = 1 << 31;
/// The file entry is followed by a sha256 metadata-ext entry.
pub const FILE_FLAG_WITH_METADATA_EXT: u32 = 1 << 30;

/// 32-byte tag opening every shard.
pub const SHARD_MAGIC_TAG: [u8; 32] = [
    b'H', b'F', b'R', b'e', b'p', b'o', b'M', b'e', b't', b'a', b'D', b'a', b't', b'a', 0, 85,
    105, 103, 69, 106, 123, 129, 87, 131, 165, 189, 217, 92, 205, 209, 74, 169,
];

/// Reference to the xorb holding a chunk range: either an index into the
/// current session's sealed-xorb list (resolved to a hash at serialize
/// time) or the hash of a xorb already present remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XorbRef {
    Local(u32),
    Remote(XorbHash),
}

/// One run of consecutive chunks a file draws from a single xorb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRep {
    pub xorb: XorbRef,
    /// Unframed bytes this range contributes to the file.
    pub unpacked_len: u32,
    /// First chunk index within the xorb, inclusive.
    pub chunk_index_start: u32,
    /// Last chunk index within the xorb, exclusive.
    pub chunk_index_end: u32,
    /// Keyed hash over the range's chunk hashes.
    pub range_hash: [u8; 32],
}

/// Everything the shard records about one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFileInfo {
    /// Tree hash over the file's full chunk sequence.
    pub file_hash: [u8; 32],
    /// Whole-file sha256, stored in the metadata-ext entry.
    pub sha256: Sha256Hash,
    pub reps: Vec<FileRep>,
}

struct ShardXorbEntry {
    hash: XorbHash,
    packed_len: u32,
    unpacked_len: u32,
    chunks: Vec<XorbChunkInfo>,
}

/// Accumulates file and xorb records, then serializes them.
#[derive(Default)]
pub struct ShardBuilder {
    files: Vec<ShardFileInfo>,
    xorbs: Vec<ShardXorbEntry>,
}

impl ShardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.xorbs.is_empty()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_xorbs(&self) -> usize {
        self.xorbs.len()
    }

    pub fn add_file(&mut self, file: ShardFileInfo) {
        self.files.push(file);
    }

    pub fn add_xorb(&mut self, xorb: &SealedXorb) {
        self.xorbs.push(ShardXorbEntry {
            hash: xorb.hash,
            packed_len: xorb.data.len() as u32,
            unpacked_len: xorb.unpacked_len as u32,
            chunks: xorb.chunks.clone(),
        });
    }

    /// Serialize with the current wall-clock time as the creation stamp.
    ///
    /// `local_xorb_hashes` resolves [`XorbRef::Local`] indices; it is the
    /// session's sealed-xorb hash list in seal order.
    pub fn serialize(&self, local_xorb_hashes: &[XorbHash]) -> Result<Bytes, CasError> {
        self.serialize_with_timestamp(local_xorb_hashes, now_secs())
    }

    /// Serialize with an explicit creation stamp (for deterministic testing).
    pub fn serialize_with_timestamp(
        &self,
        local_xorb_hashes: &[XorbHash],
        created_at: u64,
    ) -> Result<Bytes, CasError> {
        let mut out = BytesMut::new();

        // Header
        out.put_slice(&SHARD_MAGIC_TAG);
        out.put_u64_le(SHARD_HEADER_VERSION);
        out.put_u64_le(SHARD_FOOTER_SIZE as u64);
        let file_info_start = out.len() as u64;

        // File info section
        let mut file_total_bytes = 0u64;
        for file in &self.files {
            out.put_slice(&file.file_hash);
            out.put_u32_le(FILE_FLAG_WITH_VERIFICATION | FILE_FLAG_WITH_METADATA_EXT);
            out.put_u32_le(file.reps.len() as u32);
            out.put_u64_le(0); // reserved

            for rep in &file.reps {
                let xorb_hash = match rep.xorb {
                    XorbRef::Remote(hash) => hash,
                    XorbRef::Local(index) => *local_xorb_hashes
                        .get(index as usize)
                        .ok_or(CasError::UnknownXorbIndex(index))?,
                };
                out.put_slice(xorb_hash.as_bytes());
                out.put_u32_le(0); // xorb flags
                out.put_u32_le(rep.unpacked_len);
                out.put_u32_le(rep.chunk_index_start);
                out.put_u32_le(rep.chunk_index_end);
                file_total_bytes += rep.unpacked_len as u64;
            }

            for rep in &file.reps {
                out.put_slice(&rep.range_hash);
                out.put_bytes(0, 16); // reserved
            }

            out.put_slice(file.sha256.as_bytes());
            out.put_bytes(0, 16); // reserved
        }
        write_bookend(&mut out);

        // Xorb info section
        let xorb_info_start = out.len() as u64;
        let mut stored_bytes = 0u64;
        let mut unpacked_bytes = 0u64;
        for xorb in &self.xorbs {
            out.put_slice(xorb.hash.as_bytes());
            out.put_u32_le(0); // flags
            out.put_u32_le(xorb.chunks.len() as u32);
            out.put_u32_le(xorb.unpacked_len);
            out.put_u32_le(xorb.packed_len);
            stored_bytes += xorb.packed_len as u64;
            unpacked_bytes += xorb.unpacked_len as u64;

            for chunk in &xorb.chunks {
                out.put_slice(chunk.hash.as_bytes());
                out.put_u32_le(chunk.length);
                out.put_u32_le(chunk.offset);
                out.put_u64_le(0); // reserved
            }
        }
        write_bookend(&mut out);

        // Footer. The empty lookup tables all sit at the footer boundary.
        let footer_offset = out.len() as u64;
        out.put_u64_le(SHARD_FOOTER_VERSION);
        out.put_u64_le(file_info_start);
        out.put_u64_le(xorb_info_start);
        out.put_u64_le(footer_offset); // file lookup start
        out.put_u64_le(0); // file lookup entries
        out.put_u64_le(footer_offset); // cas lookup start
        out.put_u64_le(0); // cas lookup entries
        out.put_u64_le(footer_offset); // chunk lookup start
        out.put_u64_le(0); // chunk lookup entries
        out.put_bytes(0, 32); // chunk hmac key (unkeyed)
        out.put_u64_le(created_at);
        out.put_u64_le(0); // shard key expiry
        out.put_bytes(0, 40); // reserved
        out.put_u64_le(stored_bytes);
        out.put_u64_le(file_total_bytes);
        out.put_u64_le(unpacked_bytes);
        out.put_u64_le(footer_offset);

        debug_assert_eq!(out.len() as u64, footer_offset + SHARD_FOOTER_SIZE as u64);
        Ok(out.freeze())
    }
}

fn write_bookend(out: &mut BytesMut) {
    out.put_bytes(0xFF, 32);
    out.put_bytes(0x00, 16);
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A file record recovered from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileInfo {
    pub file_hash: [u8; 32],
    /// Present when the file carried a metadata-ext entry.
    pub sha256: Option<Sha256Hash>,
    pub reps: Vec<ParsedFileRep>,
    /// One range hash per rep when verification entries were present.
    pub verification: Vec<[u8; 32]>,
}

/// A rep range recovered from a shard; local indices are already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFileRep {
    pub xorb_hash: XorbHash,
    pub unpacked_len: u32,
    pub chunk_index_start: u32,
    pub chunk_index_end: u32,
}

/// A xorb record recovered from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedXorbInfo {
    pub hash: XorbHash,
    pub packed_len: u32,
    pub unpacked_len: u32,
    pub chunks: Vec<XorbChunkInfo>,
}

/// Full decoded content of a shard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardData {
    pub files: Vec<ParsedFileInfo>,
    pub xorbs: Vec<ParsedXorbInfo>,
}

/// Decode a shard, locating every section through the footer back-pointer.
///
/// The creation-timestamp field is never read, so any two serializations of
/// the same logical content parse identically.
pub fn parse_shard(shard: &[u8]) -> Result<ShardData, CasError> {
    if shard.len() < SHARD_HEADER_SIZE + SHARD_FOOTER_SIZE {
        return Err(CasError::InvalidShard(format!(
            "{} bytes is below the minimum shard size",
            shard.len()
        )));
    }
    if shard[..32] != SHARD_MAGIC_TAG {
        return Err(CasError::InvalidShard("bad magic tag".into()));
    }
    let header_version = read_u64(shard, 32)?;
    if header_version != SHARD_HEADER_VERSION {
        return Err(CasError::UnsupportedVersion {
            found: header_version,
            supported: SHARD_HEADER_VERSION,
        });
    }

    // Locate the footer from the trailing back-pointer.
    let footer_offset = read_u64(shard, shard.len() - 8)? as usize;
    if footer_offset + SHARD_FOOTER_SIZE != shard.len() || footer_offset < SHARD_HEADER_SIZE {
        return Err(CasError::InvalidShard(format!(
            "footer back-pointer {footer_offset} inconsistent with shard length {}",
            shard.len()
        )));
    }
    let footer_version = read_u64(shard, footer_offset)?;
    if footer_version != SHARD_FOOTER_VERSION {
        return Err(CasError::UnsupportedVersion {
            found: footer_version,
            supported: SHARD_FOOTER_VERSION,
        });
    }

    let file_info_start = read_u64(shard, footer_offset + 8)? as usize;
    let xorb_info_start = read_u64(shard, footer_offset + 16)? as usize;
    if file_info_start > xorb_info_start
        || xorb_info_start > footer_offset
        || xorb_info_start < BOOKEND_SIZE
        || footer_offset < BOOKEND_SIZE
    {
        return Err(CasError::InvalidShard("inconsistent section offsets".into()));
    }
    let file_info_end = xorb_info_start - BOOKEND_SIZE;
    let xorb_info_end = footer_offset - BOOKEND_SIZE;
    if file_info_start > file_info_end {
        return Err(CasError::InvalidShard("inconsistent section offsets".into()));
    }

    let mut files = Vec::new();
    let mut pos = file_info_start;
    while pos < file_info_end {
        let (file, next) = parse_file_entry(shard, pos, file_info_end)?;
        files.push(file);
        pos = next;
    }

    let mut xorbs = Vec::new();
    let mut pos = xorb_info_start;
    while pos < xorb_info_end {
        let (xorb, next) = parse_xorb_entry(shard, pos, xorb_info_end)?;
        xorbs.push(xorb);
        pos = next;
    }

    Ok(ShardData { files, xorbs })
}

fn parse_file_entry(
    shard: &[u8],
    pos: usize,
    section_end: usize,
) -> Result<(ParsedFileInfo, usize), CasError> {
    let mut pos = pos;
    let file_hash = read_hash(shard, pos, section_end)?;
    let flags = read_u32(shard, pos + 32)?;
    let num_reps = read_u32(shard, pos + 36)? as usize;
    pos += ENTRY_SIZE;

    // The count is untrusted; it must fit in the section before it sizes
    // any allocation.
    if num_reps > (section_end - pos) / ENTRY_SIZE {
        return Err(CasError::InvalidShard(format!(
            "file entry at {} claims {num_reps} reps but only {} bytes remain",
            pos - ENTRY_SIZE,
            section_end - pos
        )));
    }
    let mut reps = Vec::with_capacity(num_reps);
    for _ in 0..num_reps {
        let xorb_hash = XorbHash::from(read_hash(shard, pos, section_end)?);
        let unpacked_len = read_u32(shard, pos + 36)?;
        let chunk_index_start = read_u32(shard, pos + 40)?;
        let chunk_index_end = read_u32(shard, pos + 44)?;
        reps.push(ParsedFileRep {
            xorb_hash,
            unpacked_len,
            chunk_index_start,
            chunk_index_end,
        });
        pos += ENTRY_SIZE;
    }

    let mut verification = Vec::new();
    if flags & FILE_FLAG_WITH_VERIFICATION != 0 {
        for _ in 0..num_reps {
            verification.push(read_hash(shard, pos, section_end)?);
            pos += ENTRY_SIZE;
        }
    }

    let mut sha256 = None;
    if flags & FILE_FLAG_WITH_METADATA_EXT != 0 {
        sha256 = Some(Sha256Hash::from(read_hash(shard, pos, section_end)?));
        pos += ENTRY_SIZE;
    }

    Ok((
        ParsedFileInfo {
            file_hash,
            sha256,
            reps,
            verification,
        },
        pos,
    ))
}

fn parse_xorb_entry(
    shard: &[u8],
    pos: usize,
    section_end: usize,
) -> Result<(ParsedXorbInfo, usize), CasError> {
    let mut pos = pos;
    let hash = XorbHash::from(read_hash(shard, pos, section_end)?);
    let num_chunks = read_u32(shard, pos + 36)? as usize;
    let unpacked_len = read_u32(shard, pos + 40)?;
    let packed_len = read_u32(shard, pos + 44)?;
    pos += ENTRY_SIZE;

    if num_chunks > (section_end - pos) / ENTRY_SIZE {
        return Err(CasError::InvalidShard(format!(
            "xorb entry at {} claims {num_chunks} chunks but only {} bytes remain",
            pos - ENTRY_SIZE,
            section_end - pos
        )));
    }
    let mut chunks = Vec::with_capacity(num_chunks);
    for _ in 0..num_chunks {
        let hash = ChunkHash::from(read_hash(shard, pos, section_end)?);
        let length = read_u32(shard, pos + 32)?;
        let offset = read_u32(shard, pos + 36)?;
        chunks.push(XorbChunkInfo {
            hash,
            length,
            offset,
        });
        pos += ENTRY_SIZE;
    }

    Ok((
        ParsedXorbInfo {
            hash,
            packed_len,
            unpacked_len,
            chunks,
        },
        pos,
    ))
}

fn read_hash(shard: &[u8], pos: usize, section_end: usize) -> Result<[u8; 32], CasError> {
    if pos + ENTRY_SIZE > section_end {
        return Err(CasError::InvalidShard(format!(
            "entry at {pos} overruns its section (end {section_end})"
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&shard[pos..pos + 32]);
    Ok(hash)
}

fn read_u32(shard: &[u8], pos: usize) -> Result<u32, CasError> {
    let bytes: [u8; 4] = shard
        .get(pos..pos + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| CasError::InvalidShard(format!("truncated read at {pos}")))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(shard: &[u8], pos: usize) -> Result<u64, CasError> {
    let bytes: [u8; 8] = shard
        .get(pos..pos + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| CasError::InvalidShard(format!("truncated read at {pos}")))?;
    Ok(u64::from_le_bytes(bytes))
}
