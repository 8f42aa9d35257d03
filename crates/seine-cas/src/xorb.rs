//! Xorb assembly: framing chunks and aggregating them into upload units.
//!
//! A xorb is the unit of upload to the CAS tier: a bounded run of framed
//! chunks, identified by the tree hash over its ordered chunk list. The
//! assembler accumulates chunks until the size or count cap would be
//! exceeded, then seals. Sealed xorbs are immutable and safe to re-upload
//! verbatim.

use bytes::{BufMut, Bytes, BytesMut};
use seine_types::{ChunkHash, XorbHash};
use tracing::debug;

use crate::error::CasError;
use crate::node_hash::tree_hash;

/// Size in bytes of the per-chunk frame header.
pub const CHUNK_FRAME_HEADER_SIZE: usize = 8;

/// Frame format version.
const FRAME_VERSION: u8 = 0;

/// Compression scheme byte: 0 = stored uncompressed.
const SCHEME_NONE: u8 = 0;

/// Largest chunk length representable in a frame (lengths are u24).
const MAX_FRAME_LEN: usize = (1 << 24) - 1;

/// Write one framed chunk: an 8-byte header then the chunk bytes.
///
/// Header layout, little-endian: `[version u8][stored length u24]
/// [scheme u8][raw length u24]`. With scheme 0 the two lengths are equal.
pub fn write_chunk_frame(out: &mut BytesMut, data: &[u8]) -> Result<(), CasError> {
    if data.len() > MAX_FRAME_LEN {
        return Err(CasError::ChunkTooLarge(data.len()));
    }
    let len = data.len() as u32;
    out.put_u8(FRAME_VERSION);
    out.put_slice(&len.to_le_bytes()[..3]);
    out.put_u8(SCHEME_NONE);
    out.put_slice(&len.to_le_bytes()[..3]);
    out.put_slice(data);
    Ok(())
}

/// Location and size of one chunk within a sealed xorb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorbChunkInfo {
    /// Chunk tree hash.
    pub hash: ChunkHash,
    /// Unframed chunk length in bytes.
    pub length: u32,
    /// Offset of the chunk within the xorb's unpacked byte stream.
    pub offset: u32,
}

/// A finished, immutable xorb ready for upload.
#[derive(Debug, Clone)]
pub struct SealedXorb {
    /// Identity: tree hash over the ordered (chunk hash, length) list.
    pub hash: XorbHash,
    /// Framed payload as uploaded.
    pub data: Bytes,
    /// Ordered chunk listing, as registered in the shard.
    pub chunks: Vec<XorbChunkInfo>,
    /// Total unframed bytes.
    pub unpacked_len: u64,
}

/// Accumulates framed chunks up to the configured caps.
pub struct XorbAssembler {
    max_size: usize,
    max_chunks: usize,
    data: BytesMut,
    chunks: Vec<XorbChunkInfo>,
    unpacked_len: u64,
}

impl XorbAssembler {
    pub fn new(max_size: usize, max_chunks: usize) -> Self {
        Self {
            max_size,
            max_chunks,
            data: BytesMut::new(),
            chunks: Vec::new(),
            unpacked_len: 0,
        }
    }

    /// Number of chunks currently accumulated.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Whether nothing has been appended since the last seal.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Append a chunk, returning its index within the open xorb.
    ///
    /// Returns `Ok(None)` when appending would exceed the size or chunk
    /// caps; the caller seals the xorb and retries. Errors only if the
    /// chunk could never fit even in an empty xorb.
    pub fn try_append(&mut self, hash: ChunkHash, data: &[u8]) -> Result<Option<u32>, CasError> {
        let framed = CHUNK_FRAME_HEADER_SIZE + data.len();
        if framed > self.max_size {
            return Err(CasError::ChunkExceedsXorbCaps(data.len()));
        }
        if self.data.len() + framed > self.max_size || self.chunks.len() + 1 > self.max_chunks {
            return Ok(None);
        }

        let index = self.chunks.len() as u32;
        let offset = self.unpacked_len as u32;
        write_chunk_frame(&mut self.data, data)?;
        self.chunks.push(XorbChunkInfo {
            hash,
            length: data.len() as u32,
            offset,
        });
        self.unpacked_len += data.len() as u64;
        Ok(Some(index))
    }

    /// Seal the open xorb, computing its identity hash and resetting the
    /// assembler. Returns `None` if nothing was accumulated.
    pub fn seal(&mut self) -> Option<SealedXorb> {
        if self.chunks.is_empty() {
            return None;
        }

        let chunks = std::mem::take(&mut self.chunks);
        let data = self.data.split().freeze();
        let unpacked_len = self.unpacked_len;
        self.unpacked_len = 0;

        let pairs: Vec<(ChunkHash, u64)> =
            chunks.iter().map(|c| (c.hash, c.length as u64)).collect();
        let hash = XorbHash::from(tree_hash(&pairs));

        debug!(
            %hash,
            chunks = chunks.len(),
            packed = data.len(),
            unpacked = unpacked_len,
            "sealed xorb"
        );

        Some(SealedXorb {
            hash,
            data,
            chunks,
            unpacked_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_bytes(asm: &mut XorbAssembler, data: &[u8]) -> Option<u32> {
        asm.try_append(ChunkHash::from_data(data), data).unwrap()
    }

    #[test]
    fn test_frame_header_layout() {
        let mut buf = BytesMut::new();
        write_chunk_frame(&mut buf, b"hello").unwrap();
        assert_eq!(buf.len(), CHUNK_FRAME_HEADER_SIZE + 5);
        assert_eq!(&buf[..8], &[0, 5, 0, 0, 0, 5, 0, 0]);
        assert_eq!(&buf[8..], b"hello");
    }

    #[test]
    fn test_frame_rejects_oversized_chunk() {
        let mut buf = BytesMut::new();
        let data = vec![0u8; 1 << 24];
        assert!(matches!(
            write_chunk_frame(&mut buf, &data),
            Err(CasError::ChunkTooLarge(_))
        ));
    }

    #[test]
    fn test_append_assigns_sequential_indices() {
        let mut asm = XorbAssembler::new(1 << 20, 100);
        assert_eq!(append_bytes(&mut asm, b"one"), Some(0));
        assert_eq!(append_bytes(&mut asm, b"two"), Some(1));
        assert_eq!(append_bytes(&mut asm, b"three"), Some(2));
        assert_eq!(asm.num_chunks(), 3);
    }

    #[test]
    fn test_chunk_cap_triggers_refusal() {
        let mut asm = XorbAssembler::new(1 << 20, 2);
        assert!(append_bytes(&mut asm, b"a").is_some());
        assert!(append_bytes(&mut asm, b"b").is_some());
        assert!(append_bytes(&mut asm, b"c").is_none());

        let sealed = asm.seal().unwrap();
        assert_eq!(sealed.chunks.len(), 2);
        // The assembler is reusable after sealing.
        assert_eq!(append_bytes(&mut asm, b"c"), Some(0));
    }

    #[test]
    fn test_size_cap_triggers_refusal() {
        // Two 100-byte chunks frame to 216 bytes; cap allows only one.
        let mut asm = XorbAssembler::new(150, 100);
        assert!(append_bytes(&mut asm, &[1u8; 100]).is_some());
        assert!(append_bytes(&mut asm, &[2u8; 100]).is_none());
    }

    #[test]
    fn test_single_oversized_chunk_is_an_error() {
        let mut asm = XorbAssembler::new(64, 100);
        let err = asm
            .try_append(ChunkHash::from_data(&[0u8; 100]), &[0u8; 100])
            .unwrap_err();
        assert!(matches!(err, CasError::ChunkExceedsXorbCaps(100)));
    }

    #[test]
    fn test_sealed_payload_is_framed_concatenation() {
        let mut asm = XorbAssembler::new(1 << 20, 100);
        append_bytes(&mut asm, b"aaaa");
        append_bytes(&mut asm, b"bb");
        let sealed = asm.seal().unwrap();

        let mut expected = BytesMut::new();
        write_chunk_frame(&mut expected, b"aaaa").unwrap();
        write_chunk_frame(&mut expected, b"bb").unwrap();
        assert_eq!(sealed.data, expected.freeze());

        assert_eq!(sealed.unpacked_len, 6);
        assert_eq!(sealed.chunks[0].offset, 0);
        assert_eq!(sealed.chunks[1].offset, 4);
    }

    #[test]
    fn test_seal_empty_returns_none() {
        let mut asm = XorbAssembler::new(1 << 20, 100);
        assert!(asm.seal().is_none());
    }

    #[test]
    fn test_identity_hash_stable_across_reassembly() {
        let build = || {
            let mut asm = XorbAssembler::new(1 << 20, 100);
            append_bytes(&mut asm, b"first chunk");
            append_bytes(&mut asm, b"second chunk");
            asm.seal().unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_identity_hash_depends_on_chunk_order() {
        let mut asm = XorbAssembler::new(1 << 20, 100);
        append_bytes(&mut asm, b"first chunk");
        append_bytes(&mut asm, b"second chunk");
        let a = asm.seal().unwrap();

        append_bytes(&mut asm, b"second chunk");
        append_bytes(&mut asm, b"first chunk");
        let b = asm.seal().unwrap();

        assert_ne!(a.hash, b.hash);
    }
}
