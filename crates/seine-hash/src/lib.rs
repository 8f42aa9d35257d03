//! BLAKE3-family tree hash implemented from primitives.
//!
//! Input is split into 1024-byte sub-chunks of 64-byte blocks. Each block is
//! compressed through a 7-round mixing function; sub-chunk chaining values
//! are combined pairwise up a binary tree until a single root remains, and
//! the root can be extended into arbitrary-length output via a
//! counter-indexed XOF step. Flags distinguish chunk-start, chunk-end,
//! parent, and root nodes so structurally different inputs never reuse
//! intermediate state.
//!
//! Two compression backends live behind one dispatch point: portable scalar
//! code and an SSE2 path on x86_64. Both are bit-for-bit equivalent to the
//! reference implementation (checked in tests against the `blake3` crate).
//!
//! ```
//! let digest = seine_hash::hash(b"some bytes");
//! assert_eq!(digest.len(), 32);
//! ```

mod portable;
#[cfg(target_arch = "x86_64")]
mod sse2;

pub use portable::{BLOCK_LEN, CHUNK_LEN, OUT_LEN};

use portable::{
    words_from_le_bytes, CHUNK_END, CHUNK_START, IV, KEYED_HASH, PARENT, ROOT,
};

/// Maximum tree depth: enough chaining values for 2^54 sub-chunks.
const MAX_DEPTH: usize = 54;

/// Dispatch to the fastest available compression backend.
#[inline]
fn compress(
    chaining_value: &[u32; 8],
    block_words: &[u32; 16],
    counter: u64,
    block_len: u32,
    flags: u32,
) -> [u32; 16] {
    #[cfg(target_arch = "x86_64")]
    {
        // SSE2 is part of the x86_64 baseline.
        return unsafe { sse2::compress(chaining_value, block_words, counter, block_len, flags) };
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        portable::compress(chaining_value, block_words, counter, block_len, flags)
    }
}

#[inline]
fn first_8_words(state: [u32; 16]) -> [u32; 8] {
    let mut cv = [0u32; 8];
    cv.copy_from_slice(&state[..8]);
    cv
}

/// Hash `data` in unkeyed mode, returning the 32-byte digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Hash `data` in keyed mode with a 32-byte key.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new_keyed(key);
    hasher.update(data);
    hasher.finalize()
}

/// State for hashing one 1024-byte sub-chunk.
struct ChunkState {
    chaining_value: [u32; 8],
    chunk_counter: u64,
    block: [u8; BLOCK_LEN],
    block_len: u8,
    blocks_compressed: u8,
    flags: u32,
}

impl ChunkState {
    fn new(key_words: [u32; 8], chunk_counter: u64, flags: u32) -> Self {
        Self {
            chaining_value: key_words,
            chunk_counter,
            block: [0; BLOCK_LEN],
            block_len: 0,
            blocks_compressed: 0,
            flags,
        }
    }

    fn len(&self) -> usize {
        BLOCK_LEN * self.blocks_compressed as usize + self.block_len as usize
    }

    fn start_flag(&self) -> u32 {
        if self.blocks_compressed == 0 {
            CHUNK_START
        } else {
            0
        }
    }

    fn update(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            // A full buffered block is only compressed once more input
            // arrives, so the final block always carries CHUNK_END.
            if self.block_len as usize == BLOCK_LEN {
                let mut block_words = [0u32; 16];
                words_from_le_bytes(&self.block, &mut block_words);
                self.chaining_value = first_8_words(compress(
                    &self.chaining_value,
                    &block_words,
                    self.chunk_counter,
                    BLOCK_LEN as u32,
                    self.flags | self.start_flag(),
                ));
                self.blocks_compressed += 1;
                self.block = [0; BLOCK_LEN];
                self.block_len = 0;
            }

            let want = BLOCK_LEN - self.block_len as usize;
            let take = want.min(input.len());
            self.block[self.block_len as usize..self.block_len as usize + take]
                .copy_from_slice(&input[..take]);
            self.block_len += take as u8;
            input = &input[take..];
        }
    }

    fn output(&self) -> Output {
        let mut block_words = [0u32; 16];
        words_from_le_bytes(&self.block, &mut block_words);
        Output {
            input_chaining_value: self.chaining_value,
            block_words,
            counter: self.chunk_counter,
            block_len: self.block_len as u32,
            flags: self.flags | self.start_flag() | CHUNK_END,
        }
    }
}

/// A node's final compression input, captured before deciding whether it is
/// the root. Chaining values and root output both derive from it.
struct Output {
    input_chaining_value: [u32; 8],
    block_words: [u32; 16],
    counter: u64,
    block_len: u32,
    flags: u32,
}

impl Output {
    fn chaining_value(&self) -> [u32; 8] {
        first_8_words(compress(
            &self.input_chaining_value,
            &self.block_words,
            self.counter,
            self.block_len,
            self.flags,
        ))
    }

    /// Extend this node as the root into `out`, 64 bytes per output block,
    /// indexed by an output counter.
    fn root_output_bytes(&self, out: &mut [u8]) {
        for (output_block_counter, out_block) in out.chunks_mut(2 * OUT_LEN).enumerate() {
            let words = compress(
                &self.input_chaining_value,
                &self.block_words,
                output_block_counter as u64,
                self.block_len,
                self.flags | ROOT,
            );
            for (word, dest) in words.iter().zip(out_block.chunks_mut(4)) {
                dest.copy_from_slice(&word.to_le_bytes()[..dest.len()]);
            }
        }
    }
}

fn parent_output(
    left_child_cv: [u32; 8],
    right_child_cv: [u32; 8],
    key_words: [u32; 8],
    flags: u32,
) -> Output {
    let mut block_words = [0u32; 16];
    block_words[..8].copy_from_slice(&left_child_cv);
    block_words[8..].copy_from_slice(&right_child_cv);
    Output {
        input_chaining_value: key_words,
        block_words,
        counter: 0,
        block_len: BLOCK_LEN as u32,
        flags: PARENT | flags,
    }
}

fn parent_cv(
    left_child_cv: [u32; 8],
    right_child_cv: [u32; 8],
    key_words: [u32; 8],
    flags: u32,
) -> [u32; 8] {
    parent_output(left_child_cv, right_child_cv, key_words, flags).chaining_value()
}

/// Incremental tree hasher.
///
/// The CV stack holds one chaining value per completed subtree, indexed by
/// depth; merging happens eagerly whenever the sub-chunk count gains a
/// trailing zero bit, so the stack never exceeds [`MAX_DEPTH`] entries.
pub struct Hasher {
    chunk_state: ChunkState,
    key_words: [u32; 8],
    cv_stack: [[u32; 8]; MAX_DEPTH],
    cv_stack_len: u8,
    flags: u32,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    fn new_internal(key_words: [u32; 8], flags: u32) -> Self {
        Self {
            chunk_state: ChunkState::new(key_words, 0, flags),
            key_words,
            cv_stack: [[0; 8]; MAX_DEPTH],
            cv_stack_len: 0,
            flags,
        }
    }

    /// Construct an unkeyed hasher.
    pub fn new() -> Self {
        Self::new_internal(IV, 0)
    }

    /// Construct a keyed hasher with a 32-byte key.
    pub fn new_keyed(key: &[u8; 32]) -> Self {
        let mut key_words = [0u32; 8];
        words_from_le_bytes(key, &mut key_words);
        Self::new_internal(key_words, KEYED_HASH)
    }

    fn push_stack(&mut self, cv: [u32; 8]) {
        self.cv_stack[self.cv_stack_len as usize] = cv;
        self.cv_stack_len += 1;
    }

    fn pop_stack(&mut self) -> [u32; 8] {
        self.cv_stack_len -= 1;
        self.cv_stack[self.cv_stack_len as usize]
    }

    fn add_chunk_chaining_value(&mut self, mut new_cv: [u32; 8], mut total_chunks: u64) {
        // Each trailing zero bit of the completed-chunk count is a subtree
        // that just gained its right half: merge it.
        while total_chunks & 1 == 0 {
            new_cv = parent_cv(self.pop_stack(), new_cv, self.key_words, self.flags);
            total_chunks >>= 1;
        }
        self.push_stack(new_cv);
    }

    /// Absorb input bytes; may be called any number of times.
    pub fn update(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            // A full sub-chunk is only finalized into the tree once more
            // input arrives; the last sub-chunk must stay open so it can
            // become the root for inputs up to CHUNK_LEN.
            if self.chunk_state.len() == CHUNK_LEN {
                let chunk_cv = self.chunk_state.output().chaining_value();
                let total_chunks = self.chunk_state.chunk_counter + 1;
                self.add_chunk_chaining_value(chunk_cv, total_chunks);
                self.chunk_state = ChunkState::new(self.key_words, total_chunks, self.flags);
            }

            let want = CHUNK_LEN - self.chunk_state.len();
            let take = want.min(input.len());
            self.chunk_state.update(&input[..take]);
            input = &input[take..];
        }
    }

    /// Produce the 32-byte digest. Does not consume the hasher.
    pub fn finalize(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.finalize_xof(&mut out);
        out
    }

    /// Fill `out` with extended output of arbitrary length.
    pub fn finalize_xof(&self, out: &mut [u8]) {
        // Fold the CV stack right-to-left into the root output node.
        let mut output = self.chunk_state.output();
        let mut parent_nodes_remaining = self.cv_stack_len as usize;
        while parent_nodes_remaining > 0 {
            parent_nodes_remaining -= 1;
            output = parent_output(
                self.cv_stack[parent_nodes_remaining],
                output.chaining_value(),
                self.key_words,
                self.flags,
            );
        }
        output.root_output_bytes(out);
    }
}
