//! SSE2 compression function for x86_64.
//!
//! The 16-word state is held as four 128-bit rows of four lanes each. A
//! column step mixes all four columns at once; diagonals are handled by
//! rotating rows 1-3 left by 1, 2, and 3 lanes, running another column
//! step, and rotating back. Message words are gathered per G pair from the
//! scalar schedule, which keeps the lane bookkeeping trivial and lets the
//! portable and vector paths share the permutation.
//!
//! Must produce bit-identical output to [`crate::portable::compress`];
//! the equivalence is covered by randomized tests in `lib.rs`.

#![allow(unsafe_code)]

use core::arch::x86_64::*;

use crate::portable::{permute, IV};

#[inline(always)]
unsafe fn rot16(v: __m128i) -> __m128i {
    _mm_or_si128(_mm_srli_epi32::<16>(v), _mm_slli_epi32::<16>(v))
}

#[inline(always)]
unsafe fn rot12(v: __m128i) -> __m128i {
    _mm_or_si128(_mm_srli_epi32::<12>(v), _mm_slli_epi32::<20>(v))
}

#[inline(always)]
unsafe fn rot8(v: __m128i) -> __m128i {
    _mm_or_si128(_mm_srli_epi32::<8>(v), _mm_slli_epi32::<24>(v))
}

#[inline(always)]
unsafe fn rot7(v: __m128i) -> __m128i {
    _mm_or_si128(_mm_srli_epi32::<7>(v), _mm_slli_epi32::<25>(v))
}

#[inline(always)]
unsafe fn gather(m: &[u32; 16], i0: usize, i1: usize, i2: usize, i3: usize) -> __m128i {
    _mm_setr_epi32(m[i0] as i32, m[i1] as i32, m[i2] as i32, m[i3] as i32)
}

/// One vectorized column step: G applied to all four lanes.
#[inline(always)]
unsafe fn g(
    row0: &mut __m128i,
    row1: &mut __m128i,
    row2: &mut __m128i,
    row3: &mut __m128i,
    mx: __m128i,
    my: __m128i,
) {
    *row0 = _mm_add_epi32(_mm_add_epi32(*row0, *row1), mx);
    *row3 = rot16(_mm_xor_si128(*row3, *row0));
    *row2 = _mm_add_epi32(*row2, *row3);
    *row1 = rot12(_mm_xor_si128(*row1, *row2));
    *row0 = _mm_add_epi32(_mm_add_epi32(*row0, *row1), my);
    *row3 = rot8(_mm_xor_si128(*row3, *row0));
    *row2 = _mm_add_epi32(*row2, *row3);
    *row1 = rot7(_mm_xor_si128(*row1, *row2));
}

/// Vectorized compression function. SSE2 is part of the x86_64 baseline,
/// so callers on this architecture may invoke it unconditionally.
#[target_feature(enable = "sse2")]
pub unsafe fn compress(
    chaining_value: &[u32; 8],
    block_words: &[u32; 16],
    counter: u64,
    block_len: u32,
    flags: u32,
) -> [u32; 16] {
    let cv0 = _mm_setr_epi32(
        chaining_value[0] as i32,
        chaining_value[1] as i32,
        chaining_value[2] as i32,
        chaining_value[3] as i32,
    );
    let cv1 = _mm_setr_epi32(
        chaining_value[4] as i32,
        chaining_value[5] as i32,
        chaining_value[6] as i32,
        chaining_value[7] as i32,
    );

    let mut row0 = cv0;
    let mut row1 = cv1;
    let mut row2 = _mm_setr_epi32(IV[0] as i32, IV[1] as i32, IV[2] as i32, IV[3] as i32);
    let mut row3 = _mm_setr_epi32(
        counter as u32 as i32,
        (counter >> 32) as u32 as i32,
        block_len as i32,
        flags as i32,
    );

    let mut m = *block_words;
    for r in 0..7 {
        // Columns.
        let mx = gather(&m, 0, 2, 4, 6);
        let my = gather(&m, 1, 3, 5, 7);
        g(&mut row0, &mut row1, &mut row2, &mut row3, mx, my);

        // Diagonalize: rotate rows 1-3 left by 1, 2, 3 lanes.
        row1 = _mm_shuffle_epi32::<0b00_11_10_01>(row1);
        row2 = _mm_shuffle_epi32::<0b01_00_11_10>(row2);
        row3 = _mm_shuffle_epi32::<0b10_01_00_11>(row3);

        let mx = gather(&m, 8, 10, 12, 14);
        let my = gather(&m, 9, 11, 13, 15);
        g(&mut row0, &mut row1, &mut row2, &mut row3, mx, my);

        // Undiagonalize.
        row1 = _mm_shuffle_epi32::<0b10_01_00_11>(row1);
        row2 = _mm_shuffle_epi32::<0b01_00_11_10>(row2);
        row3 = _mm_shuffle_epi32::<0b00_11_10_01>(row3);

        if r < 6 {
            permute(&mut m);
        }
    }

    let out0 = _mm_xor_si128(row0, row2);
    let out1 = _mm_xor_si128(row1, row3);
    let out2 = _mm_xor_si128(row2, cv0);
    let out3 = _mm_xor_si128(row3, cv1);

    let mut state = [0u32; 16];
    _mm_storeu_si128(state.as_mut_ptr() as *mut __m128i, out0);
    _mm_storeu_si128(state.as_mut_ptr().add(4) as *mut __m128i, out1);
    _mm_storeu_si128(state.as_mut_ptr().add(8) as *mut __m128i, out2);
    _mm_storeu_si128(state.as_mut_ptr().add(12) as *mut __m128i, out3);
    state
}
