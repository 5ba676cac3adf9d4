#![allow(clippy::unreadable_literal, clippy::cast_ptr_alignment)]

use super::{Precomputed, H256, K};
use crate::miner::cpu::framework::{BatchHasher, Sha256d};
use std::arch::x86_64::*;

/// Only handed out once the SHA extensions have been detected
pub(crate) static SHANI: Sha256d<ShaNi> = Sha256d(ShaNi(()));

/// Kernel using the x86 SHA extensions, one nonce at a time
pub(crate) struct ShaNi(());

impl BatchHasher for ShaNi {
    const BATCH: usize = 1;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        out[0] = self.digest(pre, base, 0)[7];
    }

    fn digest(&self, pre: &Precomputed, base: u32, _lane: usize) -> [u32; 8] {
        unsafe { double_hash(pre, base) }
    }
}

#[target_feature(enable = "sha")]
#[target_feature(enable = "sse4.1")]
unsafe fn double_hash(pre: &Precomputed, nonce: u32) -> [u32; 8] {
    let mut block = pre.tail;
    block[3] = nonce.swap_bytes();
    let mut hash1 = pre.midstate;
    process(&mut hash1, &block);

    let mut block = [0u32; 16];
    block[..8].copy_from_slice(&hash1);
    block[8..].copy_from_slice(&pre.pad);
    let mut state = H256;
    process(&mut state, &block);
    state
}

/// Compress one block of message words into `state`.
#[inline]
#[target_feature(enable = "sha")]
#[target_feature(enable = "sse4.1")]
unsafe fn process(state: &mut [u32; 8], block: &[u32; 16]) {
    /* Load initial values */
    let tmp = _mm_loadu_si128(state.as_ptr() as _);
    let mut state1 = _mm_loadu_si128(state.as_ptr().add(4) as _);

    let tmp = _mm_shuffle_epi32(tmp, 0xb1); /* CDAB */
    state1 = _mm_shuffle_epi32(state1, 0x1b); /* EFGH */
    let mut state0 = _mm_alignr_epi8(tmp, state1, 8); /* ABEF */
    state1 = _mm_blend_epi16(state1, tmp, 0xf0); /* CDGH */

    /* Save current state */
    let abef_save = state0;
    let cdgh_save = state1;

    // words, not bytes, so no endian shuffle
    let mut msg = [
        _mm_loadu_si128(block.as_ptr() as _),
        _mm_loadu_si128(block.as_ptr().add(4) as _),
        _mm_loadu_si128(block.as_ptr().add(8) as _),
        _mm_loadu_si128(block.as_ptr().add(12) as _),
    ];

    /* Rounds 4j..4j+4; msg[j % 4] holds schedule words 4j..4j+4 */
    for j in 0..16 {
        if j >= 4 {
            let tmp = _mm_add_epi32(
                _mm_sha256msg1_epu32(msg[j % 4], msg[(j + 1) % 4]),
                _mm_alignr_epi8(msg[(j + 3) % 4], msg[(j + 2) % 4], 4),
            );
            msg[j % 4] = _mm_sha256msg2_epu32(tmp, msg[(j + 3) % 4]);
        }

        let k = _mm_loadu_si128(K[4 * j..].as_ptr() as _);
        let wk = _mm_add_epi32(msg[j % 4], k);
        state1 = _mm_sha256rnds2_epu32(state1, state0, wk);
        state0 = _mm_sha256rnds2_epu32(state0, state1, _mm_shuffle_epi32(wk, 0x0e));
    }

    /* Combine state */
    state0 = _mm_add_epi32(state0, abef_save);
    state1 = _mm_add_epi32(state1, cdgh_save);

    let tmp = _mm_shuffle_epi32(state0, 0x1b); /* FEBA */
    state1 = _mm_shuffle_epi32(state1, 0xb1); /* DCHG */
    state0 = _mm_blend_epi16(tmp, state1, 0xf0); /* DCBA */
    state1 = _mm_alignr_epi8(state1, tmp, 8); /* ABEF */

    /* Save state */
    _mm_storeu_si128(state.as_mut_ptr() as _, state0);
    _mm_storeu_si128(state.as_mut_ptr().add(4) as _, state1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::kernels::compress;

    #[test]
    fn test_process_matches_scalar() {
        if !(is_x86_feature_detected!("sha") && is_x86_feature_detected!("sse4.1")) {
            return;
        }

        for _ in 0..32 {
            let block: [u32; 16] = rand::random();
            let mut expected = H256;
            compress(&mut expected, &block);

            let mut actual = H256;
            unsafe { process(&mut actual, &block) };

            assert_eq!(expected, actual);
        }
    }
}
