//! SHA-256d and scrypt mining kernels, plus the pieces of SHA-256 they share.

#![allow(clippy::unreadable_literal)]

#[cfg_attr(
    not(all(
        any(target_arch = "powerpc", target_arch = "powerpc64"),
        target_feature = "altivec"
    )),
    allow(dead_code)
)]
pub(crate) mod altivec;
pub(crate) mod cryptopp;
pub(crate) mod lanes;
pub(crate) mod scalar;
pub(crate) mod scrypt;

#[cfg(target_arch = "x86_64")]
pub(crate) mod avx2;
#[cfg(target_arch = "aarch64")]
pub(crate) mod neon;
#[cfg(target_arch = "x86_64")]
pub(crate) mod sha;
#[cfg(target_arch = "x86_64")]
pub(crate) mod sse2;
#[cfg(target_arch = "x86_64")]
pub(crate) mod via;

use crate::miner::cpu::framework::Sha256d;
use crate::miner::types::WorkItem;

/// The reference kernel
pub(crate) static C: Sha256d<scalar::Scalar> = Sha256d(scalar::Scalar);

pub(crate) static SCRYPT: scrypt::Scrypt = scrypt::Scrypt;

/// SHA-256 initial hash value
pub(crate) const H256: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// SHA-256 round constants
pub(crate) const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

/// Words 8..16 of the second hash's message block: padding for a 32 byte message
pub(crate) const SECOND_BLOCK_PAD: [u32; 8] = [0x80000000, 0, 0, 0, 0, 0, 0, 0x100];

/// Rounds of the second compression needed for output word 7. The final `h`
/// register is the `e` value produced by round 60, so rounds 61..64 can be
/// skipped when only word 7 is wanted.
pub(crate) const WORD7_ROUNDS: usize = 61;

/// The widest batch any kernel processes per step
pub(crate) const MAX_BATCH: usize = 32;

#[inline(always)]
pub(crate) fn big_sigma0(x: u32) -> u32 {
    x.rotate_right(2) ^ x.rotate_right(13) ^ x.rotate_right(22)
}

#[inline(always)]
pub(crate) fn big_sigma1(x: u32) -> u32 {
    x.rotate_right(6) ^ x.rotate_right(11) ^ x.rotate_right(25)
}

#[inline(always)]
pub(crate) fn small_sigma0(x: u32) -> u32 {
    x.rotate_right(7) ^ x.rotate_right(18) ^ (x >> 3)
}

#[inline(always)]
pub(crate) fn small_sigma1(x: u32) -> u32 {
    x.rotate_right(17) ^ x.rotate_right(19) ^ (x >> 10)
}

#[inline(always)]
pub(crate) fn round(s: &mut [u32; 8], k: u32, w: u32) {
    let [a, b, c, d, e, f, g, h] = *s;
    let t1 = h
        .wrapping_add(big_sigma1(e))
        .wrapping_add((e & f) ^ (!e & g))
        .wrapping_add(k)
        .wrapping_add(w);
    let t2 = big_sigma0(a).wrapping_add((a & b) ^ (a & c) ^ (b & c));
    *s = [t1.wrapping_add(t2), a, b, c, d.wrapping_add(t1), e, f, g];
}

/// Compress one 16 word message block into `state`
pub(crate) fn compress(state: &mut [u32; 8], block: &[u32; 16]) {
    let mut w = [0u32; 64];
    w[..16].copy_from_slice(block);
    for i in 16..64 {
        w[i] = small_sigma1(w[i - 2])
            .wrapping_add(w[i - 7])
            .wrapping_add(small_sigma0(w[i - 15]))
            .wrapping_add(w[i - 16]);
    }

    let mut s = *state;
    for (&k, &w) in K.iter().zip(w.iter()) {
        round(&mut s, k, w);
    }

    for (h, v) in state.iter_mut().zip(s.iter()) {
        *h = h.wrapping_add(*v);
    }
}

/// Serialize a final hash state to digest bytes
pub(crate) fn state_to_bytes(state: &[u32; 8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Cheap pre-filter on the most significant hash word. `h7` is final state
/// word 7; the digest reads it little-endian.
#[inline(always)]
pub(crate) fn passes_fast_reject(h7: u32, target7: u32) -> bool {
    h7.swap_bytes() <= target7
}

/// Everything about a work item that stays fixed while the nonce varies
pub(crate) struct Precomputed {
    pub header: [u8; 80],
    pub midstate: [u32; 8],
    pub tail: [u32; 16],
    /// Working state after the three rounds preceding the nonce word
    pub state3: [u32; 8],
    pub w16: u32,
    pub w17: u32,
    pub pad: [u32; 8],
}

impl Precomputed {
    pub fn new(work: &WorkItem) -> Self {
        let tail = work.header().tail_block();
        let midstate = *work.midstate();

        let mut state3 = midstate;
        for i in 0..3 {
            round(&mut state3, K[i], tail[i]);
        }

        // neither word reads tail[3]
        let w16 = small_sigma1(tail[14])
            .wrapping_add(tail[9])
            .wrapping_add(small_sigma0(tail[1]))
            .wrapping_add(tail[0]);
        let w17 = small_sigma1(tail[15])
            .wrapping_add(tail[10])
            .wrapping_add(small_sigma0(tail[2]))
            .wrapping_add(tail[1]);

        Self {
            header: *work.header().as_bytes(),
            midstate,
            tail,
            state3,
            w16,
            w17,
            pad: *work.pad(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::framework::Kernel;
    use crate::miner::cpu::{AlgorithmId, Registry};
    use crate::miner::fixtures::*;
    use crate::miner::types::{double_sha256, Target};
    use rand::Rng;

    /// Every SHA-256d kernel runnable here, plus the portable 4-way kernel
    /// which runs on any host
    fn kernels_under_test() -> Vec<(String, &'static dyn Kernel)> {
        let mut kernels: Vec<(String, &'static dyn Kernel)> = Registry::detect()
            .available()
            .iter()
            .filter(|id| id.is_sha256d())
            .filter_map(|id| id.kernel().map(|k| (id.to_string(), k)))
            .collect();

        if !Registry::detect().available().contains(AlgorithmId::Altivec) {
            kernels.push(("portable 4-way".to_string(), &altivec::ALTIVEC_4WAY));
        }

        kernels
    }

    #[test]
    fn test_reference_matches_ring() {
        let work = random_work(Target::MAX);
        let pre = Precomputed::new(&work);

        for nonce in (0..1000).chain(u32::MAX - 10..=u32::MAX) {
            let expected = double_sha256(work.header().with_nonce(nonce).as_bytes());
            let actual = state_to_bytes(&scalar::double_hash(
                &pre.midstate,
                &pre.tail,
                &pre.pad,
                nonce,
            ));

            assert_eq!(expected, actual, "reference mismatch at nonce {}", nonce);
        }
    }

    #[test]
    fn test_precomputed_schedule() {
        let work = random_work(Target::MAX);
        let pre = Precomputed::new(&work);

        let mut w = [0u32; 18];
        w[..16].copy_from_slice(&pre.tail);
        w[3] = rand::random();
        for i in 16..18 {
            w[i] = small_sigma1(w[i - 2])
                .wrapping_add(w[i - 7])
                .wrapping_add(small_sigma0(w[i - 15]))
                .wrapping_add(w[i - 16]);
        }
        assert_eq!((pre.w16, pre.w17), (w[16], w[17]));

        let mut state = *work.midstate();
        for i in 0..3 {
            round(&mut state, K[i], w[i]);
        }
        assert_eq!(state, pre.state3);
    }

    #[test]
    fn test_cross_kernel_equivalence() {
        let mut work = random_work(Target::MAX);
        let base = rand::thread_rng().gen_range(0..u32::MAX - 100);

        for (name, kernel) in kernels_under_test() {
            for nonce in base..base + 70 {
                let run = kernel.run(&mut work, nonce, nonce);
                let expected = double_sha256(work.header().with_nonce(nonce).as_bytes());

                assert!(run.found, "{} rejected nonce {} under the max target", name, nonce);
                assert_eq!(run.last_nonce, nonce, "{}", name);
                assert_eq!(work.header().nonce(), nonce, "{}", name);
                assert_eq!(
                    hex::encode(work.hash()),
                    hex::encode(expected),
                    "{} hash mismatch at nonce {}",
                    name,
                    nonce
                );
            }
        }
    }

    #[test]
    fn test_end_of_nonce_space() {
        let mut work = random_work(Target::MAX);

        for (name, kernel) in kernels_under_test() {
            let run = kernel.run(&mut work, u32::MAX, u32::MAX);
            assert!(run.found, "{}", name);
            assert_eq!(run.last_nonce, u32::MAX, "{}", name);
            assert_eq!(*work.hash(), work.pow_hash(u32::MAX), "{}", name);
        }
    }

    #[test]
    fn test_genesis_found_by_every_kernel() {
        for (name, kernel) in kernels_under_test() {
            let mut work = genesis_work();
            let run = kernel.run(&mut work, GENESIS_NONCE - 2, GENESIS_NONCE + 2);

            assert!(run.found, "{} missed the genesis nonce", name);
            assert_eq!(run.last_nonce, GENESIS_NONCE, "{}", name);
            assert_eq!(*work.hash(), genesis_hash(), "{}", name);
        }
    }

    #[test]
    fn test_exhaustion_without_false_positives() {
        for (name, kernel) in kernels_under_test() {
            let mut work = genesis_work();
            let run = kernel.run(&mut work, GENESIS_NONCE + 1, GENESIS_NONCE + 4);

            assert!(!run.found, "{} reported a false positive", name);
            assert_eq!(run.last_nonce, GENESIS_NONCE + 4, "{}", name);
        }
    }

    #[test]
    fn test_fast_reject_never_drops_accepted_hashes() {
        let target = Target::from_compact(0x1d00_ffff);
        assert!(passes_fast_reject(0, target.word7()));
        assert!(!passes_fast_reject(1, target.word7()));
        assert!(passes_fast_reject(u32::MAX, Target::MAX.word7()));
        assert!(passes_fast_reject(0x0100_0000, 1));
        assert!(!passes_fast_reject(0x0200_0000, 1));
    }
}
