#![allow(clippy::cast_ptr_alignment)]

use super::lanes::{self, Lanes};
use super::Precomputed;
use crate::miner::cpu::framework::{BatchHasher, Sha256d};
use std::arch::x86_64::*;

/// Only handed out once AVX2 has been detected
pub(crate) static AVX2_8WAY: Sha256d<Avx2> = Sha256d(Avx2(()));

/// Eight 32-bit lanes in one AVX2 register
#[derive(Clone, Copy)]
pub(crate) struct M256(__m256i);

macro_rules! rotr {
    ($x:expr, $n:literal) => {
        _mm256_or_si256(
            _mm256_srli_epi32::<$n>($x),
            _mm256_slli_epi32::<{ 32 - $n }>($x),
        )
    };
}

macro_rules! xor3 {
    ($a:expr, $b:expr, $c:expr) => {
        _mm256_xor_si256(_mm256_xor_si256($a, $b), $c)
    };
}

impl Lanes for M256 {
    const WIDTH: usize = 8;

    #[inline(always)]
    unsafe fn splat(v: u32) -> Self {
        M256(_mm256_set1_epi32(v as i32))
    }

    #[inline(always)]
    unsafe fn load(src: &[u32]) -> Self {
        debug_assert!(src.len() >= 8);
        M256(_mm256_loadu_si256(src.as_ptr() as *const __m256i))
    }

    #[inline(always)]
    unsafe fn store(self, dst: &mut [u32]) {
        debug_assert!(dst.len() >= 8);
        _mm256_storeu_si256(dst.as_mut_ptr() as *mut __m256i, self.0)
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        M256(_mm256_add_epi32(self.0, rhs.0))
    }

    #[inline(always)]
    unsafe fn ch(e: Self, f: Self, g: Self) -> Self {
        M256(_mm256_xor_si256(
            g.0,
            _mm256_and_si256(e.0, _mm256_xor_si256(f.0, g.0)),
        ))
    }

    #[inline(always)]
    unsafe fn maj(a: Self, b: Self, c: Self) -> Self {
        M256(_mm256_or_si256(
            _mm256_and_si256(a.0, b.0),
            _mm256_and_si256(c.0, _mm256_or_si256(a.0, b.0)),
        ))
    }

    #[inline(always)]
    unsafe fn big_sigma0(self) -> Self {
        let x = self.0;
        M256(xor3!(rotr!(x, 2), rotr!(x, 13), rotr!(x, 22)))
    }

    #[inline(always)]
    unsafe fn big_sigma1(self) -> Self {
        let x = self.0;
        M256(xor3!(rotr!(x, 6), rotr!(x, 11), rotr!(x, 25)))
    }

    #[inline(always)]
    unsafe fn small_sigma0(self) -> Self {
        let x = self.0;
        M256(xor3!(rotr!(x, 7), rotr!(x, 18), _mm256_srli_epi32::<3>(x)))
    }

    #[inline(always)]
    unsafe fn small_sigma1(self) -> Self {
        let x = self.0;
        M256(xor3!(rotr!(x, 17), rotr!(x, 19), _mm256_srli_epi32::<10>(x)))
    }
}

pub(crate) struct Avx2(());

impl BatchHasher for Avx2 {
    const BATCH: usize = 8;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        unsafe { avx2_word7(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { avx2_digest(pre, base, lane) }
    }
}

#[target_feature(enable = "avx2")]
unsafe fn avx2_word7(pre: &Precomputed, base: u32, out: &mut [u32]) {
    lanes::fill_word7::<M256>(pre, base, out)
}

#[target_feature(enable = "avx2")]
unsafe fn avx2_digest(pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
    lanes::lane_digest::<M256>(pre, base, lane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::kernels::lanes::tests::{check_engine, check_primitives};

    #[target_feature(enable = "avx2")]
    unsafe fn check_avx2() {
        check_primitives::<M256>();
        check_engine::<M256>();
    }

    #[test]
    fn test_avx2_lanes() {
        if is_x86_feature_detected!("avx2") {
            unsafe { check_avx2() }
        }
    }
}
