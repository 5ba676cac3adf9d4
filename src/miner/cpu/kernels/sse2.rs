//! 4-way SSE2 kernels. `4way` hashes four groups of lanes per batch, and
//! `sse4_64` is the `sse2_64` engine compiled with SSE4.1 enabled, which lets
//! the compiler use the newer blend and extract forms.

use super::lanes::{self, Lanes};
use super::Precomputed;
use crate::miner::cpu::framework::{BatchHasher, Sha256d};
use std::arch::x86_64::*;

pub(crate) static SSE2_4WAY: Sha256d<Sse2FourWay> = Sha256d(Sse2FourWay);

pub(crate) static SSE2_64: Sha256d<Sse2> = Sha256d(Sse2);

/// Only handed out once SSE4.1 has been detected
pub(crate) static SSE4_64: Sha256d<Sse4> = Sha256d(Sse4(()));

#[derive(Clone, Copy)]
pub(crate) struct M128(__m128i);

macro_rules! rotr {
    ($x:expr, $n:literal) => {
        _mm_or_si128(_mm_srli_epi32::<$n>($x), _mm_slli_epi32::<{ 32 - $n }>($x))
    };
}

impl Lanes for M128 {
    const WIDTH: usize = 4;

    #[inline(always)]
    unsafe fn splat(v: u32) -> Self {
        M128(_mm_set1_epi32(v as i32))
    }

    #[inline(always)]
    unsafe fn load(src: &[u32]) -> Self {
        debug_assert!(src.len() >= 4);
        M128(_mm_loadu_si128(src.as_ptr() as *const __m128i))
    }

    #[inline(always)]
    unsafe fn store(self, dst: &mut [u32]) {
        debug_assert!(dst.len() >= 4);
        _mm_storeu_si128(dst.as_mut_ptr() as *mut __m128i, self.0)
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        M128(_mm_add_epi32(self.0, rhs.0))
    }

    #[inline(always)]
    unsafe fn ch(e: Self, f: Self, g: Self) -> Self {
        M128(_mm_xor_si128(g.0, _mm_and_si128(e.0, _mm_xor_si128(f.0, g.0))))
    }

    #[inline(always)]
    unsafe fn maj(a: Self, b: Self, c: Self) -> Self {
        M128(_mm_or_si128(
            _mm_and_si128(a.0, b.0),
            _mm_and_si128(c.0, _mm_or_si128(a.0, b.0)),
        ))
    }

    #[inline(always)]
    unsafe fn big_sigma0(self) -> Self {
        let x = self.0;
        M128(_mm_xor_si128(_mm_xor_si128(rotr!(x, 2), rotr!(x, 13)), rotr!(x, 22)))
    }

    #[inline(always)]
    unsafe fn big_sigma1(self) -> Self {
        let x = self.0;
        M128(_mm_xor_si128(_mm_xor_si128(rotr!(x, 6), rotr!(x, 11)), rotr!(x, 25)))
    }

    #[inline(always)]
    unsafe fn small_sigma0(self) -> Self {
        let x = self.0;
        M128(_mm_xor_si128(
            _mm_xor_si128(rotr!(x, 7), rotr!(x, 18)),
            _mm_srli_epi32::<3>(x),
        ))
    }

    #[inline(always)]
    unsafe fn small_sigma1(self) -> Self {
        let x = self.0;
        M128(_mm_xor_si128(
            _mm_xor_si128(rotr!(x, 17), rotr!(x, 19)),
            _mm_srli_epi32::<10>(x),
        ))
    }
}

/// Four groups of four lanes
pub(crate) struct Sse2FourWay;

impl BatchHasher for Sse2FourWay {
    const BATCH: usize = 16;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        unsafe { lanes::fill_word7::<M128>(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { lanes::lane_digest::<M128>(pre, base, lane) }
    }
}

pub(crate) struct Sse2;

impl BatchHasher for Sse2 {
    const BATCH: usize = 4;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        // SSE2 is part of the x86_64 baseline
        unsafe { lanes::fill_word7::<M128>(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { lanes::lane_digest::<M128>(pre, base, lane) }
    }
}

pub(crate) struct Sse4(());

impl BatchHasher for Sse4 {
    const BATCH: usize = 4;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        unsafe { sse4_word7(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { sse4_digest(pre, base, lane) }
    }
}

#[target_feature(enable = "sse4.1")]
unsafe fn sse4_word7(pre: &Precomputed, base: u32, out: &mut [u32]) {
    lanes::fill_word7::<M128>(pre, base, out)
}

#[target_feature(enable = "sse4.1")]
unsafe fn sse4_digest(pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
    lanes::lane_digest::<M128>(pre, base, lane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::kernels::lanes::tests::{check_engine, check_primitives};

    #[test]
    fn test_sse2_lanes() {
        unsafe {
            check_primitives::<M128>();
            check_engine::<M128>();
        }
    }
}
