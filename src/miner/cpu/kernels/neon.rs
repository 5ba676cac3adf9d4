use super::lanes::{self, Lanes};
use super::Precomputed;
use crate::miner::cpu::framework::{BatchHasher, Sha256d};
use std::arch::aarch64::*;

pub(crate) static NEON_4WAY: Sha256d<Neon4Way> = Sha256d(Neon4Way);

#[derive(Clone, Copy)]
pub(crate) struct Neon(uint32x4_t);

macro_rules! rotr {
    ($x:expr, $n:literal) => {
        vorrq_u32(vshrq_n_u32::<$n>($x), vshlq_n_u32::<{ 32 - $n }>($x))
    };
}

macro_rules! xor3 {
    ($a:expr, $b:expr, $c:expr) => {
        veorq_u32(veorq_u32($a, $b), $c)
    };
}

impl Lanes for Neon {
    const WIDTH: usize = 4;

    #[inline(always)]
    unsafe fn splat(v: u32) -> Self {
        Neon(vdupq_n_u32(v))
    }

    #[inline(always)]
    unsafe fn load(src: &[u32]) -> Self {
        debug_assert!(src.len() >= 4);
        Neon(vld1q_u32(src.as_ptr()))
    }

    #[inline(always)]
    unsafe fn store(self, dst: &mut [u32]) {
        debug_assert!(dst.len() >= 4);
        vst1q_u32(dst.as_mut_ptr(), self.0)
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        Neon(vaddq_u32(self.0, rhs.0))
    }

    #[inline(always)]
    unsafe fn ch(e: Self, f: Self, g: Self) -> Self {
        Neon(veorq_u32(g.0, vandq_u32(e.0, veorq_u32(f.0, g.0))))
    }

    #[inline(always)]
    unsafe fn maj(a: Self, b: Self, c: Self) -> Self {
        Neon(vorrq_u32(
            vandq_u32(a.0, b.0),
            vandq_u32(c.0, vorrq_u32(a.0, b.0)),
        ))
    }

    #[inline(always)]
    unsafe fn big_sigma0(self) -> Self {
        let x = self.0;
        Neon(xor3!(rotr!(x, 2), rotr!(x, 13), rotr!(x, 22)))
    }

    #[inline(always)]
    unsafe fn big_sigma1(self) -> Self {
        let x = self.0;
        Neon(xor3!(rotr!(x, 6), rotr!(x, 11), rotr!(x, 25)))
    }

    #[inline(always)]
    unsafe fn small_sigma0(self) -> Self {
        let x = self.0;
        Neon(xor3!(rotr!(x, 7), rotr!(x, 18), vshrq_n_u32::<3>(x)))
    }

    #[inline(always)]
    unsafe fn small_sigma1(self) -> Self {
        let x = self.0;
        Neon(xor3!(rotr!(x, 17), rotr!(x, 19), vshrq_n_u32::<10>(x)))
    }
}

/// Eight groups of four lanes per batch
pub(crate) struct Neon4Way;

impl BatchHasher for Neon4Way {
    const BATCH: usize = 32;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        // NEON is part of the aarch64 baseline
        unsafe { lanes::fill_word7::<Neon>(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { lanes::lane_digest::<Neon>(pre, base, lane) }
    }
}
