//! Portable single-lane kernel. Unlike the reference kernel it starts from
//! the precomputed partial state and skips the last rounds of the second
//! compression when rejecting.

use super::lanes::{self, Lanes};
use super::Precomputed;
use crate::miner::cpu::framework::{BatchHasher, Sha256d};

pub(crate) static CRYPTOPP: Sha256d<CryptoPp> = Sha256d(CryptoPp);

/// One 32-bit lane
#[derive(Clone, Copy)]
pub(crate) struct Word(u32);

impl Lanes for Word {
    const WIDTH: usize = 1;

    #[inline(always)]
    unsafe fn splat(v: u32) -> Self {
        Word(v)
    }

    #[inline(always)]
    unsafe fn load(src: &[u32]) -> Self {
        Word(src[0])
    }

    #[inline(always)]
    unsafe fn store(self, dst: &mut [u32]) {
        dst[0] = self.0;
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        Word(self.0.wrapping_add(rhs.0))
    }

    #[inline(always)]
    unsafe fn ch(e: Self, f: Self, g: Self) -> Self {
        Word(g.0 ^ (e.0 & (f.0 ^ g.0)))
    }

    #[inline(always)]
    unsafe fn maj(a: Self, b: Self, c: Self) -> Self {
        Word((a.0 & b.0) | (c.0 & (a.0 | b.0)))
    }

    #[inline(always)]
    unsafe fn big_sigma0(self) -> Self {
        Word(super::big_sigma0(self.0))
    }

    #[inline(always)]
    unsafe fn big_sigma1(self) -> Self {
        Word(super::big_sigma1(self.0))
    }

    #[inline(always)]
    unsafe fn small_sigma0(self) -> Self {
        Word(super::small_sigma0(self.0))
    }

    #[inline(always)]
    unsafe fn small_sigma1(self) -> Self {
        Word(super::small_sigma1(self.0))
    }
}

pub(crate) struct CryptoPp;

impl BatchHasher for CryptoPp {
    const BATCH: usize = 1;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        // plain integer arithmetic, valid on every CPU
        unsafe { lanes::fill_word7::<Word>(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { lanes::lane_digest::<Word>(pre, base, lane) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::kernels::lanes::tests::{check_engine, check_primitives};

    #[test]
    fn test_single_lane() {
        unsafe {
            check_primitives::<Word>();
            check_engine::<Word>();
        }
    }
}
