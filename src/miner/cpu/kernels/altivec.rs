use super::lanes::{self, Portable4};
use super::Precomputed;
use crate::miner::cpu::framework::{BatchHasher, Sha256d};

/// Only registered on PowerPC targets built with AltiVec
pub(crate) static ALTIVEC_4WAY: Sha256d<Altivec4Way> = Sha256d(Altivec4Way);

/// Eight groups of four lanes per batch, written as portable lane code that
/// the AltiVec backend vectorizes
pub(crate) struct Altivec4Way;

impl BatchHasher for Altivec4Way {
    const BATCH: usize = 32;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        // portable lanes have no feature requirements
        unsafe { lanes::fill_word7::<Portable4>(pre, base, out) }
    }

    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
        unsafe { lanes::lane_digest::<Portable4>(pre, base, lane) }
    }
}
