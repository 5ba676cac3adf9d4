//! VIA PadLock Hash Engine kernel.
//!
//! `rep xsha256` hashes a whole message, padding included, in one instruction.
//! The header is hashed directly and the 32 byte result hashed again, so this
//! kernel uses neither the midstate nor the precomputed schedule.

use super::{Precomputed, H256};
use crate::miner::cpu::framework::{BatchHasher, Sha256d};
use std::arch::asm;
use std::arch::x86_64::__cpuid;

/// Only handed out once the hash engine has been detected
pub(crate) static VIA: Sha256d<Via> = Sha256d(Via(()));

pub(crate) struct Via(());

impl BatchHasher for Via {
    const BATCH: usize = 1;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        out[0] = self.digest(pre, base, 0)[7];
    }

    fn digest(&self, pre: &Precomputed, base: u32, _lane: usize) -> [u32; 8] {
        let mut header = pre.header;
        header[76..].copy_from_slice(&base.to_le_bytes());

        let hash1 = unsafe { xsha256(&header) };
        let mut bytes = [0u8; 32];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(hash1.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }

        unsafe { xsha256(&bytes) }
    }
}

/// The engine reads and writes a 128 byte, 16 byte aligned context whose
/// first eight words are the hash state.
#[repr(C, align(16))]
struct PadlockContext([u32; 32]);

unsafe fn xsha256(message: &[u8]) -> [u32; 8] {
    let mut ctx = PadlockContext([0; 32]);
    ctx.0[..8].copy_from_slice(&H256);

    // rep xsha256
    asm!(
        ".byte 0xf3, 0x0f, 0xa6, 0xd0",
        inout("rsi") message.as_ptr() => _,
        inout("rcx") message.len() => _,
        inout("rax") 0usize => _,
        inout("rdi") ctx.0.as_mut_ptr() => _,
        options(nostack),
    );

    let mut state = [0u32; 8];
    state.copy_from_slice(&ctx.0[..8]);
    state
}

/// Whether this is a VIA or Zhaoxin CPU with the hash engine present and enabled
pub(crate) fn detect() -> bool {
    const PHE_PRESENT_AND_ENABLED: u32 = 0b11 << 10;

    let vendor = __cpuid(0);
    let vendor = (vendor.ebx, vendor.edx, vendor.ecx);
    let centaur = (
        u32::from_le_bytes(*b"Cent"),
        u32::from_le_bytes(*b"aurH"),
        u32::from_le_bytes(*b"auls"),
    );
    let zhaoxin = (
        u32::from_le_bytes(*b"  Sh"),
        u32::from_le_bytes(*b"angh"),
        u32::from_le_bytes(*b"ai  "),
    );

    if vendor != centaur && vendor != zhaoxin {
        return false;
    }

    let max_leaf = __cpuid(0xc000_0000).eax;
    if max_leaf < 0xc000_0001 {
        return false;
    }

    let features = __cpuid(0xc000_0001).edx;
    features & PHE_PRESENT_AND_ENABLED == PHE_PRESENT_AND_ENABLED
}
