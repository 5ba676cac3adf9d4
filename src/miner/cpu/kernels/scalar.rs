use super::{compress, state_to_bytes, Precomputed, H256};
use crate::miner::cpu::framework::BatchHasher;
use crate::miner::types::WorkItem;

/// Portable kernel with no hardware-specific optimizations. Computes every
/// round of both compressions and never uses the precomputed partial state,
/// so it doubles as the reference the other kernels are checked against.
pub struct Scalar;

impl BatchHasher for Scalar {
    const BATCH: usize = 1;

    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]) {
        out[0] = self.digest(pre, base, 0)[7];
    }

    fn digest(&self, pre: &Precomputed, base: u32, _lane: usize) -> [u32; 8] {
        double_hash(&pre.midstate, &pre.tail, &pre.pad, base)
    }
}

/// Final hash state of the double hash for one nonce
pub(crate) fn double_hash(
    midstate: &[u32; 8],
    tail: &[u32; 16],
    pad: &[u32; 8],
    nonce: u32,
) -> [u32; 8] {
    let mut block = *tail;
    block[3] = nonce.swap_bytes();
    let mut hash1 = *midstate;
    compress(&mut hash1, &block);

    let mut block = [0u32; 16];
    block[..8].copy_from_slice(&hash1);
    block[8..].copy_from_slice(pad);
    let mut state = H256;
    compress(&mut state, &block);
    state
}

/// Reference digest bytes for `work` at `nonce`
pub(crate) fn reference_hash(work: &WorkItem, nonce: u32) -> [u8; 32] {
    let tail = work.header().tail_block();
    state_to_bytes(&double_hash(work.midstate(), &tail, work.pad(), nonce))
}
