//! scrypt(N = 1024, r = 1, p = 1) proof of work, with the 80 byte header as
//! both password and salt.

use crate::miner::cpu::framework::{Kernel, KernelRun};
use crate::miner::types::{PowAlgorithm, WorkItem};
use ring::pbkdf2;
use std::num::NonZeroU32;

/// CPU/memory cost parameter
const N: usize = 1024;

/// Words in one r = 1 block
const BLOCK_WORDS: usize = 32;

pub(crate) struct Scrypt;

impl Kernel for Scrypt {
    fn lanes(&self) -> usize {
        1
    }

    fn pow(&self) -> PowAlgorithm {
        PowAlgorithm::Scrypt
    }

    fn run(&self, work: &mut WorkItem, start: u32, max: u32) -> KernelRun {
        debug_assert!(start <= max);

        let mut scratch = vec![0u32; N * BLOCK_WORDS];
        let mut header = *work.header().as_bytes();
        let mut nonce = start;

        loop {
            header[76..].copy_from_slice(&nonce.to_le_bytes());
            let mut hash = [0u8; 32];
            scrypt_r1(&header, &header, N, &mut scratch, &mut hash);
            work.record(nonce, hash);

            if work.target().accepts(&hash) {
                return KernelRun {
                    found: true,
                    last_nonce: nonce,
                };
            }

            if nonce == max || work.is_cancelled() {
                return KernelRun {
                    found: false,
                    last_nonce: nonce,
                };
            }

            nonce += 1;
        }
    }
}

/// The scrypt proof-of-work hash of a header
pub(crate) fn pow_hash(header: &[u8; 80]) -> [u8; 32] {
    let mut scratch = vec![0u32; N * BLOCK_WORDS];
    let mut hash = [0u8; 32];
    scrypt_r1(header, header, N, &mut scratch, &mut hash);
    hash
}

/// scrypt with r = 1 and p = 1. `n` must be a power of two and `scratch` must
/// hold at least `n` blocks.
fn scrypt_r1(password: &[u8], salt: &[u8], n: usize, scratch: &mut [u32], out: &mut [u8]) {
    let mut bytes = [0u8; 4 * BLOCK_WORDS];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::MIN,
        salt,
        password,
        &mut bytes,
    );

    let mut x = [0u32; BLOCK_WORDS];
    for (w, c) in x.iter_mut().zip(bytes.chunks_exact(4)) {
        *w = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
    }

    romix(&mut x, n, scratch);

    for (c, w) in bytes.chunks_exact_mut(4).zip(x.iter()) {
        c.copy_from_slice(&w.to_le_bytes());
    }

    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::MIN,
        &bytes,
        password,
        out,
    );
}

fn romix(x: &mut [u32; BLOCK_WORDS], n: usize, v: &mut [u32]) {
    let mut lo = [0u32; 16];
    let mut hi = [0u32; 16];
    lo.copy_from_slice(&x[..16]);
    hi.copy_from_slice(&x[16..]);

    for block in v[..n * BLOCK_WORDS].chunks_exact_mut(BLOCK_WORDS) {
        block[..16].copy_from_slice(&lo);
        block[16..].copy_from_slice(&hi);
        block_mix(&mut lo, &mut hi);
    }

    for _ in 0..n {
        let j = (hi[0] as usize & (n - 1)) * BLOCK_WORDS;
        let block = &v[j..j + BLOCK_WORDS];
        for (a, b) in lo.iter_mut().zip(&block[..16]) {
            *a ^= b;
        }
        for (a, b) in hi.iter_mut().zip(&block[16..]) {
            *a ^= b;
        }
        block_mix(&mut lo, &mut hi);
    }

    x[..16].copy_from_slice(&lo);
    x[16..].copy_from_slice(&hi);
}

#[inline]
fn block_mix(lo: &mut [u32; 16], hi: &mut [u32; 16]) {
    xor_salsa8(lo, hi);
    xor_salsa8(hi, lo);
}

/// `b = salsa20/8(b ^ bx)`
fn xor_salsa8(b: &mut [u32; 16], bx: &[u32; 16]) {
    for (b, x) in b.iter_mut().zip(bx.iter()) {
        *b ^= x;
    }

    let mut x = *b;
    macro_rules! quarter {
        ($a:expr, $b:expr, $c:expr, $d:expr) => {
            x[$b] ^= x[$a].wrapping_add(x[$d]).rotate_left(7);
            x[$c] ^= x[$b].wrapping_add(x[$a]).rotate_left(9);
            x[$d] ^= x[$c].wrapping_add(x[$b]).rotate_left(13);
            x[$a] ^= x[$d].wrapping_add(x[$c]).rotate_left(18);
        };
    }

    for _ in 0..4 {
        // columns
        quarter!(0, 4, 8, 12);
        quarter!(5, 9, 13, 1);
        quarter!(10, 14, 2, 6);
        quarter!(15, 3, 7, 11);

        // rows
        quarter!(0, 1, 2, 3);
        quarter!(5, 6, 7, 4);
        quarter!(10, 11, 8, 9);
        quarter!(15, 12, 13, 14);
    }

    for (b, x) in b.iter_mut().zip(x.iter()) {
        *b = b.wrapping_add(*x);
    }
}
