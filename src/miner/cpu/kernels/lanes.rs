//! Lane-parallel SHA-256d engine shared by the SIMD kernels.
//!
//! Each lane hashes its own nonce. The engine starts from the working state
//! after the three nonce-free rounds of the tail block, uses the precomputed
//! nonce-free schedule words 16 and 17, and stops the second compression after
//! round 60 when only output word 7 is wanted.

use super::{Precomputed, H256, K, WORD7_ROUNDS};

/// The widest single vector any engine uses
const MAX_LANES: usize = 8;

/// A vector of 32-bit lanes.
///
/// Methods are unsafe because implementations use intrinsics that are only
/// valid once the matching CPU feature has been detected.
pub(crate) trait Lanes: Copy {
    const WIDTH: usize;

    unsafe fn splat(v: u32) -> Self;

    /// Load `WIDTH` words from `src`
    unsafe fn load(src: &[u32]) -> Self;

    /// Store `WIDTH` words to `dst`
    unsafe fn store(self, dst: &mut [u32]);

    unsafe fn add(self, rhs: Self) -> Self;

    unsafe fn ch(e: Self, f: Self, g: Self) -> Self;

    unsafe fn maj(a: Self, b: Self, c: Self) -> Self;

    /// rotr 2 ^ rotr 13 ^ rotr 22
    unsafe fn big_sigma0(self) -> Self;

    /// rotr 6 ^ rotr 11 ^ rotr 25
    unsafe fn big_sigma1(self) -> Self;

    /// rotr 7 ^ rotr 18 ^ shr 3
    unsafe fn small_sigma0(self) -> Self;

    /// rotr 17 ^ rotr 19 ^ shr 10
    unsafe fn small_sigma1(self) -> Self;
}

#[inline(always)]
unsafe fn splat8<V: Lanes>(words: &[u32; 8]) -> [V; 8] {
    let mut out = [V::splat(0); 8];
    for (v, &w) in out.iter_mut().zip(words.iter()) {
        *v = V::splat(w);
    }
    out
}

#[inline(always)]
unsafe fn round<V: Lanes>(s: &mut [V; 8], k: u32, w: V) {
    let [a, b, c, d, e, f, g, h] = *s;
    let t1 = h
        .add(e.big_sigma1())
        .add(V::ch(e, f, g))
        .add(V::splat(k).add(w));
    let t2 = a.big_sigma0().add(V::maj(a, b, c));
    *s = [t1.add(t2), a, b, c, d.add(t1), e, f, g];
}

/// Message schedule word `i`, in a 16 word ring buffer
#[inline(always)]
unsafe fn expand<V: Lanes>(w: &[V; 16], i: usize) -> V {
    w[(i - 16) & 15]
        .add(w[(i - 15) & 15].small_sigma0())
        .add(w[(i - 7) & 15])
        .add(w[(i - 2) & 15].small_sigma1())
}

/// First compression, from the precomputed state, giving the 8 word first hash
#[inline(always)]
unsafe fn first_hash<V: Lanes>(pre: &Precomputed, nonces: V) -> [V; 8] {
    let mut s = splat8::<V>(&pre.state3);
    let mut w = [V::splat(0); 16];
    for (v, &t) in w.iter_mut().zip(pre.tail.iter()) {
        *v = V::splat(t);
    }
    w[3] = nonces;

    for i in 3..16 {
        round(&mut s, K[i], w[i]);
    }

    w[0] = V::splat(pre.w16);
    round(&mut s, K[16], w[0]);
    w[1] = V::splat(pre.w17);
    round(&mut s, K[17], w[1]);

    for i in 18..64 {
        let x = expand(&w, i);
        w[i & 15] = x;
        round(&mut s, K[i], x);
    }

    let mut hash = s;
    for (h, &m) in hash.iter_mut().zip(pre.midstate.iter()) {
        *h = h.add(V::splat(m));
    }
    hash
}

/// Working state of the second compression after `rounds` rounds
#[inline(always)]
unsafe fn second_rounds<V: Lanes>(hash1: [V; 8], pad: &[u32; 8], rounds: usize) -> [V; 8] {
    let mut s = splat8::<V>(&H256);
    let mut w = [V::splat(0); 16];
    w[..8].copy_from_slice(&hash1);
    for (v, &p) in w[8..].iter_mut().zip(pad.iter()) {
        *v = V::splat(p);
    }

    for i in 0..16 {
        round(&mut s, K[i], w[i]);
    }

    for i in 16..rounds {
        let x = expand(&w, i);
        w[i & 15] = x;
        round(&mut s, K[i], x);
    }

    s
}

/// Final state word 7, skipping the last three rounds
#[inline(always)]
pub(crate) unsafe fn word7<V: Lanes>(pre: &Precomputed, nonces: V) -> V {
    let s = second_rounds(first_hash(pre, nonces), &pre.pad, WORD7_ROUNDS);
    s[4].add(V::splat(H256[7]))
}

/// The complete final state
#[inline(always)]
pub(crate) unsafe fn digest<V: Lanes>(pre: &Precomputed, nonces: V) -> [V; 8] {
    let mut s = second_rounds(first_hash(pre, nonces), &pre.pad, 64);
    for (v, &h) in s.iter_mut().zip(H256.iter()) {
        *v = v.add(V::splat(h));
    }
    s
}

/// Message words for nonces `base..base + WIDTH`
#[inline(always)]
unsafe fn nonce_lanes<V: Lanes>(base: u32) -> V {
    let mut words = [0u32; MAX_LANES];
    for (i, w) in words[..V::WIDTH].iter_mut().enumerate() {
        *w = base.wrapping_add(i as u32).swap_bytes();
    }
    V::load(&words)
}

/// Word 7 for `out.len()` consecutive nonces, one vector at a time
#[inline(always)]
pub(crate) unsafe fn fill_word7<V: Lanes>(pre: &Precomputed, base: u32, out: &mut [u32]) {
    for (group, chunk) in out.chunks_exact_mut(V::WIDTH).enumerate() {
        let nonces = nonce_lanes::<V>(base.wrapping_add((group * V::WIDTH) as u32));
        word7(pre, nonces).store(chunk);
    }
}

/// The final state for nonce `base + lane`
#[inline(always)]
pub(crate) unsafe fn lane_digest<V: Lanes>(pre: &Precomputed, base: u32, lane: usize) -> [u32; 8] {
    let group_base = base.wrapping_add((lane - lane % V::WIDTH) as u32);
    let state = digest(pre, nonce_lanes::<V>(group_base));

    let mut out = [0u32; 8];
    let mut words = [0u32; MAX_LANES];
    for (o, v) in out.iter_mut().zip(state.iter()) {
        v.store(&mut words);
        *o = words[lane % V::WIDTH];
    }
    out
}

/// Portable lanes for targets whose vector unit has no stable Rust intrinsics.
/// The compiler vectorizes the fixed-size loops where it can.
#[derive(Clone, Copy)]
pub(crate) struct Portable4([u32; 4]);

impl Portable4 {
    #[inline(always)]
    fn map(self, f: impl Fn(u32) -> u32) -> Self {
        let [a, b, c, d] = self.0;
        Portable4([f(a), f(b), f(c), f(d)])
    }

    #[inline(always)]
    fn zip(self, rhs: Self, f: impl Fn(u32, u32) -> u32) -> Self {
        let mut out = self.0;
        for (o, &r) in out.iter_mut().zip(rhs.0.iter()) {
            *o = f(*o, r);
        }
        Portable4(out)
    }
}

impl Lanes for Portable4 {
    const WIDTH: usize = 4;

    #[inline(always)]
    unsafe fn splat(v: u32) -> Self {
        Portable4([v; 4])
    }

    #[inline(always)]
    unsafe fn load(src: &[u32]) -> Self {
        Portable4([src[0], src[1], src[2], src[3]])
    }

    #[inline(always)]
    unsafe fn store(self, dst: &mut [u32]) {
        dst[..4].copy_from_slice(&self.0);
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        self.zip(rhs, u32::wrapping_add)
    }

    #[inline(always)]
    unsafe fn ch(e: Self, f: Self, g: Self) -> Self {
        let mut out = [0; 4];
        for i in 0..4 {
            out[i] = g.0[i] ^ (e.0[i] & (f.0[i] ^ g.0[i]));
        }
        Portable4(out)
    }

    #[inline(always)]
    unsafe fn maj(a: Self, b: Self, c: Self) -> Self {
        let mut out = [0; 4];
        for i in 0..4 {
            out[i] = (a.0[i] & b.0[i]) | (c.0[i] & (a.0[i] | b.0[i]));
        }
        Portable4(out)
    }

    #[inline(always)]
    unsafe fn big_sigma0(self) -> Self {
        self.map(super::big_sigma0)
    }

    #[inline(always)]
    unsafe fn big_sigma1(self) -> Self {
        self.map(super::big_sigma1)
    }

    #[inline(always)]
    unsafe fn small_sigma0(self) -> Self {
        self.map(super::small_sigma0)
    }

    #[inline(always)]
    unsafe fn small_sigma1(self) -> Self {
        self.map(super::small_sigma1)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::miner::cpu::kernels::{self, scalar};
    use crate::miner::fixtures::random_work;
    use crate::miner::types::Target;

    fn lanes_of<V: Lanes>(v: V) -> Vec<u32> {
        let mut out = [0u32; MAX_LANES];
        unsafe { v.store(&mut out) };
        out[..V::WIDTH].to_vec()
    }

    /// Check every primitive of a lane type against the scalar definitions,
    /// including the rotate constants.
    ///
    /// # Safety
    /// The lane type's CPU features must be available.
    pub(crate) unsafe fn check_primitives<V: Lanes>() {
        for _ in 0..64 {
            let (x, y, z): ([u32; 8], [u32; 8], [u32; 8]) =
                (rand::random(), rand::random(), rand::random());
            let (a, b, c) = (V::load(&x), V::load(&y), V::load(&z));

            for i in 0..V::WIDTH {
                let (x, y, z) = (x[i], y[i], z[i]);
                assert_eq!(lanes_of(a.add(b))[i], x.wrapping_add(y));
                assert_eq!(lanes_of(V::ch(a, b, c))[i], (x & y) ^ (!x & z));
                assert_eq!(lanes_of(V::maj(a, b, c))[i], (x & y) ^ (x & z) ^ (y & z));
                assert_eq!(lanes_of(a.big_sigma0())[i], kernels::big_sigma0(x));
                assert_eq!(lanes_of(a.big_sigma1())[i], kernels::big_sigma1(x));
                assert_eq!(lanes_of(a.small_sigma0())[i], kernels::small_sigma0(x));
                assert_eq!(lanes_of(a.small_sigma1())[i], kernels::small_sigma1(x));
            }
        }

        assert_eq!(lanes_of(V::splat(7)), vec![7; V::WIDTH]);
    }

    /// Check the skipped-round word 7 and the full digest of a lane type
    /// against the reference kernel.
    ///
    /// # Safety
    /// The lane type's CPU features must be available.
    pub(crate) unsafe fn check_engine<V: Lanes>() {
        let work = random_work(Target::MAX);
        let pre = Precomputed::new(&work);
        let base = rand::random::<u32>() | 0xffff_ff00;

        let mut word7 = vec![0u32; V::WIDTH * 2];
        fill_word7::<V>(&pre, base, &mut word7);

        for (lane, &w7) in word7.iter().enumerate() {
            let nonce = base.wrapping_add(lane as u32);
            let expected = scalar::double_hash(&pre.midstate, &pre.tail, &pre.pad, nonce);

            assert_eq!(w7, expected[7], "word 7 of lane {}", lane);
            assert_eq!(lane_digest::<V>(&pre, base, lane), expected, "digest of lane {}", lane);
        }
    }

    #[test]
    fn test_portable_lanes() {
        unsafe {
            check_primitives::<Portable4>();
            check_engine::<Portable4>();
        }
    }
}
