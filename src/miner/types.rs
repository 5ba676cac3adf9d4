use crate::miner::cpu::kernels::{self, scrypt};
use crate::prelude::*;
use ring::digest::{digest, SHA256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An error caused by malformed work input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("midstate does not match the header")]
    MidstateMismatch,
}

/// Read big-endian message words from a byte slice
fn read_be_words(bytes: &[u8], words: &mut [u32]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Hex-encode a 256-bit little-endian value most significant byte first, the
/// way block explorers print hashes.
pub(crate) fn display_hex(bytes: &[u8; 32]) -> String {
    let mut reversed = *bytes;
    reversed.reverse();
    hex::encode(reversed)
}

/// Double SHA-256 computed with ring, independent of every mining kernel
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = digest(&SHA256, data);
    let second = digest(&SHA256, first.as_ref());
    let mut out = [0u8; 32];
    out.copy_from_slice(second.as_ref());
    out
}

/// An 80 byte block header whose last four bytes hold the nonce, little-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHeader([u8; BlockHeader::LENGTH]);

impl BlockHeader {
    /// The length of a block header, in bytes
    pub const LENGTH: usize = 80;

    /// Byte offset of the nonce field
    pub const NONCE_OFFSET: usize = 76;

    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    pub fn nonce(&self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.0[Self::NONCE_OFFSET..]);
        u32::from_le_bytes(bytes)
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.0[Self::NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.set_nonce(nonce);
        self
    }

    /// Hash state after absorbing the first 64 bytes, which hold no nonce bits
    pub fn midstate(&self) -> [u32; 8] {
        let mut block = [0u32; 16];
        read_be_words(&self.0[..64], &mut block);

        let mut state = kernels::H256;
        kernels::compress(&mut state, &block);
        state
    }

    /// The second, padded message block. Word 3 is the byte-swapped nonce.
    pub(crate) fn tail_block(&self) -> [u32; 16] {
        let mut block = [0u32; 16];
        read_be_words(&self.0[64..], &mut block[..4]);
        block[4] = 0x8000_0000;
        block[15] = (Self::LENGTH * 8) as u32;
        block
    }
}

impl TryFrom<&[u8]> for BlockHeader {
    type Error = WorkError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; Self::LENGTH] = value.try_into().map_err(|_| WorkError::InvalidLength {
            expected: Self::LENGTH,
            actual: value.len(),
        })?;

        Ok(Self(bytes))
    }
}

impl FromStr for BlockHeader {
    type Err = WorkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(hex::decode(s)?.as_slice())
    }
}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..]))
    }
}

impl Debug for BlockHeader {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "BlockHeader({})", self)
    }
}

/// A 256-bit acceptance threshold, stored as a little-endian integer.
///
/// A hash is accepted when, read as a little-endian integer, it is less than or
/// equal to the target.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target([u8; 32]);

impl Target {
    /// A target accepting every hash
    pub const MAX: Target = Target([0xff; 32]);

    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_le_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Expand a compact "bits" encoding: a one byte base-256 exponent followed
    /// by a 23-bit mantissa. The sign bit is ignored.
    pub fn from_compact(bits: u32) -> Self {
        let exponent = (bits >> 24) as usize;
        let mantissa = bits & 0x007f_ffff;
        let mut bytes = [0u8; 32];

        if exponent <= 3 {
            let value = mantissa >> (8 * (3 - exponent));
            bytes[..4].copy_from_slice(&value.to_le_bytes());
        } else {
            for (i, &b) in mantissa.to_le_bytes()[..3].iter().enumerate() {
                if let Some(slot) = bytes.get_mut(exponent - 3 + i) {
                    *slot = b;
                }
            }
        }

        Self(bytes)
    }

    /// The most significant 32-bit word, used by the kernels' fast reject.
    pub fn word7(&self) -> u32 {
        u32::from_le_bytes([self.0[28], self.0[29], self.0[30], self.0[31]])
    }

    pub fn accepts(&self, hash: &[u8; 32]) -> bool {
        for (h, t) in hash.iter().rev().zip(self.0.iter().rev()) {
            if h != t {
                return h < t;
            }
        }

        true
    }
}

impl FromStr for Target {
    type Err = WorkError;

    /// Parse a big-endian hex string, as printed by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s)?;
        let mut bytes: [u8; 32] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| WorkError::InvalidLength {
                    expected: 32,
                    actual: decoded.len(),
                })?;
        bytes.reverse();

        Ok(Self(bytes))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&display_hex(&self.0))
    }
}

impl Debug for Target {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Target({})", self)
    }
}

/// The proof-of-work function a work item is hashed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowAlgorithm {
    Sha256d,
    Scrypt,
}

impl Default for PowAlgorithm {
    fn default() -> Self {
        PowAlgorithm::Sha256d
    }
}

/// An accepted nonce and its hash, as handed to the work dispatcher
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub nonce: u32,
    pub hash: [u8; 32],
}

impl Display for Share {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "nonce {:08x} hash {}", self.nonce, display_hex(&self.hash))
    }
}

impl Debug for Share {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Share({})", self)
    }
}

/// A shared "abandon this work" signal. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A unit of work: a header template and everything derived from it once,
/// before any nonce is tried.
#[derive(Debug, Clone)]
pub struct WorkItem {
    header: BlockHeader,
    midstate: [u32; 8],
    pad: [u32; 8],
    target: Target,
    pow: PowAlgorithm,
    cancel: CancelFlag,
    hash: [u8; 32],
    next_nonce: u64,
}

impl WorkItem {
    /// Create a work item, computing the midstate from the header. Scanning
    /// starts at the header's current nonce.
    pub fn new(header: BlockHeader, target: Target) -> Self {
        Self {
            midstate: header.midstate(),
            pad: kernels::SECOND_BLOCK_PAD,
            target,
            pow: PowAlgorithm::Sha256d,
            cancel: CancelFlag::new(),
            hash: [0; 32],
            next_nonce: u64::from(header.nonce()),
            header,
        }
    }

    /// Create a work item from a midstate computed upstream, checking that it
    /// belongs to the header.
    pub fn from_parts(
        header: BlockHeader,
        midstate: [u32; 8],
        target: Target,
    ) -> Result<Self, WorkError> {
        if header.midstate() != midstate {
            return Err(WorkError::MidstateMismatch);
        }

        Ok(Self::new(header, target))
    }

    pub fn with_pow(mut self, pow: PowAlgorithm) -> Self {
        self.pow = pow;
        self
    }

    /// Replace the cancel flag, e.g. to share one flag between worker copies
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn midstate(&self) -> &[u32; 8] {
        &self.midstate
    }

    pub fn pad(&self) -> &[u32; 8] {
        &self.pad
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn pow(&self) -> PowAlgorithm {
        self.pow
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The most recently computed candidate hash
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// The nonce the next scan starts from. Goes past `u32::MAX` once the
    /// whole nonce space has been scanned.
    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    pub fn set_next_nonce(&mut self, nonce: u64) {
        self.next_nonce = nonce;
    }

    pub(crate) fn set_nonce(&mut self, nonce: u32) {
        self.header.set_nonce(nonce);
    }

    /// Store a candidate nonce and its hash
    pub(crate) fn record(&mut self, nonce: u32, hash: [u8; 32]) {
        self.header.set_nonce(nonce);
        self.hash = hash;
    }

    /// Hash the header at `nonce` without any mining kernel
    pub fn pow_hash(&self, nonce: u32) -> [u8; 32] {
        let header = self.header.with_nonce(nonce);
        match self.pow {
            PowAlgorithm::Sha256d => double_sha256(header.as_bytes()),
            PowAlgorithm::Scrypt => scrypt::pow_hash(header.as_bytes()),
        }
    }

    /// Re-derive a share's hash and check it against the target
    pub fn check_share(&self, share: &Share) -> bool {
        self.pow_hash(share.nonce) == share.hash && self.target.accepts(&share.hash)
    }
}
