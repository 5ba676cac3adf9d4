//! Shared test inputs

use crate::miner::types::{BlockHeader, Target, WorkItem};
use rand::Rng;
use std::str::FromStr;

/// The bitcoin genesis block header, solved at `GENESIS_NONCE`
pub const GENESIS_HEADER: &str = "01000000000000000000000000000000000000000000000000000000000000000000\
    00003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

pub const GENESIS_NONCE: u32 = 2_083_236_893;

/// The genesis block hash as printed by block explorers
pub const GENESIS_HASH: &str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";

pub fn genesis_header() -> BlockHeader {
    BlockHeader::from_str(GENESIS_HEADER).unwrap()
}

/// The genesis hash in little-endian byte order, as kernels produce it
pub fn genesis_hash() -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hex::decode(GENESIS_HASH).unwrap());
    hash.reverse();
    hash
}

/// Genesis work at difficulty 1, which only the genesis nonce satisfies nearby
pub fn genesis_work() -> WorkItem {
    WorkItem::new(genesis_header(), Target::from_compact(0x1d00_ffff))
}

pub fn random_work(target: Target) -> WorkItem {
    let mut bytes = [0u8; BlockHeader::LENGTH];
    rand::thread_rng().fill(&mut bytes[..]);
    WorkItem::new(BlockHeader::from_bytes(bytes), target)
}
