//! A pluggable double SHA-256 proof-of-work hashing engine.
//!
//! Several kernel implementations compute the same function over a block
//! header's nonce space. The fastest one for the running CPU is picked once per
//! process by benchmarking each candidate in a crash-isolated child process, and
//! then driven by a cancellable [`ScanLoop`](miner::cpu::framework::ScanLoop).

pub mod miner;
mod prelude;

pub use miner::cpu::framework::{Kernel, KernelRun, ScanLoop, ScanReport, ScanState};
pub use miner::cpu::{AlgorithmId, Registry};
pub use miner::interface::{ShareSink, StopMining};
pub use miner::selector::{AlgorithmChoice, Selector};
pub use miner::types::{BlockHeader, CancelFlag, PowAlgorithm, Share, Target, WorkItem};
pub use miner::{ConfigError, MinerConfig, RuntimeUnavailable};
