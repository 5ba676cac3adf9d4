pub mod cpu;
pub mod interface;
pub mod selector;
pub mod types;

#[cfg(test)]
mod fixtures;

use crate::miner::cpu::bench::{BenchConfig, BenchmarkHarness};
use crate::miner::selector::AlgorithmChoice;
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
pub struct MinerConfig {
    /// Hashing algorithm. "fastauto" and "auto" benchmark every available
    /// kernel with a quick or thorough run and use the fastest; any other
    /// value names a kernel listed by the info command.
    #[structopt(short, long, default_value = "fastauto")]
    pub algo: AlgorithmChoice,

    /// Number of CPU mining threads, defaults to one per logical CPU
    #[structopt(short = "t", long)]
    pub cpu_threads: Option<usize>,

    #[structopt(flatten)]
    pub bench: BenchConfig,
}

impl MinerConfig {
    pub fn harness(&self) -> BenchmarkHarness {
        BenchmarkHarness::new(&self.bench)
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            algo: AlgorithmChoice::default(),
            cpu_threads: None,
            bench: BenchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// No kernel could be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("No hashing kernel is usable on this CPU")]
pub struct RuntimeUnavailable;
