//! CPU miner core framework

use super::kernels::{self, Precomputed, MAX_BATCH};
use super::AlgorithmId;
use crate::miner::interface::{ShareSink, StopMining};
use crate::miner::selector::Selector;
use crate::miner::types::{PowAlgorithm, Share, WorkItem};
use crate::miner::MinerConfig;
use crate::prelude::*;

/// The result of one kernel call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRun {
    /// Whether `last_nonce` satisfies the target
    pub found: bool,

    /// The accepting nonce if one was found, otherwise the last nonce hashed
    pub last_nonce: u32,
}

/// A CPU mining kernel.
pub trait Kernel: Sync {
    /// Nonces hashed per batch. Cancellation is observed between batches, so
    /// this also bounds the work wasted after a cancel.
    fn lanes(&self) -> usize;

    /// The proof-of-work function this kernel computes
    fn pow(&self) -> PowAlgorithm;

    /// Hash nonces `start..=max` until one satisfies the target, the range is
    /// exhausted, or the work is cancelled. Requires `start <= max`.
    ///
    /// Leaves the header's nonce field at the last nonce hashed, and on success
    /// leaves the accepting hash in the work item.
    fn run(&self, work: &mut WorkItem, start: u32, max: u32) -> KernelRun;
}

/// Computes the double hash for a batch of consecutive nonces
pub(crate) trait BatchHasher: Sync {
    /// Nonces per batch, at most `MAX_BATCH`
    const BATCH: usize;

    /// Write final state word 7 for nonces `base..base + BATCH` to `out`.
    fn word7(&self, pre: &Precomputed, base: u32, out: &mut [u32]);

    /// The full final state for nonce `base + lane`
    fn digest(&self, pre: &Precomputed, base: u32, lane: usize) -> [u32; 8];
}

/// Drives a `BatchHasher` over a nonce range as a SHA-256d kernel
pub(crate) struct Sha256d<H>(pub(crate) H);

impl<H: BatchHasher> Kernel for Sha256d<H> {
    fn lanes(&self) -> usize {
        H::BATCH
    }

    fn pow(&self) -> PowAlgorithm {
        PowAlgorithm::Sha256d
    }

    fn run(&self, work: &mut WorkItem, start: u32, max: u32) -> KernelRun {
        debug_assert!(start <= max, "empty nonce range {}..={}", start, max);

        let pre = Precomputed::new(work);
        let target7 = work.target().word7();
        let mut word7 = [0u32; MAX_BATCH];
        let word7 = &mut word7[..H::BATCH];
        let mut base = start;

        loop {
            self.0.word7(&pre, base, word7);

            // lanes past `max` are hashed but ignored
            let lanes = (u64::from(max - base) + 1).min(H::BATCH as u64) as usize;

            for (lane, &h7) in word7[..lanes].iter().enumerate() {
                if !kernels::passes_fast_reject(h7, target7) {
                    continue;
                }

                let nonce = base + lane as u32;
                let hash = kernels::state_to_bytes(&self.0.digest(&pre, base, lane));
                work.record(nonce, hash);

                if work.target().accepts(&hash) {
                    return KernelRun {
                        found: true,
                        last_nonce: nonce,
                    };
                }
            }

            let last = base + (lanes as u32 - 1);
            work.set_nonce(last);

            if last == max || work.is_cancelled() {
                return KernelRun {
                    found: false,
                    last_nonce: last,
                };
            }

            base = last + 1;
        }
    }
}

/// States of the scan loop. Every scan call ends `Exhausted` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Searching,
    Found,
    Exhausted,
    Cancelled,
}

/// Summary of one scan call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Nonces processed. Zero means no progress was made.
    pub processed: u64,
    pub state: ScanState,
    /// Shares submitted to the sink
    pub shares: usize,
}

impl ScanReport {
    fn idle(state: ScanState) -> Self {
        Self {
            processed: 0,
            state,
            shares: 0,
        }
    }
}

/// Per-thread scan entry point, bound to one selected kernel
#[derive(Clone)]
pub struct ScanLoop {
    algorithm: Option<AlgorithmId>,
    kernel: Option<&'static dyn Kernel>,
}

impl ScanLoop {
    pub fn new(algorithm: AlgorithmId) -> Self {
        let kernel = algorithm.kernel();
        if kernel.is_none() {
            warn!("Algorithm {} is not available on this CPU", algorithm);
        }

        Self {
            algorithm: Some(algorithm),
            kernel,
        }
    }

    /// A scan loop with no kernel. Every scan returns without progress.
    pub fn unavailable() -> Self {
        Self {
            algorithm: None,
            kernel: None,
        }
    }

    /// Resolve the configured algorithm, benchmarking candidates the first
    /// time this is called in the process.
    pub fn from_config(config: &MinerConfig) -> Self {
        match Selector::global().resolve(config.algo, &config.harness()) {
            Ok(algorithm) => Self::new(algorithm),
            Err(e) => {
                error!("{}", e);
                Self::unavailable()
            }
        }
    }

    pub fn algorithm(&self) -> Option<AlgorithmId> {
        self.algorithm
    }

    fn kernel_for(&self, work: &WorkItem) -> Option<&'static dyn Kernel> {
        match work.pow() {
            PowAlgorithm::Scrypt => AlgorithmId::Scrypt.kernel(),
            pow => self.kernel.filter(|k| k.pow() == pow),
        }
    }

    /// Scan from `work.next_nonce()` up to the exclusive `ceiling`, submitting
    /// every accepted nonce to `sink`.
    pub fn scan(&self, work: &mut WorkItem, ceiling: u64, sink: &mut dyn ShareSink) -> ScanReport {
        let kernel = match self.kernel_for(work) {
            Some(kernel) => kernel,
            None => {
                error!(
                    "No {:?} kernel is available (selected: {:?}), skipping scan",
                    work.pow(),
                    self.algorithm
                );
                return ScanReport::idle(ScanState::Exhausted);
            }
        };

        let first = work.next_nonce();
        let ceiling = ceiling.min(1 << 32);
        if first >= ceiling {
            return ScanReport::idle(ScanState::Exhausted);
        }

        let (first, max) = (first as u32, (ceiling - 1) as u32);
        let mut nonce = first;
        let mut last = first;
        let mut shares = 0;
        let mut found_any = false;
        let mut state = ScanState::Searching;

        while let ScanState::Searching | ScanState::Found = state {
            state = match state {
                ScanState::Searching => {
                    let run = kernel.run(work, nonce, max);
                    last = run.last_nonce;

                    if run.found {
                        ScanState::Found
                    } else if work.is_cancelled() {
                        ScanState::Cancelled
                    } else {
                        ScanState::Exhausted
                    }
                }

                ScanState::Found => {
                    found_any = true;
                    let share = Share {
                        nonce: last,
                        hash: *work.hash(),
                    };

                    let submitted = if work.check_share(&share) {
                        debug!("Found {}", share);
                        sink.submit(share).map(|()| 1)
                    } else {
                        warn!("Kernel produced an invalid share ({}), discarding", share);
                        Ok(0)
                    };

                    match submitted {
                        Err(StopMining) => ScanState::Cancelled,
                        Ok(n) => {
                            shares += n;

                            if last == max {
                                ScanState::Exhausted
                            } else if work.is_cancelled() {
                                ScanState::Cancelled
                            } else {
                                nonce = last + 1;
                                ScanState::Searching
                            }
                        }
                    }
                }

                done => done,
            };
        }

        work.set_next_nonce(u64::from(last) + 1);

        let processed = if !found_any && last == first {
            0
        } else {
            u64::from(last - first) + 1
        };

        ScanReport {
            processed,
            state,
            shares,
        }
    }
}
