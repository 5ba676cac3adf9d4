pub mod bench;
pub mod framework;
pub(crate) mod kernels;
mod thread_priority;

use self::framework::{Kernel, ScanLoop, ScanState};
use crate::miner::interface::MinerInterface;
use crate::miner::types::{Share, WorkItem};
use crate::miner::{ConfigError, MinerConfig};
use crate::prelude::*;
use crossbeam::channel::RecvTimeoutError;
use enumset::{EnumSet, EnumSetType};
use itertools::Itertools;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A CPU hashing kernel. Declaration order is the order kernels are
/// benchmarked in, and the earlier of two equally fast kernels wins.
#[derive(Debug, EnumSetType, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "&str", into = "String")]
pub enum AlgorithmId {
    /// Portable reference kernel with no hardware-specific optimizations
    C,

    /// Four lanes of SSE2, four groups per batch
    FourWay,

    /// VIA PadLock hash engine
    Via,

    /// Portable single-lane kernel using the precomputed partial state
    CryptoPp,

    /// Four lanes of SSE2
    Sse2,

    /// Four lanes of SSE2, compiled with SSE4.1 enabled
    Sse4,

    /// Eight lanes of AVX2
    Avx2,

    /// x86 SHA extensions
    ShaNi,

    /// Four lanes of NEON, eight groups per batch
    Neon,

    /// Four lanes of AltiVec, eight groups per batch
    Altivec,

    /// scrypt proof of work. Never picked by benchmarking.
    Scrypt,
}

impl AlgorithmId {
    pub fn name(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::FourWay => "4way",
            Self::Via => "via",
            Self::CryptoPp => "cryptopp",
            Self::Sse2 => "sse2_64",
            Self::Sse4 => "sse4_64",
            Self::Avx2 => "avx2_8way",
            Self::ShaNi => "shani",
            Self::Neon => "neon_4way",
            Self::Altivec => "altivec_4way",
            Self::Scrypt => "scrypt",
        }
    }

    pub fn is_sha256d(self) -> bool {
        self != Self::Scrypt
    }

    /// Kernels built on raw intrinsics or inline assembly, which are
    /// benchmarked in a child process in case the CPU misreports a feature.
    pub fn needs_isolation(self) -> bool {
        !matches!(self, Self::C | Self::CryptoPp | Self::Altivec | Self::Scrypt)
    }

    /// The kernel implementing this algorithm, if this build targets an
    /// architecture that has it and this CPU supports it.
    pub fn kernel(self) -> Option<&'static dyn Kernel> {
        match self {
            Self::C => Some(&kernels::C),
            Self::CryptoPp => Some(&kernels::cryptopp::CRYPTOPP),
            Self::Scrypt => Some(&kernels::SCRYPT),

            #[cfg(target_arch = "x86_64")]
            Self::FourWay => Some(&kernels::sse2::SSE2_4WAY),
            #[cfg(target_arch = "x86_64")]
            Self::Sse2 => Some(&kernels::sse2::SSE2_64),
            #[cfg(target_arch = "x86_64")]
            Self::Sse4 if is_x86_feature_detected!("sse4.1") => Some(&kernels::sse2::SSE4_64),
            #[cfg(target_arch = "x86_64")]
            Self::Avx2 if is_x86_feature_detected!("avx2") => Some(&kernels::avx2::AVX2_8WAY),
            #[cfg(target_arch = "x86_64")]
            Self::ShaNi
                if is_x86_feature_detected!("sha")
                    && is_x86_feature_detected!("sse4.1")
                    && is_x86_feature_detected!("ssse3") =>
            {
                Some(&kernels::sha::SHANI)
            }
            #[cfg(target_arch = "x86_64")]
            Self::Via if kernels::via::detect() => Some(&kernels::via::VIA),

            #[cfg(target_arch = "aarch64")]
            Self::Neon => Some(&kernels::neon::NEON_4WAY),

            #[cfg(all(
                any(target_arch = "powerpc", target_arch = "powerpc64"),
                target_feature = "altivec"
            ))]
            Self::Altivec => Some(&kernels::altivec::ALTIVEC_4WAY),

            _ => None,
        }
    }
}

impl FromStr for AlgorithmId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnumSet::<AlgorithmId>::all()
            .iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| ConfigError::UnknownAlgorithm(s.to_string()))
    }
}

impl TryFrom<&str> for AlgorithmId {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for AlgorithmId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<AlgorithmId> for String {
    fn from(id: AlgorithmId) -> Self {
        id.name().to_string()
    }
}

/// A registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub id: AlgorithmId,
    pub available: bool,
}

impl Descriptor {
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn kernel(&self) -> Option<&'static dyn Kernel> {
        if self.available {
            self.id.kernel()
        } else {
            None
        }
    }
}

/// Every known algorithm, with availability probed from the running CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registry {
    available: EnumSet<AlgorithmId>,
}

impl Registry {
    pub fn detect() -> Self {
        let available = EnumSet::all()
            .iter()
            .filter(|id: &AlgorithmId| id.kernel().is_some())
            .collect();

        Self { available }
    }

    pub fn available(&self) -> EnumSet<AlgorithmId> {
        self.available
    }

    pub fn describe(&self, id: AlgorithmId) -> Descriptor {
        Descriptor {
            id,
            available: self.available.contains(id),
        }
    }

    /// Every algorithm in declaration order, available or not
    pub fn list(&self) -> Vec<Descriptor> {
        EnumSet::<AlgorithmId>::all()
            .iter()
            .map(|id| self.describe(id))
            .collect()
    }

    /// Look up an algorithm by exact name
    pub fn lookup(&self, name: &str) -> Option<Descriptor> {
        name.parse().ok().map(|id| self.describe(id))
    }

    /// Available SHA-256d algorithms, in declaration order
    pub fn benchmark_candidates(&self) -> impl Iterator<Item = AlgorithmId> {
        self.available.into_iter().filter(|id| id.is_sha256d())
    }
}

#[derive(Debug)]
pub struct CpuInfo {
    threads: usize,
    registry: Registry,
}

impl Display for CpuInfo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let available = self.registry.available();

        write!(
            f,
            "CPU:\n\
            \tThreads: {threads}\n\
            \tSupported kernels: {supported}\n\
            \tUnsupported kernels: {unsupported}",
            threads = self.threads,
            supported = available.iter().join(", "),
            unsupported = (!available).iter().join(", "),
        )
    }
}

pub fn get_cpu_info() -> CpuInfo {
    CpuInfo {
        threads: num_cpus::get(),
        registry: Registry::detect(),
    }
}

/// Nonces each thread scans between checks of the cancel flag and deadline
const SCAN_CHUNK: u64 = 0x1_0000;

/// Splits one work item's nonce space across threads
pub struct CpuMiner {
    threads: usize,
    scan: ScanLoop,
}

impl CpuMiner {
    /// Resolves the configured algorithm, benchmarking if this is the first
    /// resolution in the process.
    pub fn new(config: &MinerConfig) -> CpuMiner {
        CpuMiner {
            threads: config.cpu_threads.unwrap_or_else(num_cpus::get).max(1),
            scan: ScanLoop::from_config(config),
        }
    }

    pub fn describe(&self) -> String {
        match self.scan.algorithm() {
            Some(algorithm) => format!("CPU [{}x {}]", self.threads, algorithm),
            None => format!("CPU [{}x unavailable]", self.threads),
        }
    }

    /// Scan the whole nonce space of `work` from nonce zero until it is
    /// exhausted, the work is cancelled, or `deadline` passes. Returns the
    /// number of nonces hashed.
    pub fn mine(
        &self,
        work: &WorkItem,
        mut interface: MinerInterface,
        deadline: Option<Instant>,
    ) -> u64 {
        let hashes = AtomicU64::new(0);
        let (share_tx, share_rx) = crossbeam::channel::unbounded::<Share>();
        let threads = self.threads as u64;
        let span = (1 << 32) / threads;

        // convert bindings to references to avoid lifetime/ownership complications
        let hashes = &hashes;
        let scan = &self.scan;

        let result = crossbeam::scope(move |s| {
            for i in 0..threads {
                let first = i * span;
                let end = if i + 1 == threads { 1 << 32 } else { first + span };

                let mut work = work.clone();
                work.set_next_nonce(first);
                let mut share_tx = share_tx.clone();

                let spawned = s
                    .builder()
                    .name(format!("CPU miner {}", i))
                    .spawn(move |_| {
                        if let Err(e) = thread_priority::set_low_priority() {
                            debug!("Couldn't lower miner thread priority: {}", e);
                        }

                        while !work.is_cancelled() && work.next_nonce() < end {
                            let ceiling = (work.next_nonce() + SCAN_CHUNK).min(end);
                            let report = scan.scan(&mut work, ceiling, &mut share_tx);
                            hashes.fetch_add(report.processed, Ordering::Relaxed);

                            if report.state == ScanState::Cancelled {
                                break;
                            }
                        }
                    });

                if let Err(e) = spawned {
                    error!("Failed to start CPU miner thread {}: {}", i, e);
                }
            }

            // workers hold the remaining senders
            drop(share_tx);

            let mut total = 0;
            let mut cycle_start = Instant::now();

            loop {
                match share_rx.recv_timeout(Duration::from_millis(1000)) {
                    Ok(share) => interface.report_share(&share),
                    Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                if deadline.map_or(false, |d| Instant::now() >= d) && !work.is_cancelled() {
                    info!("Mining time elapsed, stopping");
                    work.cancel_flag().cancel();
                }

                let cycle_time = std::mem::replace(&mut cycle_start, Instant::now()).elapsed();
                let cycle_hashes = hashes.swap(0, Ordering::Relaxed);
                total += cycle_hashes;
                interface.report_speed(cycle_hashes, cycle_time);
            }

            total + hashes.swap(0, Ordering::Relaxed)
        });

        result.unwrap_or_else(|_| {
            error!("A CPU miner thread panicked");
            0
        })
    }
}
