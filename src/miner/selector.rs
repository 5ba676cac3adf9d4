use crate::miner::cpu::bench::{BenchMode, BenchmarkHarness, BenchmarkResult};
use crate::miner::cpu::{AlgorithmId, Registry};
use crate::miner::{ConfigError, RuntimeUnavailable};
use crate::prelude::*;
use lazy_static::lazy_static;
use std::sync::{PoisonError, RwLock};

/// The configured hashing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmChoice {
    /// Always use this kernel
    Fixed(AlgorithmId),

    /// Pick the fastest kernel by a quick benchmark
    FastAuto,

    /// Pick the fastest kernel by a thorough benchmark
    Auto,
}

impl AlgorithmChoice {
    pub fn bench_mode(self) -> BenchMode {
        match self {
            Self::Auto => BenchMode::Thorough,
            _ => BenchMode::Quick,
        }
    }
}

impl Default for AlgorithmChoice {
    fn default() -> Self {
        Self::FastAuto
    }
}

impl FromStr for AlgorithmChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fastauto" => Ok(Self::FastAuto),
            "auto" => Ok(Self::Auto),
            s => s.parse().map(Self::Fixed),
        }
    }
}

impl Display for AlgorithmChoice {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Fixed(id) => Display::fmt(id, f),
            Self::FastAuto => f.write_str("fastauto"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

/// The highest rate result, or the first of several equally fast ones
pub fn fastest<I: IntoIterator<Item = BenchmarkResult>>(results: I) -> Option<BenchmarkResult> {
    results.into_iter().fold(None, |best, result| match best {
        Some(best) if best.rate >= result.rate => Some(best),
        _ => Some(result),
    })
}

/// Benchmark each candidate in turn and return the fastest. When everything
/// failed this is still the least bad result; `None` means no candidates.
pub fn select_fastest<I, F>(candidates: I, bench: F) -> Option<BenchmarkResult>
where
    I: IntoIterator<Item = AlgorithmId>,
    F: FnMut(AlgorithmId) -> BenchmarkResult,
{
    fastest(candidates.into_iter().map(bench))
}

lazy_static! {
    static ref GLOBAL: Selector = Selector::new();
}

/// Holds the process-wide algorithm choice. The first resolution decides,
/// and every later one returns the same algorithm until `reset`.
#[derive(Debug, Default)]
pub struct Selector {
    chosen: RwLock<Option<AlgorithmId>>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Selector {
        &GLOBAL
    }

    pub fn chosen(&self) -> Option<AlgorithmId> {
        *self.chosen.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the chosen algorithm so the next resolution selects again
    pub fn reset(&self) {
        *self.chosen.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Resolve `choice` against this CPU's kernels, benchmarking them with
    /// `harness` unless an algorithm was already chosen.
    pub fn resolve(
        &self,
        choice: AlgorithmChoice,
        harness: &BenchmarkHarness,
    ) -> Result<AlgorithmId, RuntimeUnavailable> {
        let mode = choice.bench_mode();

        self.resolve_with(choice, Registry::detect().benchmark_candidates(), |id| {
            harness.benchmark(id, mode)
        })
    }

    /// Like `resolve`, with the candidates and benchmark supplied. Concurrent
    /// callers block while one of them benchmarks.
    pub fn resolve_with<I, F>(
        &self,
        choice: AlgorithmChoice,
        candidates: I,
        bench: F,
    ) -> Result<AlgorithmId, RuntimeUnavailable>
    where
        I: IntoIterator<Item = AlgorithmId>,
        F: FnMut(AlgorithmId) -> BenchmarkResult,
    {
        if let Some(chosen) = self.chosen() {
            return Ok(chosen);
        }

        let mut chosen = self.chosen.write().unwrap_or_else(PoisonError::into_inner);

        // another thread may have finished while we waited for the lock
        if let Some(chosen) = *chosen {
            return Ok(chosen);
        }

        let algorithm = match choice {
            AlgorithmChoice::Fixed(id) if id.kernel().is_some() => {
                info!("Using algorithm \"{}\"", id);
                id
            }

            choice => {
                if let AlgorithmChoice::Fixed(id) = choice {
                    warn!(
                        "Algorithm \"{}\" is not available on this CPU, selecting automatically",
                        id
                    );
                }

                info!("Benchmarking all sha256d algorithms ...");
                let best = select_fastest(candidates, bench).ok_or(RuntimeUnavailable)?;

                if best.is_success() {
                    info!(
                        "\"{}\" : is the fastest algorithm at {:.5} MH/s",
                        best.algorithm, best.rate
                    );
                } else {
                    warn!("Every algorithm failed its benchmark, using \"{}\"", best.algorithm);
                }

                best.algorithm
            }
        };

        *chosen = Some(algorithm);
        Ok(algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::bench::Sample;
    use enumset::EnumSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn rates(table: &'static [(AlgorithmId, f64)]) -> impl FnMut(AlgorithmId) -> BenchmarkResult {
        move |algorithm| BenchmarkResult {
            algorithm,
            rate: table
                .iter()
                .find(|(id, _)| *id == algorithm)
                .map_or(BenchmarkResult::FAILED, |&(_, rate)| rate),
        }
    }

    const CANDIDATES: [AlgorithmId; 4] = [
        AlgorithmId::C,
        AlgorithmId::Sse2,
        AlgorithmId::Sse4,
        AlgorithmId::Avx2,
    ];

    #[test]
    fn test_parse_choice() {
        assert_eq!("fastauto".parse(), Ok(AlgorithmChoice::FastAuto));
        assert_eq!("auto".parse(), Ok(AlgorithmChoice::Auto));
        assert_eq!("shani".parse(), Ok(AlgorithmChoice::Fixed(AlgorithmId::ShaNi)));
        assert_eq!(
            "fast".parse::<AlgorithmChoice>(),
            Err(ConfigError::UnknownAlgorithm("fast".to_string()))
        );
        assert_eq!(AlgorithmChoice::Fixed(AlgorithmId::Neon).to_string(), "neon_4way");
        assert_eq!(AlgorithmChoice::default().bench_mode(), BenchMode::Quick);
        assert_eq!(AlgorithmChoice::Auto.bench_mode(), BenchMode::Thorough);
    }

    #[test]
    fn test_choice_names_round_trip() {
        let fixed = EnumSet::<AlgorithmId>::all().iter().map(AlgorithmChoice::Fixed);
        let choices: Vec<_> = [AlgorithmChoice::FastAuto, AlgorithmChoice::Auto]
            .iter()
            .copied()
            .chain(fixed)
            .collect();

        for choice in choices {
            assert_eq!(choice.to_string().parse(), Ok(choice), "{}", choice);
        }
    }

    #[test]
    fn test_highest_rate_wins() {
        use AlgorithmId::*;
        let bench = rates(&[(C, 1.), (Sse2, 2.), (Sse4, 4.), (Avx2, 3.)]);
        let best = select_fastest(CANDIDATES.iter().copied(), bench);
        assert_eq!(best.map(|b| b.algorithm), Some(Sse4));
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        use AlgorithmId::*;
        let bench = rates(&[(C, 1.), (Sse2, 3.), (Sse4, 2.), (Avx2, 3.)]);
        let best = select_fastest(CANDIDATES.iter().copied(), bench);
        assert_eq!(best.map(|b| b.algorithm), Some(Sse2));
    }

    #[test]
    fn test_registry_order_breaks_ties() {
        use AlgorithmId::*;
        let candidates = Registry::detect().benchmark_candidates();
        let bench = rates(&[(C, 1.), (CryptoPp, 2.), (Sse2, 2.), (Neon, 2.)]);

        let best = select_fastest(candidates, bench).unwrap();
        assert_eq!(best.algorithm, CryptoPp);
    }

    #[test]
    fn test_all_failed_picks_least_bad() {
        let best = select_fastest(CANDIDATES.iter().copied(), rates(&[])).unwrap();
        assert_eq!(best.algorithm, AlgorithmId::C);
        assert!(!best.is_success());

        let selector = Selector::new();
        assert_eq!(
            selector.resolve_with(
                AlgorithmChoice::FastAuto,
                CANDIDATES.iter().copied(),
                rates(&[])
            ),
            Ok(AlgorithmId::C)
        );
    }

    #[test]
    fn test_no_candidates() {
        let selector = Selector::new();
        let result = selector.resolve_with(AlgorithmChoice::Auto, Vec::new(), rates(&[]));

        assert_eq!(result, Err(RuntimeUnavailable));
        assert_eq!(selector.chosen(), None);
    }

    #[test]
    fn test_first_resolution_sticks() {
        use AlgorithmId::*;
        let selector = Selector::new();

        let candidates = || CANDIDATES.iter().copied();
        let fast = AlgorithmChoice::FastAuto;

        let first = selector.resolve_with(fast, candidates(), rates(&[(Sse2, 2.)]));
        assert_eq!(first, Ok(Sse2));

        let second = selector.resolve_with(AlgorithmChoice::Fixed(C), candidates(), |_| {
            panic!("already selected")
        });
        assert_eq!(second, Ok(Sse2));

        selector.reset();
        let third = selector.resolve_with(fast, candidates(), rates(&[(Avx2, 2.)]));
        assert_eq!(third, Ok(Avx2));
    }

    #[test]
    fn test_fixed_choice_skips_benchmark() {
        let selector = Selector::new();
        let fixed = AlgorithmChoice::Fixed(AlgorithmId::C);
        let result = selector.resolve_with(fixed, CANDIDATES.iter().copied(), |_| {
            panic!("fixed choices aren't benchmarked")
        });

        assert_eq!(result, Ok(AlgorithmId::C));
    }

    #[test]
    fn test_unavailable_fixed_choice_falls_back() {
        let registry = Registry::detect();
        let missing = match registry.list().into_iter().find(|d| !d.available) {
            Some(missing) => missing.id,
            None => return,
        };

        let selector = Selector::new();
        let bench = rates(&[(AlgorithmId::Sse4, 1.)]);
        let fixed = AlgorithmChoice::Fixed(missing);
        let result = selector.resolve_with(fixed, CANDIDATES.iter().copied(), bench);
        assert_eq!(result, Ok(AlgorithmId::Sse4));
    }

    #[test]
    fn test_concurrent_resolution_benchmarks_once() {
        let selector = Selector::new();
        let calls = AtomicUsize::new(0);

        let results: Vec<_> = crossbeam::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|_| {
                        let mut bench = rates(&[(AlgorithmId::Sse4, 5.)]);
                        let candidates = CANDIDATES.iter().copied();

                        selector.resolve_with(AlgorithmChoice::FastAuto, candidates, |algorithm| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            bench(algorithm)
                        })
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        assert!(results.iter().all(|r| *r == Ok(AlgorithmId::Sse4)));
        assert_eq!(calls.load(Ordering::SeqCst), CANDIDATES.len());
    }

    #[cfg(unix)]
    #[test]
    fn test_crashing_candidate_is_skipped() {
        let harness = BenchmarkHarness::default();
        let selector = Selector::new();

        let candidates = CANDIDATES.iter().copied();
        let result = selector.resolve_with(AlgorithmChoice::FastAuto, candidates, |algorithm| {
            let outcome = harness.run_isolated(|| match algorithm {
                AlgorithmId::Avx2 => Some(Sample {
                    nonces: 1 << 8,
                    elapsed: Duration::from_micros(10),
                }),
                _ => {
                    unsafe { libc::raise(libc::SIGILL) };
                    None
                }
            });

            BenchmarkResult::from_outcome(algorithm, outcome)
        });

        assert_eq!(result, Ok(AlgorithmId::Avx2));
    }

    #[test]
    fn test_resolve_uses_real_kernels() {
        let selector = Selector::new();
        let algorithm = selector
            .resolve(AlgorithmChoice::FastAuto, &BenchmarkHarness::default())
            .unwrap();

        assert!(algorithm.is_sha256d());
        assert!(algorithm.kernel().is_some());

        let fixed = AlgorithmChoice::Fixed(AlgorithmId::C);
        let harness = BenchmarkHarness::default();
        assert_eq!(Selector::new().resolve(fixed, &harness), Ok(AlgorithmId::C));
    }
}
