//! Kernel benchmarking.
//!
//! A kernel that uses instructions the CPU can't execute dies with `SIGILL`
//! rather than returning an error, so kernels built on raw intrinsics or
//! assembly are measured in a forked child process. The child reports its
//! measurement over a pipe; the parent polls for its exit and kills it if it
//! overruns the timeout.

use super::framework::Kernel;
use super::kernels::scalar;
use super::AlgorithmId;
use crate::miner::types::{BlockHeader, PowAlgorithm, Target, WorkItem};
use crate::prelude::*;
use std::io;
use std::time::{Duration, Instant};
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
pub struct BenchConfig {
    /// Seconds to wait for a benchmark before killing it
    #[structopt(long = "bench-timeout", default_value = "60")]
    pub bench_timeout: u64,

    /// Run every benchmark in a child process, including kernels that can't
    /// fault on unsupported hardware
    #[structopt(long)]
    pub isolate_all: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            bench_timeout: 60,
            isolate_all: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchMode {
    /// A few batches, enough to rank kernels
    Quick,

    /// Long enough to smooth out scheduling noise
    Thorough,
}

impl BenchMode {
    pub fn nonces(self) -> u32 {
        match self {
            Self::Quick => 1 << 8,
            Self::Thorough => 1 << 22,
        }
    }
}

/// One measurement: nonces hashed in some elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub nonces: u64,
    pub elapsed: Duration,
}

impl Sample {
    const ENCODED_LEN: usize = 16;

    fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let elapsed = u64::try_from(self.elapsed.as_nanos()).unwrap_or(u64::MAX);

        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.nonces.to_le_bytes());
        out[8..].copy_from_slice(&elapsed.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut word = [0u8; 8];

        word.copy_from_slice(&bytes[..8]);
        let nonces = u64::from_le_bytes(word);
        word.copy_from_slice(&bytes[8..]);
        let elapsed = Duration::from_nanos(u64::from_le_bytes(word));

        Self { nonces, elapsed }
    }

    /// Nonces per microsecond, or `None` if no time was measured
    pub fn rate(&self) -> Option<f64> {
        let micros = self.elapsed.as_secs_f64() * 1e6;

        if micros > 0. {
            Some(self.nonces as f64 / micros)
        } else {
            None
        }
    }
}

/// A benchmarked kernel's speed in nonces per microsecond (MH/s), or
/// [`BenchmarkResult::FAILED`] if the benchmark failed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub algorithm: AlgorithmId,
    pub rate: f64,
}

impl BenchmarkResult {
    pub const FAILED: f64 = -1.;

    pub fn failed(algorithm: AlgorithmId) -> Self {
        Self {
            algorithm,
            rate: Self::FAILED,
        }
    }

    pub fn is_success(&self) -> bool {
        self.rate >= 0.
    }

    /// Convert a benchmark outcome to a result, logging it
    pub fn from_outcome(algorithm: AlgorithmId, outcome: Result<Sample, BenchError>) -> Self {
        let label = format!("\"{}\"", algorithm);

        match outcome.map(|sample| sample.rate()) {
            Ok(Some(rate)) => {
                info!("{:<14} : {:.5} MH/s", label, rate);
                Self { algorithm, rate }
            }
            Ok(None) => {
                warn!("{:<14} : benchmark measured no elapsed time", label);
                Self::failed(algorithm)
            }
            Err(e) => {
                warn!("{:<14} : algorithm fails on this platform ({})", label, e);
                Self::failed(algorithm)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("kernel is not available on this CPU")]
    Unavailable,

    #[error("benchmark process killed by signal {0}")]
    Crashed(i32),

    #[error("benchmark process timed out after {0:?}")]
    TimedOut(Duration),

    #[error("benchmark process exited with status {0}")]
    Exited(i32),

    #[error("kernel output differs from the reference kernel")]
    Mismatch,

    #[error("benchmark process exited without a result")]
    NoResult,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Child process exit statuses
const EXIT_OK: i32 = 0;
const EXIT_WRITE_FAILED: i32 = 1;
const EXIT_PANICKED: i32 = 2;
const EXIT_MISMATCH: i32 = 3;

#[derive(Debug, Clone)]
pub struct BenchmarkHarness {
    timeout: Duration,
    poll_interval: Duration,
    write_attempts: u32,
    retry_delay: Duration,
    isolate_all: bool,
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
            write_attempts: 6,
            retry_delay: Duration::from_millis(10),
            isolate_all: false,
        }
    }
}

impl BenchmarkHarness {
    pub fn new(config: &BenchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.bench_timeout),
            isolate_all: config.isolate_all,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Measure one kernel's speed. Never fails: any failure, including the
    /// kernel crashing or hanging, yields a failed result.
    pub fn benchmark(&self, algorithm: AlgorithmId, mode: BenchMode) -> BenchmarkResult {
        let kernel = match algorithm.kernel() {
            Some(kernel) => kernel,
            None => return BenchmarkResult::from_outcome(algorithm, Err(BenchError::Unavailable)),
        };

        debug!("Benchmarking {} over {} nonces", algorithm, mode.nonces());

        // allocate before forking
        let mut probe = WorkItem::new(bench_header(), Target::MAX);
        let mut work = WorkItem::new(bench_header(), Target::from_compact(0x1d00_ffff));
        let nonces = mode.nonces();
        let mut run = move || measure(kernel, &mut probe, &mut work, nonces);

        let outcome = if self.isolate_all || algorithm.needs_isolation() {
            self.run_isolated(run)
        } else {
            run().ok_or(BenchError::Mismatch)
        };

        BenchmarkResult::from_outcome(algorithm, outcome)
    }

    /// Run `measure` in a child process and collect its sample. `None` from
    /// `measure` means the kernel produced a wrong hash.
    #[cfg(unix)]
    pub fn run_isolated<F>(&self, measure: F) -> Result<Sample, BenchError>
    where
        F: FnOnce() -> Option<Sample>,
    {
        use std::panic::{self, AssertUnwindSafe};

        // writing to a pipe with no reader fails with EPIPE instead
        unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };

        let (read_fd, write_fd) = pipe()?;

        match unsafe { libc::fork() } {
            -1 => {
                let e = io::Error::last_os_error();
                unsafe {
                    libc::close(read_fd);
                    libc::close(write_fd);
                }
                Err(e.into())
            }

            0 => {
                unsafe { libc::close(read_fd) };

                let status = match panic::catch_unwind(AssertUnwindSafe(measure)) {
                    Ok(Some(sample)) => {
                        if self.write_retrying(write_fd, &sample.encode()) {
                            EXIT_OK
                        } else {
                            EXIT_WRITE_FAILED
                        }
                    }
                    Ok(None) => EXIT_MISMATCH,
                    Err(_) => EXIT_PANICKED,
                };

                // skip atexit handlers and destructors inherited from the parent
                unsafe { libc::_exit(status) }
            }

            pid => {
                unsafe { libc::close(write_fd) };
                let outcome = self.supervise(pid, read_fd);
                unsafe { libc::close(read_fd) };
                outcome
            }
        }
    }

    /// Without `fork` there's nothing to isolate kernels in, so they run in
    /// this process.
    #[cfg(not(unix))]
    pub fn run_isolated<F>(&self, measure: F) -> Result<Sample, BenchError>
    where
        F: FnOnce() -> Option<Sample>,
    {
        warn!("Process isolation is not supported on this platform, benchmarking in-process");
        measure().ok_or(BenchError::Mismatch)
    }

    #[cfg(unix)]
    fn write_retrying(&self, fd: libc::c_int, bytes: &[u8]) -> bool {
        for _ in 0..self.write_attempts {
            let written =
                unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };

            if written == bytes.len() as isize {
                return true;
            }

            if written < 0 {
                match io::Error::last_os_error().kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {}
                    _ => return false,
                }
            }

            std::thread::sleep(self.retry_delay);
        }

        false
    }

    /// Wait for the child to exit, killing it at the deadline, then read its
    /// sample.
    #[cfg(unix)]
    fn supervise(&self, pid: libc::pid_t, read_fd: libc::c_int) -> Result<Sample, BenchError> {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        let deadline = Instant::now() + self.timeout;
        let mut status = 0;

        loop {
            match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
                0 => {}
                -1 => {
                    let e = io::Error::last_os_error();
                    if e.kind() != io::ErrorKind::Interrupted {
                        return Err(e.into());
                    }
                }
                _ => break,
            }

            if Instant::now() >= deadline {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                    libc::waitpid(pid, &mut status, 0);
                }

                return Err(BenchError::TimedOut(self.timeout));
            }

            std::thread::sleep(self.poll_interval);
        }

        let status = ExitStatus::from_raw(status);
        if let Some(signal) = status.signal() {
            return Err(BenchError::Crashed(signal));
        }

        match status.code() {
            Some(EXIT_OK) => read_sample(read_fd).ok_or(BenchError::NoResult),
            Some(EXIT_MISMATCH) => Err(BenchError::Mismatch),
            Some(code) => Err(BenchError::Exited(code)),
            None => Err(BenchError::NoResult),
        }
    }
}

#[cfg(unix)]
fn pipe() -> io::Result<(libc::c_int, libc::c_int)> {
    let mut fds = [0 as libc::c_int; 2];

    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }

    Ok((fds[0], fds[1]))
}

#[cfg(unix)]
fn read_sample(fd: libc::c_int) -> Option<Sample> {
    let mut buf = [0u8; Sample::ENCODED_LEN];
    let read = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };

    if read == buf.len() as isize {
        Some(Sample::decode(&buf))
    } else {
        None
    }
}

/// A fixed synthetic header, so every kernel hashes the same data
fn bench_header() -> BlockHeader {
    let mut bytes = [0u8; BlockHeader::LENGTH];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(0x9d) ^ 0x5a;
    }
    bytes[72..76].copy_from_slice(&0x1d00_ffffu32.to_le_bytes());

    BlockHeader::from_bytes(bytes).with_nonce(0)
}

/// Check `kernel` against the reference on a couple of batches of `probe`,
/// then time it over `nonces` nonces of `work`
fn measure(
    kernel: &dyn Kernel,
    probe: &mut WorkItem,
    work: &mut WorkItem,
    nonces: u32,
) -> Option<Sample> {
    if kernel.pow() == PowAlgorithm::Sha256d {
        for nonce in 0..2 * kernel.lanes() as u32 {
            let run = kernel.run(probe, nonce, nonce);
            if !run.found || *probe.hash() != scalar::reference_hash(probe, nonce) {
                return None;
            }
        }
    }

    let start = Instant::now();
    let run = kernel.run(work, 0, nonces - 1);
    let elapsed = start.elapsed();

    Some(Sample {
        nonces: u64::from(run.last_nonce) + 1,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::cpu::Registry;

    #[test]
    fn test_reference_kernel_benchmarks_in_process() {
        let result = BenchmarkHarness::default().benchmark(AlgorithmId::C, BenchMode::Quick);
        assert!(result.is_success());
        assert!(result.rate > 0.);
    }

    #[test]
    fn test_every_kernel_benchmarks() {
        let harness = BenchmarkHarness::default();

        for algorithm in Registry::detect().benchmark_candidates() {
            let result = harness.benchmark(algorithm, BenchMode::Quick);
            assert!(result.is_success(), "{} failed to benchmark", algorithm);
        }
    }

    #[test]
    fn test_unavailable_kernel_fails() {
        let registry = Registry::detect();
        let missing = registry.list().into_iter().find(|d| !d.available);

        if let Some(missing) = missing {
            let result = BenchmarkHarness::default().benchmark(missing.id, BenchMode::Quick);
            assert_eq!(result.rate, BenchmarkResult::FAILED);
        }
    }

    #[test]
    fn test_failed_outcomes_use_sentinel() {
        let result = BenchmarkResult::from_outcome(AlgorithmId::Avx2, Err(BenchError::Crashed(4)));
        assert_eq!(result.rate, BenchmarkResult::FAILED);
        assert!(!result.is_success());

        let empty = Sample {
            nonces: 256,
            elapsed: Duration::from_secs(0),
        };
        assert!(!BenchmarkResult::from_outcome(AlgorithmId::C, Ok(empty)).is_success());

        let sample = Sample {
            nonces: 3_000,
            elapsed: Duration::from_millis(1),
        };
        assert_eq!(BenchmarkResult::from_outcome(AlgorithmId::C, Ok(sample)).rate, 3.);
    }

    #[test]
    fn test_json_result() {
        let result = BenchmarkResult {
            algorithm: AlgorithmId::Sse2,
            rate: 1.5,
        };

        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"algorithm":"sse2_64","rate":1.5}"#
        );
    }

    #[cfg(unix)]
    mod isolation {
        use super::*;

        #[test]
        fn test_sample_crosses_process_boundary() {
            let sample = Sample {
                nonces: 4_194_304,
                elapsed: Duration::from_nanos(123_456_789),
            };

            let result = BenchmarkHarness::default().run_isolated(move || Some(sample));
            assert_eq!(result.unwrap(), sample);
        }

        #[test]
        fn test_crash_is_contained() {
            let result = BenchmarkHarness::default().run_isolated(|| {
                unsafe { libc::raise(libc::SIGILL) };
                None
            });

            match result {
                Err(BenchError::Crashed(signal)) => assert_eq!(signal, libc::SIGILL),
                other => panic!("expected a crash, got {:?}", other),
            }
        }

        #[test]
        fn test_hang_is_killed() {
            let harness = BenchmarkHarness::default()
                .with_timeout(Duration::from_millis(200))
                .with_poll_interval(Duration::from_millis(10));
            let start = Instant::now();

            let result = harness.run_isolated(|| {
                std::thread::sleep(Duration::from_secs(600));
                None
            });

            assert!(matches!(result, Err(BenchError::TimedOut(_))), "{:?}", result);
            assert!(start.elapsed() < Duration::from_secs(30));
        }

        #[test]
        fn test_wrong_hash_reported() {
            let result = BenchmarkHarness::default().run_isolated(|| None);
            assert!(matches!(result, Err(BenchError::Mismatch)), "{:?}", result);
        }

        #[test]
        fn test_write_to_full_pipe_gives_up() {
            let harness = BenchmarkHarness::default();
            let (read_fd, write_fd) = pipe().unwrap();

            // fill it until a write would block
            let filler = [0u8; 4096];
            loop {
                let written = unsafe {
                    libc::write(write_fd, filler.as_ptr() as *const libc::c_void, filler.len())
                };
                if written <= 0 {
                    break;
                }
            }

            let start = Instant::now();
            assert!(!harness.write_retrying(write_fd, &[1; Sample::ENCODED_LEN]));

            let elapsed = start.elapsed();
            assert!(elapsed >= harness.retry_delay * (harness.write_attempts - 1));
            assert!(elapsed < Duration::from_secs(5));

            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
        }

        #[test]
        fn test_write_to_empty_pipe() {
            let harness = BenchmarkHarness::default();
            let (read_fd, write_fd) = pipe().unwrap();
            let sample = Sample {
                nonces: 256,
                elapsed: Duration::from_micros(70),
            };

            assert!(harness.write_retrying(write_fd, &sample.encode()));
            assert_eq!(read_sample(read_fd), Some(sample));

            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
        }

        #[test]
        fn test_failed_write_exit_is_reported() {
            let outcome = BenchmarkHarness::default()
                .run_isolated(|| unsafe { libc::_exit(EXIT_WRITE_FAILED) });

            match outcome {
                Err(BenchError::Exited(code)) => assert_eq!(code, EXIT_WRITE_FAILED),
                ref other => panic!("expected a failed exit, got {:?}", other),
            }

            let result = BenchmarkResult::from_outcome(AlgorithmId::Sse2, outcome);
            assert_eq!(result.rate, BenchmarkResult::FAILED);
        }

        #[test]
        fn test_isolate_all() {
            let harness = BenchmarkHarness::new(&BenchConfig {
                bench_timeout: 60,
                isolate_all: true,
            });

            assert!(harness.benchmark(AlgorithmId::C, BenchMode::Quick).is_success());
        }
    }
}
