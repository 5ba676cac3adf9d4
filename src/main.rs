use indicatif::ProgressBar;
use log::{error, info, warn, LevelFilter};
use rand::Rng;
use shaforge::miner::cpu::bench::{BenchConfig, BenchMode, BenchmarkHarness, BenchmarkResult};
use shaforge::miner::cpu::{get_cpu_info, CpuMiner, Registry};
use shaforge::miner::interface::MinerInterface;
use shaforge::miner::selector::{fastest, AlgorithmChoice};
use shaforge::{AlgorithmId, BlockHeader, MinerConfig, PowAlgorithm, Target, WorkItem};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::{self, File};
use std::io;
use std::time::{Duration, Instant};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "SHA-256d proof-of-work CPU hashing engine")]
pub struct Opts {
    /// Log debug messages to the terminal
    #[structopt(short, long, global = true)]
    verbose: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Show this CPU's threads and supported kernels
    Info,

    /// Benchmark every available SHA-256d kernel
    Bench {
        /// Hash 4194304 nonces per kernel rather than 256
        #[structopt(long)]
        thorough: bool,

        /// Print results as JSON
        #[structopt(long)]
        json: bool,

        #[structopt(flatten)]
        bench: BenchConfig,
    },

    /// Mine synthetic work with the selected kernel
    Mine {
        #[structopt(flatten)]
        config: MinerConfig,

        /// Block header to mine, as 160 hex digits. Random if not set.
        #[structopt(long)]
        header: Option<BlockHeader>,

        /// Compact-encoded share target, in hex
        #[structopt(long, default_value = "1f00ffff", parse(try_from_str = parse_bits))]
        bits: u32,

        /// Stop after this many seconds
        #[structopt(long, default_value = "10")]
        seconds: u64,
    },
}

fn parse_bits(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16)
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

/// Log to the terminal, and everything at debug level to a file in the user's
/// data directory when one exists
fn init_logging(verbose: bool) -> Result<(), CliError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(dir) = dirs::data_local_dir().map(|d| d.join("shaforge")) {
        fs::create_dir_all(&dir)?;
        let file = File::create(dir.join("shaforge.log"))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    CombinedLogger::init(loggers)?;
    Ok(())
}

fn bench(thorough: bool, json: bool, config: BenchConfig) -> Result<(), CliError> {
    let harness = BenchmarkHarness::new(&config);
    let mode = if thorough {
        BenchMode::Thorough
    } else {
        BenchMode::Quick
    };

    let results: Vec<BenchmarkResult> = Registry::detect()
        .benchmark_candidates()
        .map(|id| harness.benchmark(id, mode))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        if result.is_success() {
            println!("{:<14} {:>12.3} MH/s", result.algorithm.to_string(), result.rate);
        } else {
            println!("{:<14} {:>12}", result.algorithm.to_string(), "failed");
        }
    }

    if let Some(best) = fastest(results.iter().copied()) {
        println!("Fastest: {}", best.algorithm);
    }

    Ok(())
}

fn random_header() -> BlockHeader {
    let mut bytes = [0u8; BlockHeader::LENGTH];
    rand::thread_rng().fill(&mut bytes[..]);
    BlockHeader::from_bytes(bytes).with_nonce(0)
}

fn mine(config: MinerConfig, header: Option<BlockHeader>, bits: u32, seconds: u64) {
    let mut work = WorkItem::new(header.unwrap_or_else(random_header), Target::from_compact(bits));
    if config.algo == AlgorithmChoice::Fixed(AlgorithmId::Scrypt) {
        work = work.with_pow(PowAlgorithm::Scrypt);
    }

    info!("Mining {} for target {}", work.header(), work.target());

    let miner = CpuMiner::new(&config);
    info!("Starting {}", miner.describe());

    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(100));
    let interface = MinerInterface::new(pb);

    let started = Instant::now();
    let deadline = started + Duration::from_secs(seconds);
    let hashes = miner.mine(&work, interface, Some(deadline));

    info!("Hashed {} nonces in {:.1?}", hashes, started.elapsed());
}

fn main() {
    let opts: Opts = Opts::from_args();

    if let Err(e) = init_logging(opts.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match opts.command {
        Command::Info => println!("{}", get_cpu_info()),
        Command::Bench {
            thorough,
            json,
            bench: config,
        } => {
            if let Err(e) = bench(thorough, json, config) {
                error!("Benchmark failed: {}", e);
            }
        }
        Command::Mine {
            config,
            header,
            bits,
            seconds,
        } => {
            if seconds == 0 {
                warn!("Nothing to do for zero seconds");
                return;
            }

            mine(config, header, bits, seconds)
        }
    }
}
