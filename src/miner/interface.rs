use crate::miner::types::Share;
use crate::prelude::*;
use crossbeam::channel::Sender;
use indicatif::ProgressBar;
use std::cmp::min;
use std::time::Duration;

/// Returned by a share sink that no longer accepts shares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopMining;

/// Receives accepted shares from a scan; the work dispatcher's end of the
/// scan loop.
pub trait ShareSink {
    fn submit(&mut self, share: Share) -> Result<(), StopMining>;
}

impl ShareSink for Sender<Share> {
    fn submit(&mut self, share: Share) -> Result<(), StopMining> {
        self.send(share).map_err(|_| StopMining)
    }
}

impl ShareSink for Vec<Share> {
    fn submit(&mut self, share: Share) -> Result<(), StopMining> {
        self.push(share);
        Ok(())
    }
}

/// A hashing speed
#[derive(Debug, Clone, Copy)]
pub struct HashRate {
    pub hashes: u64,
    pub elapsed: Duration,
}

impl Display for HashRate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let per_second = self.hashes as f64 / self.elapsed.as_secs_f64();

        const PREFIXES: &[&str] = &["", "k", "M", "G", "T"];
        let mag = min(PREFIXES.len() - 1, per_second.log(1000.).floor() as usize);
        let n = per_second / 1000f64.powf(mag as f64);

        let precision = f.precision().unwrap_or(2);
        write!(f, "{:.*} {}h/s", precision, n, PREFIXES[mag])
    }
}

/// Progress reporting for a running miner
pub struct MinerInterface {
    pb: ProgressBar,
    shares: usize,
}

impl MinerInterface {
    pub fn new(pb: ProgressBar) -> Self {
        Self { pb, shares: 0 }
    }

    pub fn shares(&self) -> usize {
        self.shares
    }

    /// Report a share
    pub fn report_share(&mut self, share: &Share) {
        self.shares += 1;
        info!("Found share {}", share);
        self.pb.println(format!("Share #{}: {}", self.shares, share));
    }

    pub fn report_speed(&mut self, hashes: u64, elapsed: Duration) {
        self.pb.set_message(format!(
            "Mining at {:.1} ({} shares)",
            HashRate { hashes, elapsed },
            self.shares
        ));
    }
}

impl Drop for MinerInterface {
    fn drop(&mut self) {
        self.pb.finish();
    }
}
