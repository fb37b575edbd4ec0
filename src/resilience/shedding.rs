//! CPU-based load shedding.
//!
//! # Responsibilities
//! - Sample process-wide CPU usage in per-mille (0..=1000)
//! - Decide whether an inbound request should be shed
//!
//! # Design Decisions
//! - A background task reads `/proc/stat` every 250 ms; request handlers only
//!   load the cached atomic and never touch the file system
//! - The task starts on the first reading taken inside a Tokio runtime and
//!   stops once the sampler is dropped
//! - Usage is smoothed with an exponential moving average so single spikes do not shed
//! - Platforms without `/proc/stat` report 0 and never shed

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Weight of the previous value in the moving average, in percent.
const EMA_BETA_PERCENT: u64 = 95;

/// Source of CPU usage readings.
pub trait CpuSampler: Send + Sync + 'static {
    fn usage_per_mille(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Reads aggregate CPU time from `/proc/stat` on a background task.
pub struct ProcCpuSampler {
    usage: Arc<AtomicU64>,
    sampling: AtomicBool,
}

impl ProcCpuSampler {
    pub fn new() -> Self {
        Self {
            usage: Arc::new(AtomicU64::new(0)),
            sampling: AtomicBool::new(false),
        }
    }

    /// Whether the background sampling task has been started.
    pub fn is_sampling(&self) -> bool {
        self.sampling.load(Ordering::Acquire)
    }

    fn ensure_sampling(&self) {
        if self.sampling.load(Ordering::Acquire) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        if self.sampling.swap(true, Ordering::AcqRel) {
            return;
        }
        handle.spawn(sample_loop(Arc::downgrade(&self.usage)));
    }
}

async fn sample_loop(usage: Weak<AtomicU64>) {
    let mut ticks = tokio::time::interval(SAMPLE_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut previous: Option<CpuTimes> = None;

    loop {
        ticks.tick().await;
        let Some(usage) = usage.upgrade() else {
            break;
        };
        let Some(current) = tokio::fs::read_to_string("/proc/stat")
            .await
            .ok()
            .and_then(|stat| parse_cpu_times(&stat))
        else {
            tracing::debug!("CPU usage unavailable, load shedding stays idle");
            break;
        };

        if let Some(previous) = previous {
            if let Some(smoothed) = smooth(usage.load(Ordering::Relaxed), previous, current) {
                usage.store(smoothed, Ordering::Relaxed);
            }
        }
        previous = Some(current);
    }
}

/// Fold the interval between two readings into the moving average.
fn smooth(old: u64, previous: CpuTimes, current: CpuTimes) -> Option<u64> {
    let total = current.total.saturating_sub(previous.total);
    if total == 0 {
        return None;
    }
    let busy = current.busy.saturating_sub(previous.busy);
    let instant = (busy * 1000 / total).min(1000);
    Some((old * EMA_BETA_PERCENT + instant * (100 - EMA_BETA_PERCENT)) / 100)
}

impl Default for ProcCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for ProcCpuSampler {
    fn usage_per_mille(&self) -> u64 {
        self.ensure_sampling();
        self.usage.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ProcCpuSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcCpuSampler")
            .field("usage", &self.usage.load(Ordering::Relaxed))
            .field("sampling", &self.is_sampling())
            .finish()
    }
}

/// Parse the aggregate `cpu` line: user nice system idle iowait irq softirq steal.
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|line| line.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|field| field.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }

    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

/// Rejects work while sampled CPU usage is above the threshold.
#[derive(Clone)]
pub struct LoadShedder {
    threshold: u64,
    sampler: Arc<dyn CpuSampler>,
}

impl LoadShedder {
    /// `threshold == 0` disables shedding.
    pub fn new(threshold: u64, sampler: Arc<dyn CpuSampler>) -> Self {
        Self { threshold, sampler }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn should_shed(&self) -> bool {
        if self.threshold == 0 {
            return false;
        }
        let usage = self.sampler.usage_per_mille();
        if usage > self.threshold {
            tracing::debug!(usage, threshold = self.threshold, "Shedding request");
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for LoadShedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadShedder")
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl CpuSampler for Fixed {
        fn usage_per_mille(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn sheds_strictly_above_threshold() {
        assert!(!LoadShedder::new(500, Arc::new(Fixed(499))).should_shed());
        assert!(!LoadShedder::new(500, Arc::new(Fixed(500))).should_shed());
        assert!(LoadShedder::new(500, Arc::new(Fixed(501))).should_shed());
    }

    #[test]
    fn zero_threshold_never_sheds() {
        assert!(!LoadShedder::new(0, Arc::new(Fixed(1000))).should_shed());
    }

    #[test]
    fn parses_proc_stat() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 100 0 50 800 50 0 0 0 0 0\n";
        assert_eq!(
            parse_cpu_times(stat),
            Some(CpuTimes {
                busy: 150,
                total: 1000
            })
        );
        assert_eq!(parse_cpu_times("intr 1 2 3\n"), None);
    }

    #[test]
    fn smoothing_moves_slowly_towards_load() {
        let previous = CpuTimes { busy: 0, total: 0 };
        let saturated = CpuTimes {
            busy: 1000,
            total: 1000,
        };
        assert_eq!(smooth(0, previous, saturated), Some(50));
        assert_eq!(smooth(1000, previous, saturated), Some(1000));
        assert_eq!(smooth(400, saturated, saturated), None);
    }

    #[test]
    fn sampler_outside_runtime_reports_zero() {
        let sampler = ProcCpuSampler::new();
        assert_eq!(sampler.usage_per_mille(), 0);
        assert!(!sampler.is_sampling());
    }

    #[tokio::test]
    async fn sampling_runs_in_background() {
        let sampler = ProcCpuSampler::new();
        assert!(sampler.usage_per_mille() <= 1000);
        assert!(sampler.is_sampling());

        tokio::time::sleep(SAMPLE_INTERVAL * 3).await;
        assert!(sampler.usage_per_mille() <= 1000);
    }
}
