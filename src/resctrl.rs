//! Memory bandwidth via the resctrl MBM cumulative byte counters
//!
//! Alternative to the IMC adapter on machines where uncore PMU access is
//! locked down but `/sys/fs/resctrl` is mounted. `mbm_total_bytes` is a
//! monotonically increasing counter per L3 domain; the source differentiates
//! the summed counter against wall time.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::source::{CounterSource, SourceError};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct MbmConfig {
    /// Mounted resctrl root.
    pub root: PathBuf,
    /// Monitor group whose tasks are tracked.
    pub group: String,
    /// Sampling interval.
    pub interval: Duration,
}

impl Default for MbmConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/fs/resctrl"),
            group: "g1".to_string(),
            interval: Duration::from_secs(1),
        }
    }
}

/// File-backed bandwidth source over resctrl monitoring groups.
pub struct MbmSource {
    config: MbmConfig,
    counters: Vec<PathBuf>,
    previous: u64,
    last_read: Option<Instant>,
}

impl MbmSource {
    pub fn new(config: MbmConfig) -> Self {
        Self {
            config,
            counters: Vec::new(),
            previous: 0,
            last_read: None,
        }
    }

    /// Sum the cumulative byte counters across all L3 domains.
    ///
    /// A counter that fails to read or parse is skipped; losing every
    /// counter means the hierarchy went away.
    fn read_total(&self) -> Result<u64, SourceError> {
        let mut total = 0u64;
        let mut readable = 0;
        for path in &self.counters {
            let Ok(raw) = std::fs::read_to_string(path) else {
                continue;
            };
            let Ok(bytes) = raw.trim().parse::<u64>() else {
                continue;
            };
            total = total.saturating_add(bytes);
            readable += 1;
        }
        if readable == 0 {
            return Err(SourceError::Unavailable);
        }
        Ok(total)
    }
}

impl CounterSource for MbmSource {
    fn columns(&self) -> Vec<String> {
        vec!["Memory Throughput (MB/s)".to_string()]
    }

    fn start(&mut self) -> Result<(), SourceError> {
        let mon_data = self
            .config
            .root
            .join("mon_groups")
            .join(&self.config.group)
            .join("mon_data");
        let entries = std::fs::read_dir(&mon_data).map_err(|_| {
            SourceError::Setup(format!("MBM path missing: {}", mon_data.display()))
        })?;

        self.counters.clear();
        for entry in entries.flatten() {
            let counter = entry.path().join("mbm_total_bytes");
            if counter.is_file() {
                self.counters.push(counter);
            }
        }
        self.counters.sort();
        if self.counters.is_empty() {
            return Err(SourceError::Setup(format!(
                "no mbm_total_bytes files under {}",
                mon_data.display()
            )));
        }

        self.previous = self.read_total()?;
        self.last_read = Some(Instant::now());
        Ok(())
    }

    fn next_interval(&mut self) -> Result<Vec<f64>, SourceError> {
        let last = self.last_read.unwrap_or_else(Instant::now);
        let since = last.elapsed();
        if since < self.config.interval {
            std::thread::sleep(self.config.interval - since);
        }

        let now = Instant::now();
        let current = self.read_total()?;
        let dt = now.duration_since(last).as_secs_f64().max(1e-6);
        let delta = current.saturating_sub(self.previous);

        self.previous = current;
        self.last_read = Some(now);
        Ok(vec![delta as f64 / BYTES_PER_MB / dt])
    }

    fn stop(&mut self) {
        // file-backed; no subprocess to tear down
    }
}
