//! Memory-controller bandwidth via `perf stat` uncore IMC counters
//!
//! `perf stat -I <ms>` reports once per interval, one line per monitored
//! event, on stderr. The adapter folds one interval's worth of CAS read and
//! write counts (across every IMC unit) into a single MB value.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::agent::{AgentProcess, Launcher, OutputStream};
use crate::source::{CounterSource, SourceError};

/// perf reports MiB; downstream consumers expect MB.
const MIB_TO_MB: f64 = 1.04858;

/// Extra wait beyond the reporting interval before an interval block is
/// considered over.
const INTERVAL_SLACK: Duration = Duration::from_millis(500);

fn cas_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([\d.]+)\s+MiB\s+uncore_imc_\d+/cas_count_(read|write)/")
            .expect("literal pattern compiles")
    })
}

/// One parsed CAS count line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CasLine {
    Read(f64),
    Write(f64),
}

/// Match one perf output line against the IMC event format.
///
/// Anything else (headers, `<not counted>` markers, partial writes) is
/// dropped without breaking interval alignment.
pub(crate) fn parse_cas_line(line: &str) -> Option<CasLine> {
    let caps = cas_pattern().captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    match caps.get(2)?.as_str() {
        "read" => Some(CasLine::Read(value)),
        "write" => Some(CasLine::Write(value)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ImcConfig {
    /// Number of `uncore_imc_<i>` units on the package.
    pub units: usize,
    /// Reporting interval handed to `perf stat -I`.
    pub interval: Duration,
    /// perf executable name.
    pub perf: String,
}

impl Default for ImcConfig {
    fn default() -> Self {
        Self {
            units: 8,
            interval: Duration::from_secs(1),
            perf: "perf".to_string(),
        }
    }
}

/// Block-parsing adapter around `perf stat` IMC throughput counting.
pub struct ImcBandwidthSource {
    config: ImcConfig,
    launcher: Launcher,
    agent: Option<AgentProcess>,
}

impl ImcBandwidthSource {
    pub fn new(config: ImcConfig, launcher: Launcher) -> Self {
        Self {
            config,
            launcher,
            agent: None,
        }
    }

    fn events(&self) -> Vec<String> {
        let mut events = Vec::with_capacity(self.config.units * 2);
        for i in 0..self.config.units {
            events.push(format!("uncore_imc_{i}/cas_count_read/"));
            events.push(format!("uncore_imc_{i}/cas_count_write/"));
        }
        events
    }
}

impl CounterSource for ImcBandwidthSource {
    fn columns(&self) -> Vec<String> {
        vec!["Memory Throughput (MB)".to_string()]
    }

    fn start(&mut self) -> Result<(), SourceError> {
        let mut cmd = self.launcher.command(&self.config.perf);
        cmd.arg("stat")
            .arg("-I")
            .arg(self.config.interval.as_millis().to_string());
        for event in self.events() {
            cmd.arg("-e").arg(event);
        }
        self.agent = Some(AgentProcess::spawn(cmd, OutputStream::Stderr)?);
        Ok(())
    }

    fn next_interval(&mut self) -> Result<Vec<f64>, SourceError> {
        let agent = self.agent.as_ref().ok_or(SourceError::Unavailable)?;
        let expected = self.config.units * 2;
        let deadline = Instant::now() + self.config.interval + INTERVAL_SLACK;

        let mut total_mib = 0.0;
        let mut matched = 0;
        while matched < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match agent.next_line(remaining)? {
                Some(line) => match parse_cas_line(&line) {
                    Some(CasLine::Read(mib)) | Some(CasLine::Write(mib)) => {
                        total_mib += mib;
                        matched += 1;
                    }
                    None => continue,
                },
                None => break,
            }
        }

        Ok(vec![total_mib * MIB_TO_MB])
    }

    fn stop(&mut self) {
        if let Some(mut agent) = self.agent.take() {
            agent.stop(Duration::from_secs(1));
        }
    }
}
