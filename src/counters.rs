//! Instruction and cache-miss rates via `perf stat` CSV interval mode
//!
//! With `-x , -I <ms>` perf emits comma-separated rows on stderr:
//! `time,value,unit,event,run,cpus`. The adapter matches rows by the event
//! name field, collects one value per tracked event per interval, and
//! converts counts to per-second rates.

use std::time::{Duration, Instant};

use crate::agent::{AgentProcess, Launcher, OutputStream};
use crate::source::{CounterSource, SourceError};

const INTERVAL_SLACK: Duration = Duration::from_millis(500);

/// One perf event to track, with the output column it maps to.
#[derive(Debug, Clone)]
pub struct TrackedEvent {
    pub event: String,
    pub column: String,
}

impl TrackedEvent {
    pub fn new(event: &str, column: &str) -> Self {
        Self {
            event: event.to_string(),
            column: column.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerfEventConfig {
    pub tracked: Vec<TrackedEvent>,
    /// Reporting interval handed to `perf stat -I`.
    pub interval: Duration,
    /// perf executable name.
    pub perf: String,
}

impl Default for PerfEventConfig {
    fn default() -> Self {
        Self {
            tracked: vec![
                TrackedEvent::new("instructions", "IPS"),
                TrackedEvent::new("LLC-misses", "LLC Misses"),
            ],
            interval: Duration::from_millis(500),
            perf: "perf".to_string(),
        }
    }
}

/// Parse one `perf stat -x ,` row into `(event, value)`.
///
/// Comment rows and rows with too few fields are dropped. A value that does
/// not parse (`<not counted>`) counts as zero, matching the wrapped tool's
/// long-standing quirk of still printing the row.
pub(crate) fn parse_event_row(line: &str) -> Option<(String, f64)> {
    let parts: Vec<&str> = line.trim().split(',').collect();
    if parts.len() < 4 || parts[0].starts_with('#') {
        return None;
    }
    let value = parts[1].replace(' ', "").parse::<f64>().unwrap_or(0.0);
    Some((parts[3].to_string(), value))
}

/// Tagged-field adapter around a single system-wide `perf stat` stream.
pub struct PerfStatSource {
    config: PerfEventConfig,
    launcher: Launcher,
    agent: Option<AgentProcess>,
}

impl PerfStatSource {
    pub fn new(config: PerfEventConfig, launcher: Launcher) -> Self {
        Self {
            config,
            launcher,
            agent: None,
        }
    }
}

impl CounterSource for PerfStatSource {
    fn columns(&self) -> Vec<String> {
        self.config
            .tracked
            .iter()
            .map(|t| t.column.clone())
            .collect()
    }

    fn start(&mut self) -> Result<(), SourceError> {
        let mut cmd = self.launcher.command(&self.config.perf);
        cmd.arg("stat")
            .arg("-I")
            .arg(self.config.interval.as_millis().to_string())
            .arg("-x")
            .arg(",")
            .arg("-a");
        for tracked in &self.config.tracked {
            cmd.arg("-e").arg(&tracked.event);
        }
        // counting is system-wide; perf still wants a command to pace it
        cmd.arg("sleep").arg("infinity");
        self.agent = Some(AgentProcess::spawn(cmd, OutputStream::Stderr)?);
        Ok(())
    }

    fn next_interval(&mut self) -> Result<Vec<f64>, SourceError> {
        let agent = self.agent.as_ref().ok_or(SourceError::Unavailable)?;
        let deadline = Instant::now() + self.config.interval + INTERVAL_SLACK;
        let interval_secs = self.config.interval.as_secs_f64();

        let mut counts: Vec<Option<f64>> = vec![None; self.config.tracked.len()];
        let mut got = 0;
        while got < self.config.tracked.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match agent.next_line(remaining)? {
                Some(line) => {
                    let Some((event, value)) = parse_event_row(&line) else {
                        continue;
                    };
                    for (slot, tracked) in counts.iter_mut().zip(&self.config.tracked) {
                        if slot.is_none() && tracked.event == event {
                            *slot = Some(value);
                            got += 1;
                            break;
                        }
                    }
                }
                None => break,
            }
        }

        Ok(counts
            .into_iter()
            .map(|count| count.unwrap_or(0.0) / interval_secs)
            .collect())
    }

    fn stop(&mut self) {
        if let Some(mut agent) = self.agent.take() {
            agent.stop(Duration::from_secs(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn fake_perf(lines: &str) -> AgentProcess {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("printf '{lines}' >&2"));
        AgentProcess::spawn(cmd, OutputStream::Stderr).unwrap()
    }

    fn half_second_source(lines: &str) -> PerfStatSource {
        let mut source = PerfStatSource::new(
            PerfEventConfig {
                interval: Duration::from_millis(500),
                ..PerfEventConfig::default()
            },
            Launcher::new(false),
        );
        source.agent = Some(fake_perf(lines));
        source
    }

    #[test]
    fn test_parse_event_row() {
        let row = parse_event_row("1.000123,2000000,,instructions,500000,100.00");
        assert_eq!(row, Some(("instructions".to_string(), 2000000.0)));
    }

    #[test]
    fn test_parse_event_row_drops_comments_and_short_rows() {
        assert_eq!(parse_event_row("# time,counts,unit,events"), None);
        assert_eq!(parse_event_row("1.0,42"), None);
    }

    #[test]
    fn test_parse_event_row_unparsable_value_is_zero() {
        let row = parse_event_row("1.0,<not counted>,,LLC-misses,0,0.0");
        assert_eq!(row, Some(("LLC-misses".to_string(), 0.0)));
    }

    #[test]
    fn test_counts_become_rates() {
        let mut source = half_second_source(
            "1.0,2000000,,instructions,1,100.0\\n1.0,500,,LLC-misses,1,100.0\\n",
        );
        let values = source.next_interval().unwrap();
        assert_eq!(values, vec![4_000_000.0, 1000.0]);
        source.stop();
    }

    #[test]
    fn test_event_order_is_stable_regardless_of_row_order() {
        let mut source = half_second_source(
            "1.0,500,,LLC-misses,1,100.0\\n1.0,2000000,,instructions,1,100.0\\n",
        );
        let values = source.next_interval().unwrap();
        // columns stay [IPS, LLC Misses] even when perf reorders rows
        assert_eq!(values, vec![4_000_000.0, 1000.0]);
        source.stop();
    }

    #[test]
    fn test_missing_event_reads_as_zero_rate() {
        // keep the stream open so the missing event times out instead of
        // reading as a closed pipe
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("printf '1.0,2000000,,instructions,1,100.0\\n' >&2; sleep 3");
        let mut source = PerfStatSource::new(
            PerfEventConfig {
                interval: Duration::from_millis(200),
                ..PerfEventConfig::default()
            },
            Launcher::new(false),
        );
        source.agent = Some(AgentProcess::spawn(cmd, OutputStream::Stderr).unwrap());

        let values = source.next_interval().unwrap();
        assert_eq!(values[0], 10_000_000.0);
        assert_eq!(values[1], 0.0);
        source.stop();
    }

    #[test]
    fn test_columns_follow_tracked_events() {
        let source = PerfStatSource::new(PerfEventConfig::default(), Launcher::new(false));
        assert_eq!(source.columns(), vec!["IPS", "LLC Misses"]);
    }
}
