//! Package power via a one-shot privileged readout each interval
//!
//! Instead of a streaming utility, this source invokes the SMI tool once per
//! interval and parses the two socket power values out of its pipe-delimited
//! table. It also keeps a running energy integral for the average-energy
//! output mode.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agent::{AgentProcess, Launcher, OutputStream};
use crate::source::{CounterSource, SourceError};

/// Table line carrying the per-socket package power.
const POWER_LABEL: &str = "Power (Watts)";

/// How long one readout invocation may take before it is abandoned.
const READOUT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared accumulator for the `power x interval` energy integral.
///
/// Cloned into the source before it moves to its sampler thread, so the
/// total stays reachable after the run.
#[derive(Debug, Clone, Default)]
pub struct EnergyMeter {
    joules: Arc<Mutex<f64>>,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, joules: f64) {
        if let Ok(mut total) = self.joules.lock() {
            *total += joules;
        }
    }

    /// Total accumulated energy in joules.
    pub fn total(&self) -> f64 {
        self.joules.lock().map(|total| *total).unwrap_or(0.0)
    }
}

/// Extract the two socket power values from one readout's output lines.
///
/// The wrapped tool prints a pipe-delimited table; the line containing the
/// power label carries the socket values in its third and fourth fields.
pub(crate) fn parse_socket_power(lines: &[String]) -> Option<(f64, f64)> {
    for line in lines {
        if !line.contains(POWER_LABEL) {
            continue;
        }
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 4 {
            continue;
        }
        let socket0 = parts[2].trim().parse::<f64>().ok()?;
        let socket1 = parts[3].trim().parse::<f64>().ok()?;
        return Some((socket0, socket1));
    }
    None
}

#[derive(Debug, Clone)]
pub struct SocketPowerConfig {
    /// Readout command; first element is the program.
    pub command: Vec<String>,
    /// Wall-clock spacing between readouts.
    pub interval: Duration,
}

impl Default for SocketPowerConfig {
    fn default() -> Self {
        Self {
            command: vec!["e_smi_tool".to_string(), "--showsockpower".to_string()],
            interval: Duration::from_millis(200),
        }
    }
}

/// One-shot power readout source, sampled by invocation rather than by
/// stream parsing.
pub struct SocketPowerSource {
    config: SocketPowerConfig,
    launcher: Launcher,
    meter: EnergyMeter,
}

impl SocketPowerSource {
    pub fn new(config: SocketPowerConfig, launcher: Launcher, meter: EnergyMeter) -> Self {
        Self {
            config,
            launcher,
            meter,
        }
    }

    /// Run the readout command once and collect its stdout lines.
    fn read_once(&self) -> Result<Vec<String>, SourceError> {
        let program = self
            .config
            .command
            .first()
            .ok_or_else(|| SourceError::Setup("empty readout command".to_string()))?;
        let mut cmd = self.launcher.command(program);
        cmd.args(&self.config.command[1..]);

        let mut agent = AgentProcess::spawn(cmd, OutputStream::Stdout)?;
        let mut lines = Vec::new();
        loop {
            match agent.next_line(READOUT_TIMEOUT) {
                Ok(Some(line)) => lines.push(line),
                // EOF: the one-shot tool is done
                Err(SourceError::Unavailable) => break,
                // wedged readout; keep whatever arrived
                Ok(None) => break,
                Err(err) => {
                    agent.stop(Duration::from_millis(100));
                    return Err(err);
                }
            }
        }
        agent.stop(Duration::from_millis(100));
        Ok(lines)
    }
}

impl CounterSource for SocketPowerSource {
    fn columns(&self) -> Vec<String> {
        vec!["Package Power (W)".to_string()]
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.config.command.is_empty() {
            return Err(SourceError::Setup("empty readout command".to_string()));
        }
        Ok(())
    }

    fn next_interval(&mut self) -> Result<Vec<f64>, SourceError> {
        std::thread::sleep(self.config.interval);

        let lines = self.read_once()?;
        let total = match parse_socket_power(&lines) {
            Some((socket0, socket1)) => socket0 + socket1,
            None => {
                tracing::warn!("power readout produced no parsable socket values");
                0.0
            }
        };
        self.meter.add(total * self.config.interval.as_secs_f64());
        Ok(vec![total])
    }

    fn stop(&mut self) {
        // nothing persistent to tear down; each readout is one-shot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
---------------------------------------------------------------
| Sensor Name            |    Socket 0     |    Socket 1      |
---------------------------------------------------------------
| Power (Watts)          | 118.502         | 96.216           |
| PowerLimit (Watts)     | 225.000         | 225.000          |
---------------------------------------------------------------";

    fn table_lines() -> Vec<String> {
        TABLE.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_socket_power_from_table() {
        let (socket0, socket1) = parse_socket_power(&table_lines()).unwrap();
        assert_eq!(socket0, 118.502);
        assert_eq!(socket1, 96.216);
    }

    #[test]
    fn test_parse_socket_power_needs_the_label_line() {
        let lines = vec!["| PowerLimit (Watts) | 225.0 | 225.0 |".to_string()];
        assert_eq!(parse_socket_power(&lines), None);
    }

    #[test]
    fn test_parse_socket_power_short_line() {
        let lines = vec!["Power (Watts) 118.5".to_string()];
        assert_eq!(parse_socket_power(&lines), None);
    }

    #[test]
    fn test_readout_sums_sockets_and_integrates_energy() {
        let meter = EnergyMeter::new();
        let mut source = SocketPowerSource::new(
            SocketPowerConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "printf '| Power (Watts) | 100.0 | 50.0 |\\n'".to_string(),
                ],
                interval: Duration::from_millis(100),
            },
            Launcher::new(false),
            meter.clone(),
        );

        source.start().unwrap();
        let values = source.next_interval().unwrap();
        assert_eq!(values, vec![150.0]);
        // 150 W over 0.1 s
        assert!((meter.total() - 15.0).abs() < 1e-9);

        let _ = source.next_interval().unwrap();
        assert!((meter.total() - 30.0).abs() < 1e-9);
        source.stop();
    }

    #[test]
    fn test_unparsable_readout_degrades_to_zero() {
        let meter = EnergyMeter::new();
        let mut source = SocketPowerSource::new(
            SocketPowerConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "printf 'no power table today\\n'".to_string(),
                ],
                interval: Duration::from_millis(50),
            },
            Launcher::new(false),
            meter.clone(),
        );

        source.start().unwrap();
        let values = source.next_interval().unwrap();
        assert_eq!(values, vec![0.0]);
        assert_eq!(meter.total(), 0.0);
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let mut source = SocketPowerSource::new(
            SocketPowerConfig {
                command: vec!["/nonexistent/e_smi_tool".to_string()],
                interval: Duration::from_millis(50),
            },
            Launcher::new(false),
            EnergyMeter::new(),
        );

        source.start().unwrap();
        assert!(matches!(
            source.next_interval(),
            Err(SourceError::Spawn { .. })
        ));
    }
}
