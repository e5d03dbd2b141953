//! Sample sequences, positional alignment and CSV/JSON persistence
//!
//! Independently-paced samplers produce sequences of different lengths.
//! Alignment is positional: truncate to the shortest sequence and pair rows
//! by index, never by timestamp. Downstream consumers assume positional
//! correspondence; a resampling scheme would change output semantics.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Writer failures. In-memory sequences stay intact when a write fails, so
/// the caller can retry against another destination.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One interval's values from one source.
#[derive(Debug, Clone, Serialize)]
pub struct CounterSample {
    /// Seconds since the owning sampler started.
    pub elapsed: f64,
    pub values: Vec<f64>,
}

/// The ordered samples one source produced over a run.
#[derive(Debug, Clone, Serialize)]
pub struct SampleSequence {
    pub label: String,
    pub columns: Vec<String>,
    pub samples: Vec<CounterSample>,
}

impl SampleSequence {
    pub fn new(label: &str, columns: Vec<String>) -> Self {
        Self {
            label: label.to_string(),
            columns,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, elapsed: f64, values: Vec<f64>) {
        self.samples.push(CounterSample { elapsed, values });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn open_for_write(path: &Path, append: bool) -> Result<std::fs::File, WriteError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| WriteError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `sequences` as one CSV file, aligned by index.
///
/// Row count is the minimum sequence length; the time column comes from the
/// first sequence. Empty input (or any empty sequence) produces a
/// header-only file.
pub fn write_aligned(path: &Path, sequences: &[&SampleSequence]) -> Result<(), WriteError> {
    let mut file = open_for_write(path, false)?;
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut header = vec!["Time (s)".to_string()];
    for sequence in sequences {
        header.extend(sequence.columns.iter().cloned());
    }
    writeln!(file, "{}", header.join(",")).map_err(io_err)?;

    let rows = sequences.iter().map(|s| s.len()).min().unwrap_or(0);
    for i in 0..rows {
        let mut fields = vec![sequences[0].samples[i].elapsed.to_string()];
        for sequence in sequences {
            fields.extend(sequence.samples[i].values.iter().map(f64::to_string));
        }
        writeln!(file, "{}", fields.join(",")).map_err(io_err)?;
    }
    Ok(())
}

/// Append one accumulated-energy record, adding the header on first write.
pub fn append_energy(path: &Path, joules: f64) -> Result<(), WriteError> {
    let mut file = open_for_write(path, true)?;
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
    if empty {
        writeln!(file, "CPU_E (J)").map_err(io_err)?;
    }
    writeln!(file, "{joules:.2}").map_err(io_err)?;
    Ok(())
}

/// Machine-readable digest of one orchestrated run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub command: String,
    pub exit_code: i32,
    pub sources: Vec<SourceSummary>,
}

#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub label: String,
    pub columns: Vec<String>,
    pub samples: usize,
}

impl RunSummary {
    pub fn new(command: &str, exit_code: i32, sequences: &[SampleSequence]) -> Self {
        Self {
            command: command.to_string(),
            exit_code,
            sources: sequences
                .iter()
                .map(|sequence| SourceSummary {
                    label: sequence.label.clone(),
                    columns: sequence.columns.clone(),
                    samples: sequence.len(),
                })
                .collect(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<(), WriteError> {
        let mut file = open_for_write(path, false)?;
        let json = serde_json::to_string_pretty(self).map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })?;
        writeln!(file, "{json}").map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
