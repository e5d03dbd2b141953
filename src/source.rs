//! Counter source capability shared by all adapters

use thiserror::Error;

/// Errors a counter source can surface to its sampler.
///
/// Malformed output lines are never errors: adapters drop them and keep the
/// interval cadence. Only losing the source entirely is reported.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The counter subprocess exited or closed its output stream.
    #[error("counter subprocess exited or its output stream closed")]
    Unavailable,

    /// The counter utility could not be launched at all.
    #[error("failed to launch counter utility `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The source's backing files or arguments are unusable.
    #[error("counter source setup failed: {0}")]
    Setup(String),
}

/// One hardware/OS counter source, sampled once per interval.
///
/// Implementations own at most one external subprocess and are the only
/// entity allowed to read its output or signal it. `next_interval` must
/// bound its own blocking so a wedged utility cannot stall liveness checks.
pub trait CounterSource: Send {
    /// Column names for the values emitted each interval.
    fn columns(&self) -> Vec<String>;

    /// Launch the backing utility or open backing files.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Block (bounded) until the next interval's values are available.
    fn next_interval(&mut self) -> Result<Vec<f64>, SourceError>;

    /// Tear down the backing utility. Called exactly once, after the last
    /// `next_interval`.
    fn stop(&mut self);
}
