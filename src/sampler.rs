//! Lifetime-bound sampling loop
//!
//! A sampler runs for exactly as long as the target process stays alive.
//! The target's exit is the only cancellation signal; the sampler never
//! signals the target, it only observes liveness.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::series::SampleSequence;
use crate::source::{CounterSource, SourceError};

/// Pause between loop iterations, matching the adapter's own pacing without
/// spinning.
const LOOP_PAUSE: Duration = Duration::from_millis(10);

/// The workload's pid plus a liveness probe.
///
/// Shared read-only by every sampler. The probe sends the null signal:
/// permission denied still proves the process exists.
#[derive(Debug, Clone, Copy)]
pub struct TargetProcessHandle {
    pid: Pid,
}

impl TargetProcessHandle {
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn is_alive(&self) -> bool {
        match kill(self.pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Supervision state for one sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopping,
}

/// Sample `source` once per interval while `target` is alive. Cadence is
/// owned by the adapter (streaming tools self-pace, one-shot readers sleep),
/// and every adapter pull bounds its own blocking, so a stuck source cannot
/// keep the loop from seeing the target exit.
///
/// Returns whatever was collected; a source failure ends this sampler only.
/// The adapter is started after the first liveness check, so a target that
/// is already dead never spawns a counter subprocess, and it is stopped
/// through exactly one cleanup path.
pub fn run(
    target: TargetProcessHandle,
    mut source: Box<dyn CounterSource>,
    label: &str,
) -> SampleSequence {
    let mut sequence = SampleSequence::new(label, source.columns());

    if !target.is_alive() {
        tracing::debug!(label, pid = target.pid(), "target already dead, not sampling");
        return sequence;
    }

    if let Err(err) = source.start() {
        tracing::warn!(label, %err, "counter source failed to start");
        return sequence;
    }

    let started = Instant::now();
    let mut phase = Phase::Running;
    while phase == Phase::Running {
        if !target.is_alive() {
            phase = Phase::Stopping;
            break;
        }

        let elapsed = started.elapsed().as_secs_f64();
        match source.next_interval() {
            Ok(values) => sequence.push(elapsed, values),
            Err(SourceError::Unavailable) => {
                tracing::warn!(label, "counter source went away, keeping partial series");
                phase = Phase::Stopping;
            }
            Err(err) => {
                tracing::warn!(label, %err, "counter source failed, keeping partial series");
                phase = Phase::Stopping;
            }
        }

        if phase == Phase::Running {
            std::thread::sleep(LOOP_PAUSE);
        }
    }

    source.stop();
    tracing::debug!(label, samples = sequence.len(), "sampler finished");
    sequence
}
