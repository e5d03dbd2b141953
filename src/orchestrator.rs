//! Orchestration of one workload run and its sampling agents
//!
//! Launches the workload confined to the workload CPU set, runs one sampler
//! thread per counter source on its reserved CPUs, waits for workload exit
//! and hands the collected sequences back. Samplers share nothing mutable;
//! the only common state is the read-only target handle.

use std::collections::BTreeSet;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use anyhow::{Context, Result};

use crate::affinity;
use crate::sampler::{self, TargetProcessHandle};
use crate::series::SampleSequence;
use crate::source::CounterSource;
use crate::topology::CpuSetAssignment;

/// One counter source scheduled for a run, with the CPUs its sampler thread
/// (and any subprocess it spawns) is confined to.
pub struct SourceSpec {
    pub label: String,
    pub cpus: BTreeSet<usize>,
    pub source: Box<dyn CounterSource>,
}

/// Everything one orchestrated run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// One sequence per source spec, in spec order.
    pub sequences: Vec<SampleSequence>,
    /// Workload exit code; signal exits map to `128 + signo`.
    pub exit_code: i32,
}

/// Run `command` under the workload CPU set and sample it until it exits.
///
/// The command string is opaque and goes through `sh -c`, so suite wrappers
/// can pass pipelines or environment prefixes unchanged. The workload is
/// never launched with elevated rights; only counter adapters carry that
/// capability.
pub fn run_one(
    command: &str,
    assignment: &CpuSetAssignment,
    specs: Vec<SourceSpec>,
) -> Result<RunOutcome> {
    let mut workload = Command::new("sh");
    workload.arg("-c").arg(command);
    affinity::confine(&mut workload, &assignment.workload)?;

    let mut child = workload
        .spawn()
        .with_context(|| format!("failed to launch workload `{command}`"))?;
    let target = TargetProcessHandle::new(child.id() as i32);
    tracing::info!(
        pid = target.pid(),
        cpus = ?assignment.workload,
        "workload launched"
    );

    let mut threads = Vec::with_capacity(specs.len());
    for spec in specs {
        let thread = std::thread::Builder::new()
            .name(format!("sampler-{}", spec.label))
            .spawn(move || {
                if let Err(err) = affinity::pin_current_thread(&spec.cpus) {
                    tracing::warn!(label = %spec.label, %err, "sampler not pinned");
                }
                sampler::run(target, spec.source, &spec.label)
            })
            .with_context(|| "failed to spawn sampler thread")?;
        threads.push(thread);
    }

    let status = child.wait().context("failed to wait for workload")?;
    let exit_code = status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
    tracing::info!(exit_code, "workload exited, waiting for samplers");

    let mut sequences = Vec::with_capacity(threads.len());
    for thread in threads {
        match thread.join() {
            Ok(sequence) => sequences.push(sequence),
            Err(_) => tracing::warn!("a sampler thread panicked; its series is lost"),
        }
    }

    Ok(RunOutcome {
        sequences,
        exit_code,
    })
}
