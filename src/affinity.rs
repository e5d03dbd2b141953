//! CPU confinement for workload and sampler processes
//!
//! Isolation is enforced at launch time: children get their affinity mask
//! set between fork and exec, sampler threads pin themselves before starting
//! their adapters (adapter subprocesses inherit the mask).

use std::collections::BTreeSet;
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{Context, Result};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// Build a `CpuSet` mask from logical CPU ids.
pub fn cpu_mask(cpus: &BTreeSet<usize>) -> Result<CpuSet> {
    let mut set = CpuSet::new();
    for &cpu in cpus {
        set.set(cpu)
            .with_context(|| format!("CPU {cpu} does not fit in the affinity mask"))?;
    }
    Ok(set)
}

/// Pin the calling thread to `cpus`.
pub fn pin_current_thread(cpus: &BTreeSet<usize>) -> Result<()> {
    let mask = cpu_mask(cpus)?;
    sched_setaffinity(Pid::from_raw(0), &mask)
        .with_context(|| format!("failed to pin thread to CPUs {cpus:?}"))?;
    Ok(())
}

/// Restrict `command` to `cpus` before it execs.
pub fn confine(command: &mut Command, cpus: &BTreeSet<usize>) -> Result<()> {
    let mask = cpu_mask(cpus)?;
    unsafe {
        command.pre_exec(move || {
            sched_setaffinity(Pid::from_raw(0), &mask)
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
        });
    }
    Ok(())
}
