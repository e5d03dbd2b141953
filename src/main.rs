use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vatio::agent::Launcher;
use vatio::cli::Cli;
use vatio::counters::{PerfEventConfig, PerfStatSource};
use vatio::imc::{ImcBandwidthSource, ImcConfig};
use vatio::orchestrator::{self, SourceSpec};
use vatio::power::{EnergyMeter, SocketPowerConfig, SocketPowerSource};
use vatio::resctrl::{MbmConfig, MbmSource};
use vatio::series::{self, RunSummary};
use vatio::topology::{CpuTopology, ReservationPlan};

const POWER_LABEL: &str = "power";
const MEMORY_LABEL: &str = "memory";
const COUNTERS_LABEL: &str = "counters";

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let command = match &args.command {
        Some(parts) if !parts.is_empty() => parts.join(" "),
        _ => {
            anyhow::bail!(
                "Must specify a workload command. Usage: vatio [OPTIONS] -- COMMAND [ARGS...]"
            );
        }
    };

    let plan = ReservationPlan {
        helper_core: args.helper_core,
        power_core: args.power_core,
        split_core: args.split_core,
    };
    // fatal before anything is launched
    let topology = CpuTopology::detect()?;
    let assignment = topology.partition(&plan)?;
    tracing::info!(
        workload = ?assignment.workload,
        power = ?assignment.power,
        memory = assignment.memory,
        counters = assignment.counters,
        "CPU sets assigned"
    );

    let launcher = Launcher::new(!args.no_elevate);
    let meter = EnergyMeter::new();

    let power_source = SocketPowerSource::new(
        SocketPowerConfig {
            command: vec![args.power_tool.clone(), "--showsockpower".to_string()],
            interval: Duration::from_secs_f64(args.power_interval),
        },
        launcher.clone(),
        meter.clone(),
    );

    let memory_source: Box<dyn vatio::source::CounterSource> = if args.mbm {
        Box::new(MbmSource::new(MbmConfig {
            group: args.mbm_group.clone(),
            interval: Duration::from_secs_f64(args.mem_interval),
            ..MbmConfig::default()
        }))
    } else {
        Box::new(ImcBandwidthSource::new(
            ImcConfig {
                units: args.imc_units,
                interval: Duration::from_secs_f64(args.mem_interval),
                ..ImcConfig::default()
            },
            launcher.clone(),
        ))
    };

    let counter_source = PerfStatSource::new(
        PerfEventConfig {
            interval: Duration::from_secs_f64(args.counter_interval),
            ..PerfEventConfig::default()
        },
        launcher,
    );

    let specs = vec![
        SourceSpec {
            label: POWER_LABEL.to_string(),
            cpus: assignment.power.clone(),
            source: Box::new(power_source),
        },
        SourceSpec {
            label: MEMORY_LABEL.to_string(),
            cpus: [assignment.memory].into_iter().collect(),
            source: memory_source,
        },
        SourceSpec {
            label: COUNTERS_LABEL.to_string(),
            cpus: [assignment.counters].into_iter().collect(),
            source: Box::new(counter_source),
        },
    ];

    let outcome = orchestrator::run_one(&command, &assignment, specs)?;

    for sequence in &outcome.sequences {
        let written = match sequence.label.as_str() {
            POWER_LABEL if args.avg_energy => {
                let path = args.output_dir.join("cpu_power.csv");
                series::append_energy(&path, meter.total()).map(|()| path)
            }
            POWER_LABEL => {
                let path = args.output_dir.join("cpu_power.csv");
                series::write_aligned(&path, &[sequence]).map(|()| path)
            }
            MEMORY_LABEL => {
                let path = args.output_dir.join("cpu_mem.csv");
                series::write_aligned(&path, &[sequence]).map(|()| path)
            }
            COUNTERS_LABEL => {
                let path = args.output_dir.join("cpu_ips.csv");
                series::write_aligned(&path, &[sequence]).map(|()| path)
            }
            other => {
                tracing::warn!(label = other, "unexpected sequence label, skipping");
                continue;
            }
        }?;
        tracing::info!(path = %written.display(), samples = sequence.len(), "series written");
    }

    if let Some(path) = &args.summary_json {
        RunSummary::new(&command, outcome.exit_code, &outcome.sequences).write_json(path)?;
    }

    // Exit with the workload's exit code
    std::process::exit(outcome.exit_code);
}
