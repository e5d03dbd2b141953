//! CLI argument parsing for Vatio

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vatio")]
#[command(version)]
#[command(about = "Sample hardware telemetry for the lifetime of a workload", long_about = None)]
pub struct Cli {
    /// Directory receiving the per-metric CSV files
    #[arg(short = 'o', long = "output-dir", default_value = "data")]
    pub output_dir: PathBuf,

    /// Package power sampling interval in seconds
    #[arg(long = "power-interval", value_name = "SECS", default_value = "0.2")]
    pub power_interval: f64,

    /// Memory bandwidth sampling interval in seconds
    #[arg(long = "mem-interval", value_name = "SECS", default_value = "1.0")]
    pub mem_interval: f64,

    /// Instruction/LLC-miss sampling interval in seconds
    #[arg(long = "counter-interval", value_name = "SECS", default_value = "0.5")]
    pub counter_interval: f64,

    /// Number of uncore IMC units to monitor
    #[arg(long = "imc-units", value_name = "N", default_value = "8")]
    pub imc_units: usize,

    /// Physical core excluded from everything (left to OS helpers)
    #[arg(long = "helper-core", value_name = "CORE", default_value = "0")]
    pub helper_core: usize,

    /// Physical core reserved for the power sampler
    #[arg(long = "power-core", value_name = "CORE", default_value = "1")]
    pub power_core: usize,

    /// Physical core whose two hardware threads host the memory and
    /// counter samplers
    #[arg(long = "split-core", value_name = "CORE", default_value = "2")]
    pub split_core: usize,

    /// Socket power readout tool
    #[arg(long = "power-tool", value_name = "PATH", default_value = "e_smi_tool")]
    pub power_tool: String,

    /// Run counter utilities directly instead of through sudo
    #[arg(long = "no-elevate")]
    pub no_elevate: bool,

    /// Append one total-energy record instead of the power time series
    #[arg(long = "avg-energy")]
    pub avg_energy: bool,

    /// Read memory bandwidth from resctrl MBM counters instead of perf IMC
    /// events
    #[arg(long = "mbm")]
    pub mbm: bool,

    /// resctrl monitor group used with --mbm
    #[arg(long = "mbm-group", value_name = "GROUP", default_value = "g1")]
    pub mbm_group: String,

    /// Write a JSON digest of the run to this path
    #[arg(long = "summary-json", value_name = "PATH")]
    pub summary_json: Option<PathBuf>,

    /// Enable debug tracing to stderr
    #[arg(long)]
    pub debug: bool,

    /// Workload command to run and sample (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}
