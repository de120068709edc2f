//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;

/// Compile an authored procedure
#[derive(Debug, Args, Clone)]
pub struct CompileCommand {
    /// Path to the authored procedure YAML file
    #[arg(short, long)]
    pub file: String,

    /// Base name for the saved artifacts (defaults to the procedure name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Extra built-in stages to append (NAME=ORDER)
    #[arg(long, value_parser = parse_stage)]
    pub stage: Vec<(String, u32)>,

    /// Print the compiled configuration as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate an authored procedure
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the authored procedure YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Run a compiled experiment
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Base name of the compiled experiment
    #[arg(short, long)]
    pub experiment: String,

    /// Data overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Device address overrides (DEVICE=ADDRESS)
    #[arg(long, value_parser = parse_key_value)]
    pub address: Vec<(String, String)>,

    /// How stages sharing an order value are dispatched
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Use simulated instruments instead of real ones
    #[arg(long)]
    pub simulate: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Write the final data map next to the run manifest
    #[arg(long)]
    pub save_data: bool,
}

/// List drivers and operations
#[derive(Debug, Args, Clone)]
pub struct DescribeCommand {
    /// Only this driver type
    pub driver: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Experiment name to filter by
    #[arg(short, long)]
    pub experiment: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show one run in detail
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// Parse NAME=ORDER stage arguments
pub fn parse_stage(s: &str) -> Result<(String, u32), String> {
    let (name, order) = parse_key_value(s)?;
    let order = order
        .parse()
        .map_err(|_| format!("Invalid stage order in {}", s))?;
    Ok((name, order))
}
