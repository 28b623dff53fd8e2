use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "clusternb - evaluate cluster-pair nonbonded forces and energies on water boxes.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of worker threads, for both the thread pool and the
    /// per-thread pairlists. Defaults to the number of logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate nonbonded forces and energies of a water box.
    Evaluate(EvaluateArgs),
    /// List the kernel layouts and the physics variants they support.
    Kernels,
}

/// Electrostatics choices exposed on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoulombArg {
    Cutoff,
    ReactionField,
    Ewald,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Args, Debug, Default)]
pub struct EvaluateArgs {
    /// Path to a run configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of water molecules in the box.
    #[arg(short, long, value_name = "INT")]
    pub waters: Option<usize>,

    /// Kernel layout: plain-4x4, simd-4xm or simd-2xmm.
    #[arg(short, long, value_name = "NAME")]
    pub kernel: Option<String>,

    /// Electrostatics treatment.
    #[arg(long, value_enum, value_name = "NAME")]
    pub coulomb: Option<CoulombArg>,

    /// Number of energy groups the atoms are spread over.
    #[arg(short = 'g', long, value_name = "INT")]
    pub energy_groups: Option<usize>,

    /// Number of repeated evaluations.
    #[arg(short = 'n', long, value_name = "INT")]
    pub steps: Option<u64>,

    /// Write per-atom forces of the last step to a CSV file.
    #[arg(short = 'o', long, value_name = "PATH")]
    pub forces_out: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file and
    /// the flags above. Can be used multiple times.
    /// Example: -S interactions.rcoulomb=1.0
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
