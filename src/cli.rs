//! CLI argument parsing for the fuzz harness.
//!
//! All behavior is configured by flags; the harness consumes no environment
//! variables of its own. Keeping a single `RootArgs` type makes routing
//! obvious and avoids hidden defaults.
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Checkpoint commit policy applied at the end of each scenario.
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// One `git add -A` + commit per scenario.
    Minimal,
    /// No commits.
    None,
}

/// Root CLI entrypoint for the lifecycle fuzz harness.
#[derive(Parser, Debug)]
#[command(
    name = "epfuzz",
    version,
    about = "Seeded lifecycle fuzz harness for the ep CLI",
    after_help = "Examples:\n  epfuzz --seed 42 --scenarios 5\n  epfuzz --seed 42 --only-scenario 3          # reproduce one scenario\n  epfuzz --analyze .epfuzz/report.json        # re-print a past run's summary\n  epfuzz --dry-run --seed 42                  # print the plan, spawn nothing"
)]
pub struct RootArgs {
    /// RNG seed; the same seed replays the same logical action sequence
    /// (default: current time)
    #[arg(long, value_name = "INT")]
    pub seed: Option<u32>,

    /// Number of scenarios to run
    #[arg(long, value_name = "INT", default_value_t = 10)]
    pub scenarios: usize,

    /// Run exactly one 0-based scenario for reproduction (disables the
    /// coverage gate)
    #[arg(long, value_name = "INT")]
    pub only_scenario: Option<usize>,

    /// Overall wall-clock budget in minutes, checked between scenarios
    #[arg(long, value_name = "INT", default_value_t = 14)]
    pub budget_minutes: u64,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "INT", default_value_t = 90)]
    pub scenario_timeout_seconds: u64,

    /// Root directory for scenario working trees (default <workspace>/.epfuzz)
    #[arg(long, value_name = "PATH")]
    pub root_dir: Option<PathBuf>,

    /// Disk budget in MiB; dependency-install artifacts are excluded from
    /// the measured total
    #[arg(long, value_name = "INT", default_value_t = 1024)]
    pub disk_budget_mb: u64,

    /// Checkpoint commit policy
    #[arg(long, value_enum, default_value = "minimal")]
    pub commits: CommitMode,

    /// Keep only the newest N scenario directories, pruning between
    /// scenarios
    #[arg(long, value_name = "INT")]
    pub keep_last_n: Option<usize>,

    /// Mirror child output live and print a command transcript
    #[arg(long)]
    pub verbose: bool,

    /// Print the seed-derived plan without spawning anything
    #[arg(long)]
    pub dry_run: bool,

    /// Path to the ep binary under test (default: PATH, then
    /// <workspace>/bin/ep)
    #[arg(long, value_name = "PATH")]
    pub ep_bin: Option<PathBuf>,

    /// Path to the project-scaffolding generator (default: ep-scaffold)
    #[arg(long, value_name = "PATH")]
    pub scaffold_bin: Option<PathBuf>,

    /// Path to the package-script runner (default: npm)
    #[arg(long, value_name = "PATH")]
    pub runner_bin: Option<PathBuf>,

    /// Report output path (default <root-dir>/report.json)
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Load an existing report and print its summary without running
    #[arg(long, value_name = "PATH", conflicts_with = "dry_run")]
    pub analyze: Option<PathBuf>,
}
