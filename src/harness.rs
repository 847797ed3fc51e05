//! Run loop: sequential scenarios, budgets, pruning, and the coverage gate.
//!
//! Scenarios execute strictly one at a time. Parallelism would not break
//! determinism (each scenario's RNG is independently derived) but is
//! avoided to keep disk and process usage bounded and predictable.
use crate::cli::{CommitMode, RootArgs};
use crate::paths::{
    disk_usage_bytes, find_workspace_root, resolve_run_root, scenario_dirs_oldest_first, Toolchain,
};
use crate::report::{ReportBuilder, RunReport};
use crate::scenario::{
    plan_scenario, run_scenario, scenario_dir_rng, scenario_rng, ScenarioOptions,
    MUTATION_STEPS_MAX, MUTATION_STEPS_MIN,
};
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Resolved run configuration, assembled from CLI flags (or directly by
/// tests driving the harness in-process).
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub seed: u32,
    pub scenarios: usize,
    pub only_scenario: Option<usize>,
    pub budget: Duration,
    pub command_timeout: Duration,
    pub root_dir: Option<PathBuf>,
    pub disk_budget_bytes: u64,
    pub commits: CommitMode,
    pub keep_last_n: Option<usize>,
    pub verbose: bool,
    pub dry_run: bool,
    pub ep_bin: Option<PathBuf>,
    pub scaffold_bin: Option<PathBuf>,
    pub runner_bin: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    /// Directory to start workspace-root discovery from (default: cwd).
    pub start_dir: Option<PathBuf>,
}

impl HarnessConfig {
    pub fn from_args(args: &RootArgs) -> Self {
        let seed = args.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(1)
        });
        Self {
            seed,
            scenarios: args.scenarios,
            only_scenario: args.only_scenario,
            budget: Duration::from_secs(args.budget_minutes * 60),
            command_timeout: Duration::from_secs(args.scenario_timeout_seconds),
            root_dir: args.root_dir.clone(),
            disk_budget_bytes: args.disk_budget_mb * 1024 * 1024,
            commits: args.commits,
            keep_last_n: args.keep_last_n,
            verbose: args.verbose,
            dry_run: args.dry_run,
            ep_bin: args.ep_bin.clone(),
            scaffold_bin: args.scaffold_bin.clone(),
            runner_bin: args.runner_bin.clone(),
            report_path: args.report.clone(),
            start_dir: None,
        }
    }

    fn scenario_indices(&self) -> Vec<usize> {
        match self.only_scenario {
            Some(index) => vec![index],
            None => (0..self.scenarios).collect(),
        }
    }
}

/// What a completed (non-dry) run produced.
#[derive(Debug)]
pub struct HarnessOutcome {
    pub report: RunReport,
    pub report_path: PathBuf,
    /// A full run left at least one attempted surface without a single
    /// success; the process must exit non-zero even if every scenario
    /// "succeeded".
    pub coverage_gate_failed: bool,
}

/// Execute a whole run. Returns `None` for `--dry-run`.
///
/// Errors escaping this function are setup failures (no workspace root,
/// broken binary path, unwritable report) — command failures never
/// propagate, they are classified and recorded.
pub fn run_harness(cfg: &HarnessConfig) -> Result<Option<HarnessOutcome>> {
    let start_dir = match &cfg.start_dir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("determine current directory")?,
    };
    let workspace = find_workspace_root(&start_dir)?;
    let run_root = resolve_run_root(cfg.root_dir.as_deref(), &workspace)?;

    if cfg.dry_run {
        print_dry_run_plan(cfg);
        return Ok(None);
    }

    let toolchain = Toolchain::resolve(
        &workspace,
        cfg.ep_bin.as_deref(),
        cfg.scaffold_bin.as_deref(),
        cfg.runner_bin.as_deref(),
    )?;
    tracing::info!(
        seed = cfg.seed,
        ep = %toolchain.ep_bin.display(),
        run_root = %run_root.display(),
        "run start"
    );

    let opts = ScenarioOptions {
        command_timeout: cfg.command_timeout,
        commits: cfg.commits,
        verbose: cfg.verbose,
        disk_budget_bytes: cfg.disk_budget_bytes,
    };

    let started = Instant::now();
    let mut builder = ReportBuilder::new(cfg.seed)?;
    for index in cfg.scenario_indices() {
        // Budget checks happen only between scenarios; a scenario already
        // in progress always runs to completion.
        if started.elapsed() >= cfg.budget {
            tracing::info!(
                completed = builder.scenario_count(),
                "wall-clock budget exhausted; stopping before next scenario"
            );
            break;
        }
        let usage = disk_usage_bytes(&run_root);
        if usage > cfg.disk_budget_bytes {
            tracing::info!(
                usage,
                completed = builder.scenario_count(),
                "disk budget exhausted; stopping before next scenario"
            );
            break;
        }
        run_scenario(index, cfg.seed, &run_root, &toolchain, &opts, &mut builder)?;
        prune_old_scenarios(cfg, &run_root);
    }

    let report = builder.finalize(disk_usage_bytes(&run_root))?;
    let report_path = cfg
        .report_path
        .clone()
        .unwrap_or_else(|| run_root.join("report.json"));
    report.save(&report_path)?;

    // --only-scenario is a debug replay, not a full surface sweep, so the
    // gate is skipped.
    let coverage_gate_failed =
        cfg.only_scenario.is_none() && !report.coverage_gaps().is_empty();

    Ok(Some(HarnessOutcome {
        report,
        report_path,
        coverage_gate_failed,
    }))
}

/// Print the seed-derived plan: per scenario, the template, tool subset,
/// directory-name preview, and mutation step count. Consumes RNG state
/// exactly like the real run so the numbers match.
fn print_dry_run_plan(cfg: &HarnessConfig) {
    println!("dry run: seed={} scenarios={:?}", cfg.seed, cfg.scenario_indices());
    for index in cfg.scenario_indices() {
        let mut rng = scenario_rng(cfg.seed, index);
        let (template, tools) = plan_scenario(&mut rng);
        let steps = rng.random_int_inclusive(MUTATION_STEPS_MIN, MUTATION_STEPS_MAX);
        let suffix = scenario_dir_rng(cfg.seed, index).short_alnum(6);
        let tool_names: Vec<&str> = tools.iter().map(|tool| tool.as_str()).collect();
        println!(
            "scenario {index}: dir=scn-{index}-{seed}-{suffix} template={template} tools=[{tools}] mutation_steps={steps}",
            seed = cfg.seed,
            template = template.as_str(),
            tools = tool_names.join(","),
        );
    }
}

/// Delete the oldest scenario directories, keeping the newest N. Runs
/// synchronously between scenarios; never touches a directory a later
/// scenario might reference.
fn prune_old_scenarios(cfg: &HarnessConfig, run_root: &std::path::Path) {
    let Some(keep) = cfg.keep_last_n else { return };
    let dirs = scenario_dirs_oldest_first(run_root);
    if dirs.len() <= keep {
        return;
    }
    let doomed = dirs.len() - keep;
    for dir in dirs.into_iter().take(doomed) {
        tracing::debug!(dir = %dir.display(), "pruning old scenario directory");
        if let Err(err) = fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "prune failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> HarnessConfig {
        HarnessConfig {
            seed: 42,
            scenarios: 10,
            only_scenario: None,
            budget: Duration::from_secs(840),
            command_timeout: Duration::from_secs(90),
            root_dir: None,
            disk_budget_bytes: 1024 * 1024 * 1024,
            commits: CommitMode::Minimal,
            keep_last_n: None,
            verbose: false,
            dry_run: false,
            ep_bin: None,
            scaffold_bin: None,
            runner_bin: None,
            report_path: None,
            start_dir: None,
        }
    }

    #[test]
    fn only_scenario_restricts_the_index_set() {
        let mut cfg = base_config();
        assert_eq!(cfg.scenario_indices().len(), 10);
        cfg.only_scenario = Some(3);
        assert_eq!(cfg.scenario_indices(), vec![3]);
    }

    #[test]
    fn missing_workspace_root_is_fatal() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut cfg = base_config();
        cfg.start_dir = Some(temp.path().to_path_buf());
        assert!(run_harness(&cfg).is_err());
    }
}
