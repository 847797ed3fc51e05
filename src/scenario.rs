//! Single-scenario state machine.
//!
//! States run strictly in sequence: scaffolding → baseline battery →
//! skills setup → mutation loop → re-verification battery → forced
//! break/fix → checkpoint commits → done. A failed command never aborts the
//! scenario — it is recorded and the loop proceeds, maximizing information
//! per run. Only a fatal scaffold failure short-circuits to done.
use crate::cli::CommitMode;
use crate::classify::Outcome;
use crate::mutate::{pick_mutation, toggle_source_break, BreakPhase, FollowUp, Mutation};
use crate::paths::{create_scenario_dir, disk_usage_bytes, Toolchain};
use crate::proc::{self, CommandSpec, RunResult};
use crate::report::{ReportBuilder, ScenarioRecord, Surface};
use crate::rng::FuzzRng;
use crate::scaffold::{self, Template, ToolIntegration};
use crate::validators::{
    benign_non_data, validate_install_list_output, validate_list_output, validate_search_output,
    validate_show_output, validate_skills_after_fix, ValidationCheck,
};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Scenario RNG streams are derived as `seed + index * STRIDE + 1` so each
/// scenario's decisions are independent of how much randomness earlier
/// scenarios consumed.
pub const SCENARIO_SEED_STRIDE: u32 = 1000;

pub const MUTATION_STEPS_MIN: usize = 8;
pub const MUTATION_STEPS_MAX: usize = 20;

/// How long a deliberately-started dev server is allowed to live before the
/// deadline kill.
const DEV_SERVER_DEADLINE: Duration = Duration::from_secs(3);

/// Known-good pattern id used when parsing `list` output fails.
pub const FALLBACK_PATTERN_ID: &str = "starter";

const BATTERY_SEARCH_TERMS: &[&str] = &["auth", "cache", "retry", "logging", "queue"];
const SKILL_NAME: &str = "getting-started";

/// Per-run knobs the scenario loop needs.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    pub command_timeout: Duration,
    pub commits: CommitMode,
    pub verbose: bool,
    pub disk_budget_bytes: u64,
}

/// Derive the RNG for one scenario.
pub fn scenario_rng(seed: u32, index: usize) -> FuzzRng {
    FuzzRng::derive(
        seed,
        (index as u32)
            .wrapping_mul(SCENARIO_SEED_STRIDE)
            .wrapping_add(1),
    )
}

/// Derive the RNG for one scenario's directory naming.
///
/// Separate from [`scenario_rng`] so directory-suffix draws (including
/// collision retries against a run root still holding a previous run's
/// trees) never shift the scenario's logical decisions.
pub fn scenario_dir_rng(seed: u32, index: usize) -> FuzzRng {
    FuzzRng::derive(
        seed,
        (index as u32)
            .wrapping_mul(SCENARIO_SEED_STRIDE)
            .wrapping_add(2),
    )
}

/// Seed-determined scenario parameters, used by both the real run and the
/// dry-run plan printer. Consumes RNG state exactly like the run does.
pub fn plan_scenario(rng: &mut FuzzRng) -> (Template, Vec<ToolIntegration>) {
    let template = rng.pick(&Template::ALL).copied().unwrap_or(Template::App);
    let tools = rng.random_subset(&ToolIntegration::ALL, 3);
    (template, tools)
}

/// Run one full scenario and append its record to the report.
///
/// Returns `Err` only for unrecoverable conditions (cannot create the
/// scenario directory); command failures of every kind are data.
pub fn run_scenario(
    index: usize,
    seed: u32,
    run_root: &Path,
    toolchain: &Toolchain,
    opts: &ScenarioOptions,
    builder: &mut ReportBuilder,
) -> Result<()> {
    let mut rng = scenario_rng(seed, index);
    let (template, tools) = plan_scenario(&mut rng);
    // Drawn before any battery randomness so the dry-run planner can
    // reproduce the step count without touching the file system.
    let steps = rng.random_int_inclusive(MUTATION_STEPS_MIN, MUTATION_STEPS_MAX);
    let mut dir_rng = scenario_dir_rng(seed, index);
    let repo = create_scenario_dir(run_root, index, seed, &mut dir_rng)?;
    tracing::info!(
        scenario = index,
        template = template.as_str(),
        repo = %repo.display(),
        "scenario start"
    );

    let record = ScenarioRecord::new(repo.display().to_string(), template, tools.clone(), index);
    let mut run = ScenarioRun {
        toolchain,
        opts,
        builder,
        record,
        repo,
        run_root: run_root.to_path_buf(),
    };

    if run.scaffold(template, &tools) {
        run.init_repo();
        run.battery(&mut rng);
        run.skills_setup(&mut rng);
        run.mutation_loop(&mut rng, template, steps);
        run.battery(&mut rng);
        run.forced_break_fix();
        run.checkpoint_commits(index);
    }

    let record = run.record;
    tracing::info!(
        scenario = index,
        status = record.status.as_str(),
        commands = record.commands.len(),
        "scenario done"
    );
    builder.push_scenario(record);
    Ok(())
}

/// Extract the first pattern id from human-readable `list` output.
///
/// Best-effort parsing of another CLI's output is inherently fragile; this
/// is the one place it happens. Callers fall back to
/// [`FALLBACK_PATTERN_ID`] and record that a fallback occurred — a parse
/// miss is never a failure.
pub fn parse_pattern_id(list_stdout: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^\s*([a-z0-9][a-z0-9_-]{2,})\b").unwrap());
    re.captures(list_stdout).map(|caps| caps[1].to_string())
}

type OutputCheck<'a> = &'a dyn Fn(&RunResult) -> ValidationCheck;

struct ScenarioRun<'a> {
    toolchain: &'a Toolchain,
    opts: &'a ScenarioOptions,
    builder: &'a mut ReportBuilder,
    record: ScenarioRecord,
    repo: PathBuf,
    run_root: PathBuf,
}

impl ScenarioRun<'_> {
    fn base_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("PATH".to_string(), self.toolchain.child_path.clone())])
    }

    /// Execute one spec, classify it, apply the output check, update
    /// coverage, and append the finalized record.
    fn execute(
        &mut self,
        mut spec: CommandSpec,
        surface: Option<Surface>,
        check: Option<OutputCheck>,
    ) -> (Outcome, String) {
        if spec.timeout.is_none() {
            spec.timeout = Some(self.opts.command_timeout);
        }
        spec.mirror = self.opts.verbose;
        if let Some(surface) = surface {
            self.builder.surface_attempted(surface);
        }
        if self.opts.verbose {
            eprintln!("+ {}", spec.command_line());
        }

        let (result, mut record) = proc::run(&spec);

        if record.outcome == Outcome::Success {
            if let Some(check) = check {
                let verdict = check(&result);
                if !verdict.passed {
                    let reason = verdict
                        .reason
                        .unwrap_or_else(|| "output check failed".to_string());
                    let downgraded =
                        benign_non_data(&result.stdout) || benign_non_data(&result.stderr);
                    if record.reclassify_output_failure(downgraded, reason).is_ok()
                        && self.opts.verbose
                    {
                        eprintln!("  output check failed ({})", record.outcome.as_str());
                    }
                }
            }
        }

        if let Some(surface) = surface {
            if record.outcome == Outcome::Success && !spec.expect_failure {
                self.builder.surface_succeeded(surface);
            }
        }

        let outcome = record.outcome;
        self.record.push_command(record);
        (outcome, result.stdout)
    }

    fn ep_spec(&self, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(
            self.toolchain.ep_bin.clone(),
            args.iter().map(|s| s.to_string()).collect(),
            self.repo.clone(),
        );
        spec.env_overrides = self.base_env();
        spec
    }

    fn run_ep(
        &mut self,
        args: &[&str],
        surface: Option<Surface>,
        check: Option<OutputCheck>,
    ) -> (Outcome, String) {
        let spec = self.ep_spec(args);
        self.execute(spec, surface, check)
    }

    fn run_ep_negative(&mut self, args: &[&str], surface: Option<Surface>) -> Outcome {
        let mut spec = self.ep_spec(args);
        spec.expect_failure = true;
        self.execute(spec, surface, None).0
    }

    fn run_runner(&mut self, args: &[&str], expect_failure: bool) -> Outcome {
        let mut spec = CommandSpec::new(
            self.toolchain.runner_bin.clone(),
            args.iter().map(|s| s.to_string()).collect(),
            self.repo.clone(),
        );
        spec.env_overrides = self.base_env();
        spec.expect_failure = expect_failure;
        self.execute(spec, None, None).0
    }

    fn run_dev_server(&mut self) -> Outcome {
        let mut spec = CommandSpec::new(
            self.toolchain.runner_bin.clone(),
            vec!["run".to_string(), "dev".to_string()],
            self.repo.clone(),
        );
        spec.env_overrides = self.base_env();
        spec.expect_timeout = true;
        spec.timeout = Some(DEV_SERVER_DEADLINE.min(self.opts.command_timeout));
        self.execute(spec, None, None).0
    }

    fn run_git(&mut self, args: &[&str]) -> Outcome {
        let mut spec = CommandSpec::new(
            PathBuf::from("git"),
            args.iter().map(|s| s.to_string()).collect(),
            self.repo.clone(),
        );
        let mut env = self.base_env();
        // Fixed identity keeps commit output deterministic across machines.
        env.insert("GIT_AUTHOR_NAME".to_string(), "epfuzz".to_string());
        env.insert("GIT_AUTHOR_EMAIL".to_string(), "epfuzz@localhost".to_string());
        env.insert("GIT_COMMITTER_NAME".to_string(), "epfuzz".to_string());
        env.insert(
            "GIT_COMMITTER_EMAIL".to_string(),
            "epfuzz@localhost".to_string(),
        );
        spec.env_overrides = env;
        self.execute(spec, None, None).0
    }

    /// Scaffold the project. Returns false when the scenario must
    /// short-circuit to done (spawn-level failure or contract violation).
    fn scaffold(&mut self, template: Template, tools: &[ToolIntegration]) -> bool {
        let mut spec = CommandSpec::new(
            self.toolchain.scaffold_bin.clone(),
            scaffold::scaffold_args(template, &self.repo, tools),
            self.run_root.clone(),
        );
        spec.env_overrides = self.base_env();
        spec.timeout = Some(self.opts.command_timeout);
        spec.mirror = self.opts.verbose;
        if self.opts.verbose {
            eprintln!("+ {}", spec.command_line());
        }

        let (_result, mut record) = proc::run(&spec);
        let mut usable = record.outcome == Outcome::Success;
        if usable {
            let violations = scaffold::contract_violations(&self.repo);
            if !violations.is_empty() {
                // Contract violation: hard-fail, no further commands against
                // the malformed project.
                let _ = record.reclassify_output_failure(false, violations.join("; "));
                usable = false;
            }
        }
        if !usable {
            tracing::warn!(
                repo = %self.repo.display(),
                stderr = %record.stderr_excerpt,
                "scaffold failed; scenario short-circuits"
            );
        }
        self.record.push_command(record);
        usable
    }

    fn init_repo(&mut self) {
        self.run_git(&["init", "--quiet"]);
    }

    /// Command battery shared by baseline and re-verification.
    fn battery(&mut self, rng: &mut FuzzRng) {
        self.run_ep(&["--version"], None, None);
        self.run_ep(&["--help"], None, None);
        self.run_ep(&["completions", "bash"], Some(Surface::Completions), None);

        let (_, list_stdout) = self.run_ep(
            &["list"],
            Some(Surface::List),
            Some(&|result: &RunResult| validate_list_output(&result.stdout)),
        );
        let pattern_id = match parse_pattern_id(&list_stdout) {
            Some(id) => id,
            None => {
                self.record.parse_fallback = true;
                FALLBACK_PATTERN_ID.to_string()
            }
        };

        let term = rng.pick(BATTERY_SEARCH_TERMS).copied().unwrap_or("auth");
        self.run_ep(
            &["search", term],
            Some(Surface::Search),
            Some(&|result: &RunResult| validate_search_output(&result.stdout)),
        );
        self.run_ep(
            &["show", &pattern_id],
            Some(Surface::Show),
            Some(&|result: &RunResult| validate_show_output(&result.stdout)),
        );
        // Intentional negative test: a nonsense id must be rejected.
        self.run_ep_negative(&["show", "zz-no-such-pattern-zz"], Some(Surface::Show));
    }

    fn skills_setup(&mut self, rng: &mut FuzzRng) {
        let skills_dir = self.repo.join("skills");
        let skill_file = skills_dir.join(format!("{SKILL_NAME}.md"));
        let body = format!(
            "---\nname: {SKILL_NAME}\ndescription: deterministic fixture skill\n---\n\nUse `ep list` before anything else.\n"
        );
        if let Err(err) = fs::create_dir_all(&skills_dir)
            .with_context(|| format!("create {}", skills_dir.display()))
            .and_then(|()| {
                fs::write(&skill_file, body)
                    .with_context(|| format!("write {}", skill_file.display()))
            })
        {
            tracing::warn!(error = %err, "skills setup write failed");
        }

        self.run_ep(&["skills", "list"], Some(Surface::SkillsList), None);
        self.run_ep(
            &["skills", "preview", SKILL_NAME],
            Some(Surface::SkillsPreview),
            None,
        );
        self.run_ep(&["skills", "validate"], Some(Surface::SkillsValidate), None);
        self.run_ep(&["skills", "stats"], Some(Surface::SkillsStats), None);

        let (_, install_stdout) = self.run_ep(
            &["install", "list"],
            Some(Surface::InstallList),
            Some(&|result: &RunResult| validate_install_list_output(&result.stdout)),
        );
        let id = parse_pattern_id(&install_stdout).unwrap_or_else(|| {
            let choices = [FALLBACK_PATTERN_ID, "hooks", "commands"];
            rng.pick(&choices)
                .copied()
                .unwrap_or(FALLBACK_PATTERN_ID)
                .to_string()
        });
        self.run_ep(&["install", "add", &id], Some(Surface::InstallAdd), None);
    }

    fn mutation_loop(&mut self, rng: &mut FuzzRng, template: Template, steps: usize) {
        for step in 0..steps {
            // Disk budget is checked between steps, never mid-command.
            let usage = disk_usage_bytes(&self.run_root);
            if usage > self.opts.disk_budget_bytes {
                tracing::info!(usage, "disk budget reached; mutation loop stops early");
                break;
            }
            let Some(mutation) = self.pick_with_retries(rng, step, template) else {
                continue;
            };
            tracing::debug!(step, kind = mutation.kind_name(), "apply mutation");
            match mutation.apply(&self.repo) {
                Ok(follow_ups) => {
                    for follow_up in follow_ups {
                        self.run_follow_up(follow_up);
                    }
                }
                Err(err) => {
                    tracing::warn!(kind = mutation.kind_name(), error = %err, "mutation apply failed");
                }
            }
        }
    }

    /// Applicability depends on file-system state the RNG cannot foresee;
    /// a `None` pick is retried with a perturbed index, bounded.
    fn pick_with_retries(
        &self,
        rng: &mut FuzzRng,
        step: usize,
        template: Template,
    ) -> Option<Mutation> {
        for attempt in 0..5 {
            if let Some(mutation) = pick_mutation(rng, step * 31 + attempt, &self.repo, template) {
                return Some(mutation);
            }
        }
        None
    }

    fn run_follow_up(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Ep { args, surface } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run_ep(&args, surface, None);
            }
            FollowUp::DevServer => {
                self.run_dev_server();
            }
            FollowUp::TestRunner => {
                // A break may be in place; its fallout carries the sentinel
                // and classifies as soft-fail rather than a regression.
                self.run_runner(&["test"], false);
            }
        }
    }

    /// Guarantee at least one full break→fix round trip, verified by a real
    /// invocation while broken and again after the fix.
    fn forced_break_fix(&mut self) {
        match toggle_source_break(&self.repo) {
            Ok(BreakPhase::Fixed) => {
                // The mutation loop left the source broken; that toggle was
                // the fix, so break again to start a clean cycle.
                if let Err(err) = toggle_source_break(&self.repo) {
                    tracing::warn!(error = %err, "forced break failed");
                    return;
                }
            }
            Ok(BreakPhase::Broke) => {}
            Err(err) => {
                tracing::warn!(error = %err, "forced break failed");
                return;
            }
        }
        // Broken now: the test runner is expected to reject the project.
        self.run_runner(&["test"], true);
        if let Err(err) = toggle_source_break(&self.repo) {
            tracing::warn!(error = %err, "forced fix failed");
            return;
        }
        self.run_runner(&["test"], false);
        let spec = self.ep_spec(&["skills", "validate"]);
        self.execute(
            spec,
            Some(Surface::SkillsValidate),
            Some(&|result: &RunResult| {
                validate_skills_after_fix(&result.stdout, &result.stderr)
            }),
        );
    }

    fn checkpoint_commits(&mut self, index: usize) {
        if self.opts.commits == CommitMode::None {
            return;
        }
        self.run_git(&["add", "-A"]);
        let message = format!("epfuzz checkpoint scenario {index}");
        self.run_git(&["commit", "--quiet", "-m", &message]);
    }
}
