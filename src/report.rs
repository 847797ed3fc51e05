//! Immutable run report model and its append-only builder.
//!
//! Records accumulate purely by append; nothing is deleted or rewritten
//! after the fact except the one-time output-validator reclassification of a
//! `CommandRecord`, which happens before the record is appended.
use crate::classify::Outcome;
use crate::scaffold::{Template, ToolIntegration};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Named CLI surfaces tracked by the coverage checklists.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Surface {
    List,
    Search,
    Show,
    InstallList,
    InstallAdd,
    SkillsList,
    SkillsPreview,
    SkillsValidate,
    SkillsStats,
    Completions,
}

impl Surface {
    pub const ALL: [Surface; 10] = [
        Surface::List,
        Surface::Search,
        Surface::Show,
        Surface::InstallList,
        Surface::InstallAdd,
        Surface::SkillsList,
        Surface::SkillsPreview,
        Surface::SkillsValidate,
        Surface::SkillsStats,
        Surface::Completions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::List => "list",
            Surface::Search => "search",
            Surface::Show => "show",
            Surface::InstallList => "install-list",
            Surface::InstallAdd => "install-add",
            Surface::SkillsList => "skills-list",
            Surface::SkillsPreview => "skills-preview",
            Surface::SkillsValidate => "skills-validate",
            Surface::SkillsStats => "skills-stats",
            Surface::Completions => "completions",
        }
    }
}

/// Fixed-shape surface-to-bool map. Two instances exist per run: attempted
/// and succeeded, with `succeeded[k] ⇒ attempted[k]` for all k at all times
/// (enforced by [`ReportBuilder`], the only writer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageChecklist(BTreeMap<String, bool>);

impl CoverageChecklist {
    pub fn new() -> Self {
        Self(
            Surface::ALL
                .iter()
                .map(|surface| (surface.as_str().to_string(), false))
                .collect(),
        )
    }

    pub fn mark(&mut self, surface: Surface) {
        self.0.insert(surface.as_str().to_string(), true);
    }

    pub fn get(&self, surface: Surface) -> bool {
        self.0.get(surface.as_str()).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

impl Default for CoverageChecklist {
    fn default() -> Self {
        Self::new()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One finished subprocess invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// Resolved binary path actually spawned.
    pub bin: String,
    pub args: Vec<String>,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_overrides: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// -1 is the timeout (and spawn-failure) sentinel.
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timed_out: bool,
    pub duration_ms: u64,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "is_false")]
    pub expect_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_check_failed: Option<String>,
    pub stderr_excerpt: String,
}

impl CommandRecord {
    /// The single permitted post-hoc mutation: an output validator rejecting
    /// a nominally-successful command, before the record is appended.
    pub fn reclassify_output_failure(&mut self, downgraded: bool, reason: String) -> Result<()> {
        if self.outcome != Outcome::Success {
            bail!("output reclassification only applies to successful commands");
        }
        self.outcome = if downgraded {
            Outcome::SoftFail
        } else {
            Outcome::HardFail
        };
        self.output_check_failed = Some(reason);
        Ok(())
    }

    /// Normalized grouping key: binary stem + verb + first subcommand for
    /// grouped verbs.
    pub fn key(&self) -> String {
        command_key(&self.bin, &self.args)
    }
}

pub fn command_key(bin: &str, args: &[String]) -> String {
    let stem = Path::new(bin)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| bin.to_string());
    let mut parts = vec![stem];
    let positional: Vec<&String> = args.iter().filter(|arg| !arg.starts_with('-')).collect();
    match positional.first() {
        Some(verb) => {
            parts.push((*verb).clone());
            if matches!(verb.as_str(), "install" | "skills" | "run") {
                if let Some(sub) = positional.get(1) {
                    parts.push((*sub).clone());
                }
            }
        }
        None => {
            if let Some(flag) = args.first() {
                parts.push(flag.clone());
            }
        }
    }
    parts.join(" ")
}

/// One full simulated project lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRecord {
    pub repo_path: String,
    pub template: Template,
    pub tools: Vec<ToolIntegration>,
    pub scenario_index: usize,
    /// Worst of this scenario's command outcomes.
    pub status: Outcome,
    pub commands: Vec<CommandRecord>,
    /// Set when the list-output parser fell back to the known-good id.
    #[serde(default, skip_serializing_if = "is_false")]
    pub parse_fallback: bool,
}

impl ScenarioRecord {
    pub fn new(repo_path: String, template: Template, tools: Vec<ToolIntegration>, index: usize) -> Self {
        Self {
            repo_path,
            template,
            tools,
            scenario_index: index,
            status: Outcome::Success,
            commands: Vec::new(),
            parse_fallback: false,
        }
    }

    /// Append a finalized record and fold its outcome into the status.
    pub fn push_command(&mut self, record: CommandRecord) {
        self.status = self.status.max(record.outcome);
        self.commands.push(record);
    }
}

/// Pointer to the first hard-failing scenario, for reproduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstFailing {
    pub scenario_index: usize,
    pub seed: u32,
}

/// Top-level run artifact, serialized once at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub seed: u32,
    pub start_time: u128,
    pub end_time: u128,
    pub runtime_ms: u64,
    pub scenarios: Vec<ScenarioRecord>,
    pub total_commands_attempted: u64,
    pub total_success: u64,
    pub total_soft_fail: u64,
    pub total_hard_fail: u64,
    pub disk_usage_bytes: u64,
    pub disk_usage_mb: f64,
    pub first_failing_scenario: Option<FirstFailing>,
    pub coverage_attempted: CoverageChecklist,
    pub coverage_succeeded: CoverageChecklist,
    /// Absent in reports written before this field existed; readers treat a
    /// missing map as empty.
    #[serde(default)]
    pub soft_fail_by_command: BTreeMap<String, u64>,
}

impl RunReport {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read report {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse report {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serialize report")?;
        fs::write(path, json).with_context(|| format!("write report {}", path.display()))
    }

    /// Surfaces that were attempted at least once but never succeeded
    /// across the whole run.
    pub fn coverage_gaps(&self) -> Vec<&'static str> {
        Surface::ALL
            .iter()
            .filter(|surface| {
                self.coverage_attempted.get(**surface) && !self.coverage_succeeded.get(**surface)
            })
            .map(|surface| surface.as_str())
            .collect()
    }

    pub fn any_hard_fail(&self) -> bool {
        self.total_hard_fail > 0
    }
}

/// Append-only accumulator threaded through the scenario loop; a single
/// `finalize()` produces the immutable [`RunReport`].
#[derive(Debug)]
pub struct ReportBuilder {
    seed: u32,
    start_epoch_ms: u128,
    started: Instant,
    scenarios: Vec<ScenarioRecord>,
    coverage_attempted: CoverageChecklist,
    coverage_succeeded: CoverageChecklist,
}

impl ReportBuilder {
    pub fn new(seed: u32) -> Result<Self> {
        Ok(Self {
            seed,
            start_epoch_ms: now_epoch_ms()?,
            started: Instant::now(),
            scenarios: Vec::new(),
            coverage_attempted: CoverageChecklist::new(),
            coverage_succeeded: CoverageChecklist::new(),
        })
    }

    /// Mark a surface invoked, the moment the command is spawned.
    pub fn surface_attempted(&mut self, surface: Surface) {
        self.coverage_attempted.mark(surface);
    }

    /// Mark a surface genuinely succeeded. Also marks it attempted, which
    /// keeps `succeeded ⇒ attempted` true by construction.
    pub fn surface_succeeded(&mut self, surface: Surface) {
        self.coverage_attempted.mark(surface);
        self.coverage_succeeded.mark(surface);
    }

    pub fn push_scenario(&mut self, record: ScenarioRecord) {
        self.scenarios.push(record);
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    pub fn finalize(self, disk_usage_bytes: u64) -> Result<RunReport> {
        let end_epoch_ms = now_epoch_ms()?;
        let mut total_commands_attempted = 0u64;
        let mut total_success = 0u64;
        let mut total_soft_fail = 0u64;
        let mut total_hard_fail = 0u64;
        let mut soft_fail_by_command: BTreeMap<String, u64> = BTreeMap::new();
        let mut first_failing_scenario = None;

        for scenario in &self.scenarios {
            if first_failing_scenario.is_none() && scenario.status == Outcome::HardFail {
                first_failing_scenario = Some(FirstFailing {
                    scenario_index: scenario.scenario_index,
                    seed: self.seed,
                });
            }
            for command in &scenario.commands {
                total_commands_attempted += 1;
                match command.outcome {
                    Outcome::Success => total_success += 1,
                    Outcome::SoftFail => {
                        total_soft_fail += 1;
                        *soft_fail_by_command.entry(command.key()).or_insert(0) += 1;
                    }
                    Outcome::HardFail => total_hard_fail += 1,
                }
            }
        }

        Ok(RunReport {
            seed: self.seed,
            start_time: self.start_epoch_ms,
            end_time: end_epoch_ms,
            runtime_ms: self.started.elapsed().as_millis() as u64,
            scenarios: self.scenarios,
            total_commands_attempted,
            total_success,
            total_soft_fail,
            total_hard_fail,
            disk_usage_bytes,
            disk_usage_mb: disk_usage_bytes as f64 / (1024.0 * 1024.0),
            first_failing_scenario,
            coverage_attempted: self.coverage_attempted,
            coverage_succeeded: self.coverage_succeeded,
            soft_fail_by_command,
        })
    }
}

pub fn now_epoch_ms() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute timestamp")?
        .as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: Outcome, args: &[&str]) -> CommandRecord {
        CommandRecord {
            bin: "/usr/bin/ep".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: "/tmp".to_string(),
            env_overrides: BTreeMap::new(),
            timeout_secs: Some(90),
            exit_code: if outcome == Outcome::Success { 0 } else { 1 },
            timed_out: false,
            duration_ms: 5,
            outcome,
            expect_failure: false,
            output_check_failed: None,
            stderr_excerpt: String::new(),
        }
    }

    #[test]
    fn succeeded_implies_attempted() {
        let mut builder = ReportBuilder::new(42).unwrap();
        builder.surface_succeeded(Surface::Search);
        let report = builder.finalize(0).unwrap();
        for (key, succeeded) in report.coverage_succeeded.iter() {
            if succeeded {
                let attempted = report
                    .coverage_attempted
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v)
                    .unwrap();
                assert!(attempted, "succeeded surface {key} must be attempted");
            }
        }
    }

    #[test]
    fn coverage_gap_is_attempted_but_never_succeeded() {
        let mut builder = ReportBuilder::new(1).unwrap();
        builder.surface_attempted(Surface::Show);
        builder.surface_succeeded(Surface::List);
        let report = builder.finalize(0).unwrap();
        assert_eq!(report.coverage_gaps(), vec!["show"]);
    }

    #[test]
    fn reclassify_applies_only_to_success() {
        let mut rec = record(Outcome::Success, &["list"]);
        rec.reclassify_output_failure(true, "empty".to_string()).unwrap();
        assert_eq!(rec.outcome, Outcome::SoftFail);
        assert!(rec.reclassify_output_failure(false, "again".to_string()).is_err());
    }

    #[test]
    fn scenario_status_is_worst_of_commands() {
        let mut scenario = ScenarioRecord::new(
            "/tmp/scn".to_string(),
            Template::App,
            vec![],
            0,
        );
        scenario.push_command(record(Outcome::Success, &["list"]));
        scenario.push_command(record(Outcome::SoftFail, &["search", "x"]));
        assert_eq!(scenario.status, Outcome::SoftFail);
        scenario.push_command(record(Outcome::HardFail, &["show", "y"]));
        assert_eq!(scenario.status, Outcome::HardFail);
    }

    #[test]
    fn finalize_counts_and_groups_soft_fails() {
        let mut builder = ReportBuilder::new(7).unwrap();
        let mut scenario = ScenarioRecord::new("/tmp/a".to_string(), Template::Lib, vec![], 0);
        scenario.push_command(record(Outcome::Success, &["list"]));
        scenario.push_command(record(Outcome::SoftFail, &["install", "add", "starter"]));
        scenario.push_command(record(Outcome::SoftFail, &["install", "add", "other"]));
        scenario.push_command(record(Outcome::HardFail, &["show", "bad"]));
        builder.push_scenario(scenario);
        let report = builder.finalize(2048).unwrap();
        assert_eq!(report.total_commands_attempted, 4);
        assert_eq!(report.total_success, 1);
        assert_eq!(report.total_soft_fail, 2);
        assert_eq!(report.total_hard_fail, 1);
        assert_eq!(report.soft_fail_by_command.get("ep install add"), Some(&2));
        let first = report.first_failing_scenario.unwrap();
        assert_eq!(first.scenario_index, 0);
        assert_eq!(first.seed, 7);
    }

    #[test]
    fn command_key_groups_verbs() {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(command_key("/x/ep", &args(&["list", "--json"])), "ep list");
        assert_eq!(
            command_key("/x/ep", &args(&["skills", "validate"])),
            "ep skills validate"
        );
        assert_eq!(command_key("/usr/bin/git", &args(&["commit", "-m", "x"])), "git commit");
        assert_eq!(command_key("/x/ep", &args(&["--version"])), "ep --version");
    }

    #[test]
    fn old_reports_without_soft_fail_map_still_parse() {
        let mut builder = ReportBuilder::new(3).unwrap();
        builder.surface_attempted(Surface::List);
        let report = builder.finalize(0).unwrap();
        let mut value = serde_json::to_value(&report).unwrap();
        value.as_object_mut().unwrap().remove("softFailByCommand");
        let parsed: RunReport = serde_json::from_value(value).unwrap();
        assert!(parsed.soft_fail_by_command.is_empty());
    }
}
