//! Shared fixture: a throwaway workspace with fake `ep`, `ep-scaffold`,
//! and `npm` executables, driven through the library entrypoint so tests
//! never depend on a real toolchain being installed.
#![allow(dead_code)]

use ep_fuzz::cli::CommitMode;
use ep_fuzz::classify::Outcome;
use ep_fuzz::harness::HarnessConfig;
use ep_fuzz::mutate::BREAK_MARKER;
use ep_fuzz::report::{RunReport, ScenarioRecord};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Well-behaved `ep` stand-in: every surface answers with plausible,
/// validator-passing output, and the nonsense-id probe is rejected.
pub fn default_ep_script() -> String {
    ep_script(
        r#"echo "1 result"
    echo "starter     seed a new repository""#,
    )
}

/// `ep` variant whose `search` always fails with a throttling message, so
/// the surface is attempted but never succeeds.
pub fn rate_limited_search_ep_script() -> String {
    ep_script(
        r#"echo "error: rate limit exceeded" >&2
    exit 1"#,
    )
}

// The script body contains `"#` (a quoted comment marker), so the raw
// string needs the wider delimiter.
fn ep_script(search_body: &str) -> String {
    format!(
        r##"#!/bin/sh
case "$1" in
  --version) echo "ep 1.2.3" ;;
  --help)
    echo "usage: ep <command> [args]"
    echo "commands: list search show install skills completions" ;;
  completions) echo "complete -F _ep_complete ep" ;;
  list)
    echo "starter     seed a new repository"
    echo "hooks       git hook pack" ;;
  search)
    {search_body} ;;
  show)
    if [ "$2" = "zz-no-such-pattern-zz" ]; then
      echo "error: pattern not found: $2" >&2
      exit 1
    fi
    echo "$2"
    echo "detailed description of $2" ;;
  install)
    if [ "$2" = "list" ]; then
      echo "installed patterns:"
      echo "  starter"
    else
      echo "installed $3"
    fi ;;
  skills)
    case "$2" in
      list) echo "getting-started" ;;
      preview)
        echo "# $3"
        echo "fixture skill body" ;;
      validate) echo "all skills ok" ;;
      stats) echo "skills: 1" ;;
      *)
        echo "error: unknown skills subcommand: $2" >&2
        exit 1 ;;
    esac ;;
  *)
    echo "error: unknown command: $1" >&2
    exit 2 ;;
esac
"##
    )
}

const SCAFFOLD_SCRIPT: &str = r#"#!/bin/sh
dir=""
tools=""
while [ $# -gt 0 ]; do
  case "$1" in
    --dir) dir="$2"; shift ;;
    --tools) tools="$2"; shift ;;
  esac
  shift
done
mkdir -p "$dir/src"
cat > "$dir/package.json" <<'EOF'
{
  "name": "fixture-project",
  "version": "0.1.0",
  "scripts": { "test": "node test", "dev": "node server" }
}
EOF
echo 'export const answer = 42;' > "$dir/src/index.ts"
case ",$tools," in
  *,docs,*)
    mkdir -p "$dir/docs"
    printf '# api\n\nfixture docs\n' > "$dir/docs/api.md" ;;
esac
"#;

/// `npm` stand-in: `test` fails iff a break sentinel is present anywhere in
/// the project, `run dev` blocks until killed on deadline.
fn npm_script() -> String {
    format!(
        r#"#!/bin/sh
case "$1" in
  test)
    if grep -rq "{BREAK_MARKER}" src test 2>/dev/null; then
      echo "1 failing" >&2
      exit 1
    fi
    echo "all tests passed"
    ;;
  run)
    if [ "$2" = "dev" ]; then
      echo "dev server listening"
      sleep 30
    fi
    ;;
  *)
    echo "npm: unknown command: $1" >&2
    exit 1 ;;
esac
"#
    )
}

pub struct FuzzWorkspace {
    // Held for its Drop; the directory outlives every harness run.
    _temp: TempDir,
    pub root: PathBuf,
}

impl Default for FuzzWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzWorkspace {
    pub fn new() -> Self {
        Self::with_ep(&default_ep_script())
    }

    pub fn with_ep(ep_script: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::create_dir(root.join(".git")).unwrap();
        let bin = root.join("bin");
        fs::create_dir(&bin).unwrap();
        write_executable(&bin.join("ep"), ep_script);
        write_executable(&bin.join("ep-scaffold"), SCAFFOLD_SCRIPT);
        write_executable(&bin.join("npm"), &npm_script());
        Self { _temp: temp, root }
    }

    /// Config pointing every binary at the fakes. Binaries are passed
    /// explicitly so a real `npm` on PATH can never shadow the fixture.
    pub fn config(&self, seed: u32, scenarios: usize) -> HarnessConfig {
        let bin = self.root.join("bin");
        HarnessConfig {
            seed,
            scenarios,
            only_scenario: None,
            budget: Duration::from_secs(600),
            command_timeout: Duration::from_secs(5),
            root_dir: None,
            disk_budget_bytes: 1024 * 1024 * 1024,
            commits: CommitMode::None,
            keep_last_n: None,
            verbose: false,
            dry_run: false,
            ep_bin: Some(bin.join("ep")),
            scaffold_bin: Some(bin.join("ep-scaffold")),
            runner_bin: Some(bin.join("npm")),
            report_path: None,
            start_dir: Some(self.root.clone()),
        }
    }

    pub fn run_root(&self) -> PathBuf {
        self.root.join(".epfuzz")
    }

    /// Scenario working trees currently on disk.
    pub fn scenario_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.run_root()) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with("scn-"))
            })
            .collect();
        dirs.sort();
        dirs
    }
}

fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// (key, outcome, expect_failure) of one command.
pub type CommandShape = (String, Outcome, bool);
/// (template, tools, parse_fallback, commands) of one scenario.
pub type ScenarioShape = (String, Vec<String>, bool, Vec<CommandShape>);
/// (scenarios, totals, succeeded-coverage) of one run.
pub type RunShape = (Vec<ScenarioShape>, (u64, u64, u64, u64), serde_json::Value);

/// Machine-independent projection of one scenario: everything except
/// absolute paths, durations, and timestamps.
pub fn scenario_shape(scenario: &ScenarioRecord) -> ScenarioShape {
    (
        scenario.template.as_str().to_string(),
        scenario
            .tools
            .iter()
            .map(|tool| tool.as_str().to_string())
            .collect(),
        scenario.parse_fallback,
        scenario
            .commands
            .iter()
            .map(|cmd| (cmd.key(), cmd.outcome, cmd.expect_failure))
            .collect(),
    )
}

/// Machine-independent projection of a whole run.
pub fn run_shape(report: &RunReport) -> RunShape {
    (
        report.scenarios.iter().map(scenario_shape).collect(),
        (
            report.total_commands_attempted,
            report.total_success,
            report.total_soft_fail,
            report.total_hard_fail,
        ),
        serde_json::to_value(&report.coverage_succeeded).unwrap(),
    )
}

/// All command keys of one scenario, in execution order.
pub fn command_keys(scenario: &ScenarioRecord) -> Vec<String> {
    scenario.commands.iter().map(|cmd| cmd.key()).collect()
}
