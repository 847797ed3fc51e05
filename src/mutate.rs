//! Deterministic lifecycle mutations applied to a scaffolded project.
//!
//! Selection is RNG-driven but gated by applicability: a variant that
//! cannot apply to the repository's current file state yields `None`, and
//! callers retry with a perturbed index instead of treating that as an
//! error. Break/fix variants are toggles — they inspect the sentinel marker
//! to decide which half applies, so repeated application never wedges and a
//! break followed by a fix restores the touched section byte-for-byte.
use crate::report::Surface;
use crate::rng::FuzzRng;
use crate::scaffold::Template;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sentinel embedded by every break mutation. The classifier treats test
/// and type-check fallout carrying this marker as intentional (soft-fail).
pub const BREAK_MARKER: &str = "EPFUZZ_BROKEN";

pub const SOURCE_FILE: &str = "src/index.ts";
pub const TEST_FILE: &str = "test/index.test.js";
pub const DOCS_FILE: &str = "docs/api.md";

const KIND_COUNT: usize = 9;

const SEARCH_TERMS: &[&str] = &["auth", "cache", "retry", "logging", "queue"];
const CONFIG_SCRIPTS: &[&str] = &["check", "verify", "smoke", "prepare"];

/// One deterministic lifecycle step. Each variant embeds just enough data
/// (chosen filenames, argument lists) to be re-applied identically on
/// replay.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    AddModule { name: String },
    RenameWithImportFix { from: String, to: String },
    BreakThenFixSource,
    AddOrBreakTest,
    EditConfigScript { script: String },
    BreakThenFixDocs,
    InvokeDevServer,
    InvokeTestRunner,
    InvokeEp {
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        surface: Option<Surface>,
    },
}

/// Which half of a break/fix toggle just ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakPhase {
    Broke,
    Fixed,
}

/// Subprocess invocations a mutation wants run after its file edits; the
/// orchestrator executes and classifies them like any other command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    Ep {
        args: Vec<String>,
        surface: Option<Surface>,
    },
    /// `<runner> run dev`, deliberately started and killed on deadline.
    DevServer,
    /// `<runner> test`; may legitimately fail while a break is in place.
    TestRunner,
}

/// Pick a mutation for this step, or `None` when the rolled variant is not
/// applicable to the repository's current state.
pub fn pick_mutation(
    rng: &mut FuzzRng,
    _step_index: usize,
    repo: &Path,
    _template: Template,
) -> Option<Mutation> {
    let kind = rng.random_int(KIND_COUNT);
    match kind {
        0 => Some(Mutation::AddModule {
            name: format!("mod_{}", rng.short_alnum(5)),
        }),
        1 => {
            let modules = module_stems(repo);
            let from = rng.pick(&modules)?.clone();
            let to = format!("mod_{}", rng.short_alnum(5));
            Some(Mutation::RenameWithImportFix { from, to })
        }
        2 => repo.join(SOURCE_FILE).is_file().then_some(Mutation::BreakThenFixSource),
        3 => Some(Mutation::AddOrBreakTest),
        4 => {
            if !repo.join("package.json").is_file() {
                let _ = rng.next();
                return None;
            }
            let script = rng.pick(CONFIG_SCRIPTS)?;
            Some(Mutation::EditConfigScript {
                script: (*script).to_string(),
            })
        }
        5 => repo.join(DOCS_FILE).is_file().then_some(Mutation::BreakThenFixDocs),
        6 => repo.join("package.json").is_file().then_some(Mutation::InvokeDevServer),
        7 => repo.join("package.json").is_file().then_some(Mutation::InvokeTestRunner),
        _ => {
            let choice = rng.random_int(5);
            let (args, surface): (Vec<&str>, Surface) = match choice {
                0 => (vec!["list"], Surface::List),
                1 => {
                    let term = rng.pick(SEARCH_TERMS).copied().unwrap_or("auth");
                    (vec!["search", term], Surface::Search)
                }
                2 => (vec!["install", "list"], Surface::InstallList),
                3 => (vec!["skills", "stats"], Surface::SkillsStats),
                _ => (vec!["completions", "bash"], Surface::Completions),
            };
            Some(Mutation::InvokeEp {
                args: args.into_iter().map(str::to_string).collect(),
                surface: Some(surface),
            })
        }
    }
}

impl Mutation {
    /// Apply this mutation's file edits and return any follow-up
    /// invocations the orchestrator should run.
    pub fn apply(&self, repo: &Path) -> Result<Vec<FollowUp>> {
        match self {
            Mutation::AddModule { name } => {
                add_module(repo, name)?;
                Ok(Vec::new())
            }
            Mutation::RenameWithImportFix { from, to } => {
                rename_module(repo, from, to)?;
                Ok(Vec::new())
            }
            Mutation::BreakThenFixSource => {
                toggle_append_block(&repo.join(SOURCE_FILE), &source_break_block())?;
                Ok(Vec::new())
            }
            Mutation::AddOrBreakTest => {
                add_or_toggle_test(repo)?;
                Ok(vec![FollowUp::TestRunner])
            }
            Mutation::EditConfigScript { script } => {
                edit_config_script(repo, script)?;
                Ok(Vec::new())
            }
            Mutation::BreakThenFixDocs => {
                toggle_append_block(&repo.join(DOCS_FILE), &docs_break_block())?;
                Ok(Vec::new())
            }
            Mutation::InvokeDevServer => Ok(vec![FollowUp::DevServer]),
            Mutation::InvokeTestRunner => Ok(vec![FollowUp::TestRunner]),
            Mutation::InvokeEp { args, surface } => Ok(vec![FollowUp::Ep {
                args: args.clone(),
                surface: *surface,
            }]),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Mutation::AddModule { .. } => "add_module",
            Mutation::RenameWithImportFix { .. } => "rename_with_import_fix",
            Mutation::BreakThenFixSource => "break_then_fix_source",
            Mutation::AddOrBreakTest => "add_or_break_test",
            Mutation::EditConfigScript { .. } => "edit_config_script",
            Mutation::BreakThenFixDocs => "break_then_fix_docs",
            Mutation::InvokeDevServer => "invoke_dev_server",
            Mutation::InvokeTestRunner => "invoke_test_runner",
            Mutation::InvokeEp { .. } => "invoke_ep",
        }
    }
}

fn source_break_block() -> String {
    format!("\n// {BREAK_MARKER}\n{BREAK_MARKER}(;\n")
}

fn docs_break_block() -> String {
    format!("\n<!-- {BREAK_MARKER} -->\n")
}

fn test_break_block() -> String {
    format!("\nassert.ok(false, \"{BREAK_MARKER}\");\n")
}

/// Append the marker block if absent, remove it if present.
///
/// Because the block is appended verbatim and removed verbatim, a full
/// break→fix round trip restores the file byte-for-byte.
pub fn toggle_append_block(file: &Path, block: &str) -> Result<BreakPhase> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("read {}", file.display()))?;
    let (next, phase) = match content.find(block) {
        Some(_) => (content.replacen(block, "", 1), BreakPhase::Fixed),
        None => (format!("{content}{block}"), BreakPhase::Broke),
    };
    fs::write(file, next).with_context(|| format!("write {}", file.display()))?;
    Ok(phase)
}

/// Move the named source file one step toward the opposite break state.
pub fn toggle_source_break(repo: &Path) -> Result<BreakPhase> {
    toggle_append_block(&repo.join(SOURCE_FILE), &source_break_block())
}

fn add_module(repo: &Path, name: &str) -> Result<()> {
    let src = repo.join("src");
    fs::create_dir_all(&src).with_context(|| format!("create {}", src.display()))?;
    let module = src.join(format!("{name}.ts"));
    fs::write(
        &module,
        format!("export const {name} = \"{name}\";\n"),
    )
    .with_context(|| format!("write {}", module.display()))?;
    let index = repo.join(SOURCE_FILE);
    let mut content = fs::read_to_string(&index)
        .with_context(|| format!("read {}", index.display()))?;
    content.push_str(&format!("export * from \"./{name}\";\n"));
    fs::write(&index, content).with_context(|| format!("write {}", index.display()))
}

fn rename_module(repo: &Path, from: &str, to: &str) -> Result<()> {
    let src = repo.join("src");
    let old = src.join(format!("{from}.ts"));
    let new = src.join(format!("{to}.ts"));
    let body = fs::read_to_string(&old)
        .with_context(|| format!("read {}", old.display()))?;
    fs::write(&new, body.replace(from, to))
        .with_context(|| format!("write {}", new.display()))?;
    fs::remove_file(&old).with_context(|| format!("remove {}", old.display()))?;
    // Fix the import side so the rename is not a silent break.
    let index = repo.join(SOURCE_FILE);
    let content = fs::read_to_string(&index)
        .with_context(|| format!("read {}", index.display()))?;
    fs::write(&index, content.replace(&format!("./{from}"), &format!("./{to}")))
        .with_context(|| format!("write {}", index.display()))
}

fn add_or_toggle_test(repo: &Path) -> Result<()> {
    let test = repo.join(TEST_FILE);
    if test.is_file() {
        toggle_append_block(&test, &test_break_block())?;
        return Ok(());
    }
    if let Some(parent) = test.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(
        &test,
        "const assert = require(\"node:assert\");\nassert.ok(true);\nconsole.log(\"ok\");\n",
    )
    .with_context(|| format!("write {}", test.display()))
}

fn edit_config_script(repo: &Path, script: &str) -> Result<()> {
    let manifest = repo.join("package.json");
    let raw = fs::read_to_string(&manifest)
        .with_context(|| format!("read {}", manifest.display()))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", manifest.display()))?;
    let scripts = value
        .as_object_mut()
        .context("package.json is not an object")?
        .entry("scripts")
        .or_insert_with(|| serde_json::Value::Object(Default::default()));
    scripts
        .as_object_mut()
        .context("package.json scripts is not an object")?
        .insert(
            format!("epfuzz-{script}"),
            serde_json::Value::String("node -e \"process.exit(0)\"".to_string()),
        );
    let pretty = serde_json::to_string_pretty(&value).context("serialize package.json")?;
    fs::write(&manifest, pretty).with_context(|| format!("write {}", manifest.display()))
}

/// Module stems under `src/`, excluding the entrypoint. Unreadable state
/// reads as "nothing applicable" rather than an error.
fn module_stems(repo: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(repo.join("src")) else {
        return Vec::new();
    };
    let mut stems: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = name.strip_suffix(".ts")?;
            (stem != "index").then(|| stem.to_string())
        })
        .collect();
    stems.sort();
    stems
}
