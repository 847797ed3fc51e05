//! Workspace, output-directory, and binary resolution.
//!
//! Everything here is setup: failures are configuration errors reported
//! before any scenario runs, distinct from runtime command failures.
use crate::rng::FuzzRng;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved external binaries plus the PATH value handed to every child.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// The CLI under test.
    pub ep_bin: PathBuf,
    /// The project-scaffolding generator.
    pub scaffold_bin: PathBuf,
    /// The package-script runner (dev server / test runner).
    pub runner_bin: PathBuf,
    /// PATH for child processes: the runner's install directory prepended to
    /// the inherited PATH, so children find the interpreter no matter how the
    /// harness itself was launched. Computed once before any spawn; the
    /// harness's own environment is never mutated.
    pub child_path: String,
}

impl Toolchain {
    pub fn resolve(
        workspace: &Path,
        ep_bin: Option<&Path>,
        scaffold_bin: Option<&Path>,
        runner_bin: Option<&Path>,
    ) -> Result<Self> {
        let ep_bin = resolve_tool_bin(ep_bin, "ep", workspace)?;
        let scaffold_bin = resolve_tool_bin(scaffold_bin, "ep-scaffold", workspace)?;
        let runner_bin = resolve_tool_bin(runner_bin, "npm", workspace)?;
        let child_path = child_path_value(&runner_bin)?;
        Ok(Self {
            ep_bin,
            scaffold_bin,
            runner_bin,
            child_path,
        })
    }
}

/// Find the nearest ancestor of `start` containing `.git`.
pub fn find_workspace_root(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        if dir.join(".git").exists() {
            return Ok(dir.to_path_buf());
        }
    }
    bail!(
        "no workspace root (.git) found above {}",
        start.display()
    )
}

/// Resolve the run root, creating it on demand.
pub fn resolve_run_root(flag: Option<&Path>, workspace: &Path) -> Result<PathBuf> {
    let root = match flag {
        Some(path) => path.to_path_buf(),
        None => workspace.join(".epfuzz"),
    };
    fs::create_dir_all(&root)
        .with_context(|| format!("create run root {}", root.display()))?;
    Ok(root)
}

/// Resolve one external binary.
///
/// An explicit path must point at an existing file (a broken path is a
/// configuration error, not a runtime failure). A bare default is looked up
/// on PATH, then under `<workspace>/bin/`.
pub fn resolve_tool_bin(
    explicit: Option<&Path>,
    default_name: &str,
    workspace: &Path,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let resolved = path
            .canonicalize()
            .with_context(|| format!("binary path {} is missing or broken", path.display()))?;
        if !resolved.is_file() {
            bail!("binary path {} is not a file", resolved.display());
        }
        return Ok(resolved);
    }
    if let Ok(found) = which::which(default_name) {
        return Ok(found);
    }
    let fallback = workspace.join("bin").join(default_name);
    if fallback.is_file() {
        return Ok(fallback);
    }
    Err(anyhow!(
        "cannot resolve `{default_name}`: not on PATH and {} does not exist",
        fallback.display()
    ))
}

/// PATH value for children: runner's parent directory prepended to ours.
pub fn child_path_value(runner_bin: &Path) -> Result<String> {
    let install_dir = runner_bin
        .parent()
        .ok_or_else(|| anyhow!("runner binary {} has no parent directory", runner_bin.display()))?;
    let mut entries = vec![install_dir.to_path_buf()];
    if let Some(existing) = env::var_os("PATH") {
        entries.extend(env::split_paths(&existing));
    }
    let joined = env::join_paths(entries).context("compose child PATH")?;
    Ok(joined.to_string_lossy().into_owned())
}

/// Create the scenario directory, retrying with a perturbed suffix on
/// collision. Each scenario exclusively owns its directory for its lifetime.
pub fn create_scenario_dir(
    run_root: &Path,
    index: usize,
    seed: u32,
    rng: &mut FuzzRng,
) -> Result<PathBuf> {
    for _ in 0..8 {
        let suffix = rng.short_alnum(6);
        let dir = run_root.join(format!("scn-{index}-{seed}-{suffix}"));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create scenario directory {}", dir.display()))
            }
        }
    }
    bail!(
        "could not create a unique scenario directory under {}",
        run_root.display()
    )
}

/// Recursive disk usage of `root` in bytes, excluding dependency-install
/// artifacts (`node_modules`) from the measured total.
pub fn disk_usage_bytes(root: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            if entry.file_name() == "node_modules" {
                continue;
            }
            total += disk_usage_bytes(&path);
        } else {
            total += meta.len();
        }
    }
    total
}

/// Sorted scenario directories under the run root, oldest first by name.
///
/// Directory names embed the scenario index, so lexicographic-by-index order
/// is creation order within a run.
pub fn scenario_dirs_oldest_first(run_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(run_root) else {
        return Vec::new();
    };
    let mut dirs: Vec<(usize, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rest = name.strip_prefix("scn-")?;
            let index: usize = rest.split('-').next()?.parse().ok()?;
            entry.path().is_dir().then(|| (index, entry.path()))
        })
        .collect();
    dirs.sort();
    dirs.into_iter().map(|(_, path)| path).collect()
}
