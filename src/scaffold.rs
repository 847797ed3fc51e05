//! Project templates, tool integrations, and the scaffold contract.
//!
//! The scaffolding generator is an external collaborator: we invoke it as a
//! subprocess and hold it to a contract on required output files.
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Files the scaffold generator must have produced for the project to be
/// usable. A zero exit without them is a contract violation and the
/// scenario hard-fails without attempting further commands.
pub const REQUIRED_SCAFFOLD_FILES: &[&str] = &["package.json", "src/index.ts"];

/// Fixed enumeration of project templates.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    App,
    Lib,
    Service,
}

impl Template {
    pub const ALL: [Template; 3] = [Template::App, Template::Lib, Template::Service];

    pub fn as_str(&self) -> &'static str {
        match self {
            Template::App => "app",
            Template::Lib => "lib",
            Template::Service => "service",
        }
    }
}

/// Optional tool integrations a scaffolded project may carry.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ToolIntegration {
    Lint,
    Docs,
    Ci,
    Bench,
}

impl ToolIntegration {
    pub const ALL: [ToolIntegration; 4] = [
        ToolIntegration::Lint,
        ToolIntegration::Docs,
        ToolIntegration::Ci,
        ToolIntegration::Bench,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolIntegration::Lint => "lint",
            ToolIntegration::Docs => "docs",
            ToolIntegration::Ci => "ci",
            ToolIntegration::Bench => "bench",
        }
    }
}

/// Argument vector for one scaffold invocation.
pub fn scaffold_args(template: Template, dir: &Path, tools: &[ToolIntegration]) -> Vec<String> {
    let mut args = vec![
        "--template".to_string(),
        template.as_str().to_string(),
        "--dir".to_string(),
        dir.display().to_string(),
    ];
    if !tools.is_empty() {
        let list = tools
            .iter()
            .map(|tool| tool.as_str())
            .collect::<Vec<_>>()
            .join(",");
        args.push("--tools".to_string());
        args.push(list);
    }
    args
}

/// Required files absent after a nominally-successful scaffold.
pub fn contract_violations(repo: &Path) -> Vec<String> {
    REQUIRED_SCAFFOLD_FILES
        .iter()
        .filter(|rel| !repo.join(rel).is_file())
        .map(|rel| format!("scaffold did not produce {rel}"))
        .collect()
}
