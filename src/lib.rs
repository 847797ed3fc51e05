//! Seedable lifecycle fuzz harness for the `ep` CLI.
//!
//! The harness deterministically generates a sequence of real-world project
//! states, runs the CLI under test against each, classifies every
//! invocation as success / soft-fail / hard-fail, and emits a structured
//! report usable by humans and by automated coverage gates.
//!
//! Library-first layout: the binary is a thin wrapper, and integration
//! tests drive [`harness::run_harness`] in-process against fake
//! executables.

pub mod classify;
pub mod cli;
pub mod harness;
pub mod mutate;
pub mod paths;
pub mod proc;
pub mod report;
pub mod rng;
pub mod scaffold;
pub mod scenario;
pub mod summary;
pub mod util;
pub mod validators;

pub use classify::{classify, ClassifyOptions, Outcome};
pub use cli::{CommitMode, RootArgs};
pub use harness::{run_harness, HarnessConfig, HarnessOutcome};
pub use mutate::{pick_mutation, Mutation};
pub use paths::Toolchain;
pub use proc::{CommandSpec, RunResult};
pub use report::{CommandRecord, ReportBuilder, RunReport, ScenarioRecord, Surface};
pub use rng::FuzzRng;
pub use scaffold::{Template, ToolIntegration};
pub use scenario::{run_scenario, ScenarioOptions};
