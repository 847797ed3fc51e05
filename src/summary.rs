//! Human-readable run summary and report analysis.
use crate::classify::Outcome;
use crate::report::RunReport;
use crate::util::display_path;
use anyhow::Result;
use std::path::Path;

/// Print the end-of-run summary: one line per metric, the per-scenario
/// table, soft-fail grouping, coverage gaps, and — when anything
/// hard-failed — a ready-to-paste reproduction command.
pub fn print_summary(report: &RunReport, report_path: Option<&Path>) {
    println!("seed:            {}", report.seed);
    println!("runtime:         {} ms", report.runtime_ms);
    println!("attempted:       {}", report.total_commands_attempted);
    println!("success:         {}", report.total_success);
    println!("soft-fail:       {}", report.total_soft_fail);
    println!("hard-fail:       {}", report.total_hard_fail);
    println!("disk usage:      {:.1} MiB", report.disk_usage_mb);
    if let Some(path) = report_path {
        println!("report:          {}", path.display());
    }

    println!();
    println!("scenarios:");
    // Working trees live next to the report; show them relative to it.
    let run_root = report_path.and_then(Path::parent);
    for scenario in &report.scenarios {
        let fallback = if scenario.parse_fallback {
            " (parse fallback)"
        } else {
            ""
        };
        println!(
            "  #{:<3} {:<9} {:<8} {:>3} commands{}  {}",
            scenario.scenario_index,
            scenario.status.as_str(),
            scenario.template.as_str(),
            scenario.commands.len(),
            fallback,
            display_path(Path::new(&scenario.repo_path), run_root),
        );
    }

    if !report.soft_fail_by_command.is_empty() {
        println!();
        println!("soft-fails by command:");
        for (key, count) in soft_fail_rows(report) {
            println!("  {count:>4}  {key}");
        }
    }

    let gaps = report.coverage_gaps();
    if !gaps.is_empty() {
        println!();
        println!("coverage gaps (attempted but never succeeded):");
        for surface in &gaps {
            println!("  - {surface}");
        }
    }

    if let Some(repro) = reproduction_command(report) {
        println!();
        println!("reproduce the first hard failure with:");
        println!("  {repro}");
    }
}

/// Soft-fail counts grouped by normalized command key, highest first.
pub fn soft_fail_rows(report: &RunReport) -> Vec<(String, u64)> {
    let mut rows: Vec<(String, u64)> = report
        .soft_fail_by_command
        .iter()
        .map(|(key, count)| (key.clone(), *count))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

/// Ready-to-paste reproduction command for the first failing scenario.
pub fn reproduction_command(report: &RunReport) -> Option<String> {
    let first = report.first_failing_scenario.as_ref()?;
    Some(shell_words::join([
        "epfuzz",
        "--seed",
        &first.seed.to_string(),
        "--only-scenario",
        &first.scenario_index.to_string(),
    ]))
}

/// Load an existing report and print its summary without running anything.
/// Returns the report so the caller can map it to an exit code.
pub fn analyze(path: &Path) -> Result<RunReport> {
    let report = RunReport::load(path)?;
    print_summary(&report, Some(path));
    Ok(report)
}

/// True when a loaded report alone should make the caller exit non-zero.
pub fn report_indicates_failure(report: &RunReport) -> bool {
    report.any_hard_fail()
        || report
            .scenarios
            .iter()
            .any(|scenario| scenario.status == Outcome::HardFail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FirstFailing, ReportBuilder};

    #[test]
    fn reproduction_command_uses_seed_and_index() {
        let mut report = ReportBuilder::new(42).unwrap().finalize(0).unwrap();
        assert!(reproduction_command(&report).is_none());
        report.first_failing_scenario = Some(FirstFailing {
            scenario_index: 3,
            seed: 42,
        });
        assert_eq!(
            reproduction_command(&report).unwrap(),
            "epfuzz --seed 42 --only-scenario 3"
        );
    }

    #[test]
    fn hard_fail_counts_indicate_failure() {
        let mut report = ReportBuilder::new(1).unwrap().finalize(0).unwrap();
        assert!(!report_indicates_failure(&report));
        report.total_hard_fail = 1;
        assert!(report_indicates_failure(&report));
    }

    #[test]
    fn analyze_round_trips_a_saved_report() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("report.json");
        let report = ReportBuilder::new(9).unwrap().finalize(0).unwrap();
        report.save(&path).unwrap();
        let loaded = analyze(&path).unwrap();
        assert_eq!(loaded.seed, 9);
        assert!(!report_indicates_failure(&loaded));
    }

    #[test]
    fn soft_fail_rows_sort_descending() {
        let mut report = ReportBuilder::new(1).unwrap().finalize(0).unwrap();
        report.soft_fail_by_command.insert("ep list".to_string(), 1);
        report.soft_fail_by_command.insert("ep search".to_string(), 5);
        report.soft_fail_by_command.insert("git commit".to_string(), 5);
        let rows = soft_fail_rows(&report);
        assert_eq!(rows[0].1, 5);
        assert_eq!(rows[2], ("ep list".to_string(), 1));
    }
}
