//! Shape checks over successful command output.
//!
//! A zero exit code with empty or garbage stdout is a real bug class; these
//! pure functions catch it. They are deliberately conservative: a false
//! rejection reclassifies a genuinely-successful command as a failure, which
//! is worse than letting marginal output through.

/// Result of a single output-shape check.
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub passed: bool,
    pub reason: Option<String>,
}

impl ValidationCheck {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

fn non_blank_lines(text: &str) -> usize {
    text.lines().filter(|line| !line.trim().is_empty()).count()
}

/// `list` should print at least one non-blank row.
pub fn validate_list_output(stdout: &str) -> ValidationCheck {
    if non_blank_lines(stdout) == 0 {
        return ValidationCheck::fail("list printed no rows");
    }
    ValidationCheck::pass()
}

/// `search` should print something, even if only a result count.
pub fn validate_search_output(stdout: &str) -> ValidationCheck {
    if stdout.trim().is_empty() {
        return ValidationCheck::fail("search printed nothing");
    }
    ValidationCheck::pass()
}

/// `show` should print a multi-line detail view, not a bare echo.
pub fn validate_show_output(stdout: &str) -> ValidationCheck {
    if stdout.trim().is_empty() {
        return ValidationCheck::fail("show printed nothing");
    }
    if non_blank_lines(stdout) < 2 {
        return ValidationCheck::fail("show output has no body");
    }
    ValidationCheck::pass()
}

/// `install list` should print at least a header or an explicit empty notice.
pub fn validate_install_list_output(stdout: &str) -> ValidationCheck {
    if stdout.trim().is_empty() {
        return ValidationCheck::fail("install list printed nothing");
    }
    ValidationCheck::pass()
}

/// `skills validate` after a fix must not still be reporting problems.
///
/// This is the one validator that also sees stderr: validators commonly
/// report findings there while exiting zero.
pub fn validate_skills_after_fix(stdout: &str, stderr: &str) -> ValidationCheck {
    let combined = format!("{stdout}\n{stderr}").to_lowercase();
    if combined.contains("invalid") || combined.contains("validation failed") {
        return ValidationCheck::fail("skills validate still reports problems after fix");
    }
    ValidationCheck::pass()
}

/// Known "this is an expected non-data condition" wordings.
///
/// When a validator rejects output that also matches one of these, the
/// reclassification is downgraded from hard-fail to soft-fail: the tool is
/// telling us (correctly) that there is nothing to show, which is an
/// externality, not a defect.
const BENIGN_NON_DATA: &[&str] = &[
    "login required",
    "log in",
    "not logged in",
    "unauthorized",
    "not found",
    "no results",
    "0 results",
    "no patterns",
    "no matches",
    "nothing installed",
    "no skills",
];

pub fn benign_non_data(text: &str) -> bool {
    let lower = text.to_lowercase();
    BENIGN_NON_DATA.iter().any(|needle| lower.contains(needle))
}
