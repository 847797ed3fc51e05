//! Three-way outcome taxonomy for command invocations.
//!
//! Classification is a pure decision function: outcomes are data, never
//! errors, so one misbehaving command can never abort a run. The clause
//! order is load-bearing — expectation flags must short-circuit before the
//! generic exit-code checks or intentional negative tests would be
//! misclassified.
use crate::mutate::BREAK_MARKER;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Outcome of one command invocation.
///
/// The ordering is the severity lattice used for worst-of aggregation:
/// hard-fail dominates soft-fail dominates success.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    SoftFail,
    HardFail,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::SoftFail => "soft-fail",
            Outcome::HardFail => "hard-fail",
        }
    }
}

/// Expectation flags attached to a single invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyOptions {
    /// This command is an intentional negative test: non-zero exit is the
    /// designed result.
    pub expect_failure: bool,
    /// This command is deliberately started and killed on deadline (dev
    /// server); a timeout is the designed result.
    pub expect_timeout: bool,
}

/// Map one finished invocation to its outcome.
pub fn classify(
    exit_code: i32,
    timed_out: bool,
    stderr: &str,
    stdout: &str,
    opts: ClassifyOptions,
) -> Outcome {
    if opts.expect_failure {
        // The negative test "fails" only by succeeding.
        return if !timed_out && exit_code == 0 {
            Outcome::SoftFail
        } else {
            Outcome::Success
        };
    }
    if timed_out {
        return if opts.expect_timeout {
            Outcome::SoftFail
        } else {
            Outcome::HardFail
        };
    }
    if exit_code == 0 {
        return Outcome::Success;
    }
    if is_expected_externality(stderr) || is_expected_externality(stdout) {
        return Outcome::SoftFail;
    }
    Outcome::HardFail
}

/// Substrings that mark a non-zero exit as attributable to an external or
/// intentionally-provoked condition rather than a regression in the tool.
/// Only phrases distinctive enough to not occur inside unrelated tokens
/// belong here; short tokens go through the word-boundary regex below.
const EXTERNAL_FINGERPRINTS: &[&str] = &[
    // HTTP-level auth / availability / throttling
    "unauthorized",
    "forbidden",
    "not found",
    "too many requests",
    "rate limit",
    // network plumbing
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "eai_again",
    "getaddrinfo",
    "socket hang up",
    "network error",
    "fetch failed",
    "connection refused",
    // version control noise
    "nothing to commit",
    // intentional break mutations and their test/type-check fallout
    "assertionerror",
    "tests failed",
    "test failed",
    "typecheck failed",
];

/// Short tokens that would match inside unrelated text as bare substrings
/// ("line 4041", "dnsmasq", "unfailingly"), anchored on word boundaries.
fn short_fingerprint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(401|403|404|429|dns|failing)\b").unwrap())
}

fn http_5xx_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(http|status(\s+code)?)\b[^\n]{0,16}\b5\d\d\b|\b5\d\d\s+(internal server error|bad gateway|service unavailable|gateway timeout)\b",
        )
        .unwrap()
    })
}

/// True when the text matches a known external/expected failure fingerprint.
pub fn is_expected_externality(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    if lower.contains(&BREAK_MARKER.to_lowercase()) {
        return true;
    }
    if EXTERNAL_FINGERPRINTS
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return true;
    }
    if short_fingerprint_regex().is_match(&lower) {
        return true;
    }
    http_5xx_regex().is_match(&lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(expect_failure: bool, expect_timeout: bool) -> ClassifyOptions {
        ClassifyOptions {
            expect_failure,
            expect_timeout,
        }
    }

    #[test]
    fn clean_zero_exit_is_success() {
        assert_eq!(
            classify(0, false, "", "", ClassifyOptions::default()),
            Outcome::Success
        );
    }

    #[test]
    fn auth_error_is_soft_fail() {
        assert_eq!(
            classify(1, false, "401 Unauthorized", "", ClassifyOptions::default()),
            Outcome::SoftFail
        );
    }

    #[test]
    fn unrecognized_failure_is_hard_fail() {
        assert_eq!(
            classify(1, false, "segfault", "", ClassifyOptions::default()),
            Outcome::HardFail
        );
    }

    #[test]
    fn expected_failure_with_nonzero_exit_is_success() {
        assert_eq!(classify(1, false, "", "", opts(true, false)), Outcome::Success);
    }

    #[test]
    fn expected_failure_that_succeeds_is_soft_fail() {
        assert_eq!(classify(0, false, "", "", opts(true, false)), Outcome::SoftFail);
    }

    #[test]
    fn expected_failure_short_circuits_timeout() {
        assert_eq!(classify(-1, true, "", "", opts(true, false)), Outcome::Success);
    }

    #[test]
    fn expected_timeout_is_soft_fail() {
        assert_eq!(classify(-1, true, "", "", opts(false, true)), Outcome::SoftFail);
        assert_eq!(classify(0, true, "", "", opts(false, true)), Outcome::SoftFail);
    }

    #[test]
    fn unexpected_timeout_is_hard_fail() {
        assert_eq!(
            classify(-1, true, "", "", ClassifyOptions::default()),
            Outcome::HardFail
        );
    }

    #[test]
    fn network_errors_are_soft_fail() {
        for text in [
            "request to https://registry failed: ECONNREFUSED",
            "getaddrinfo ENOTFOUND api.example.com",
            "HTTP 503 Service Unavailable",
            "status code 502",
            "rate limit exceeded, retry later",
        ] {
            assert_eq!(
                classify(1, false, text, "", ClassifyOptions::default()),
                Outcome::SoftFail,
                "expected soft-fail for {text:?}"
            );
        }
    }

    #[test]
    fn short_fingerprints_require_word_boundaries() {
        for text in [
            "error at line 4041",
            "dnsmasq failed to restart",
            "unfailingly broken state",
        ] {
            assert_eq!(
                classify(1, false, text, "", ClassifyOptions::default()),
                Outcome::HardFail,
                "expected hard-fail for {text:?}"
            );
        }
        for text in ["HTTP 404", "dns resolution error", "1 failing", "429 from registry"] {
            assert_eq!(
                classify(1, false, text, "", ClassifyOptions::default()),
                Outcome::SoftFail,
                "expected soft-fail for {text:?}"
            );
        }
    }

    #[test]
    fn intentional_break_fallout_is_soft_fail() {
        let stderr = format!("1) index spec\n   {BREAK_MARKER} is not defined");
        assert_eq!(
            classify(2, false, &stderr, "", ClassifyOptions::default()),
            Outcome::SoftFail
        );
    }

    #[test]
    fn nothing_to_commit_is_soft_fail() {
        assert_eq!(
            classify(1, false, "", "nothing to commit, working tree clean", ClassifyOptions::default()),
            Outcome::SoftFail
        );
    }

    #[test]
    fn worst_of_ordering_holds() {
        assert!(Outcome::HardFail > Outcome::SoftFail);
        assert!(Outcome::SoftFail > Outcome::Success);
        assert_eq!(
            Outcome::Success.max(Outcome::SoftFail).max(Outcome::Success),
            Outcome::SoftFail
        );
    }
}
