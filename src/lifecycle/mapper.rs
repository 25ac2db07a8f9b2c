//! Status vocabulary translation. Pure, total, no I/O.
//!
//! Unknown inputs always land on the most conservative non-passing value
//! (`blocked`), never on an error.

use serde::Serialize;

use crate::store::models::TestCaseStatus;

/// Remote job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobPhase {
    Submitted,
    Polling,
    Done,
    Incomplete,
    Cancelled,
}

impl JobPhase {
    pub(crate) fn from_remote_state(state: &str) -> Self {
        match normalize(state).as_str() {
            "scheduled" | "assigned" => JobPhase::Submitted,
            "done" => JobPhase::Done,
            "incomplete" => JobPhase::Incomplete,
            "cancelled" | "canceled" => JobPhase::Cancelled,
            _ => JobPhase::Polling,
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Done | JobPhase::Incomplete | JobPhase::Cancelled
        )
    }
}

/// Result code understood by TestLink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UpstreamCode {
    Pass,
    Fail,
    Blocked,
    #[serde(rename = "not run")]
    NotRun,
}

impl UpstreamCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            UpstreamCode::Pass => "pass",
            UpstreamCode::Fail => "fail",
            UpstreamCode::Blocked => "blocked",
            UpstreamCode::NotRun => "not run",
        }
    }

    /// Single-letter status code on the TestLink wire.
    pub(crate) fn wire_code(self) -> &'static str {
        match self {
            UpstreamCode::Pass => "p",
            UpstreamCode::Fail => "f",
            UpstreamCode::Blocked => "b",
            UpstreamCode::NotRun => "n",
        }
    }
}

/// Local status for an observed remote job.
pub(crate) fn local_status(phase: JobPhase, result: Option<&str>) -> TestCaseStatus {
    if !phase.is_terminal() {
        return TestCaseStatus::Running;
    }
    match result.map(normalize).as_deref() {
        Some("passed") => TestCaseStatus::Passed,
        Some("failed") => TestCaseStatus::Failed,
        Some("skipped") => TestCaseStatus::Skipped,
        _ => TestCaseStatus::Blocked,
    }
}

/// Upstream code for a terminal remote result.
pub(crate) fn upstream_code(result: &str) -> UpstreamCode {
    match normalize(result).as_str() {
        "passed" => UpstreamCode::Pass,
        "failed" => UpstreamCode::Fail,
        "skipped" => UpstreamCode::NotRun,
        _ => UpstreamCode::Blocked,
    }
}

/// Upstream code for a local status.
#[cfg(test)]
fn upstream_code_for_status(status: TestCaseStatus) -> UpstreamCode {
    match status {
        TestCaseStatus::Passed => UpstreamCode::Pass,
        TestCaseStatus::Failed => UpstreamCode::Fail,
        TestCaseStatus::Skipped => UpstreamCode::NotRun,
        TestCaseStatus::Blocked | TestCaseStatus::Pending | TestCaseStatus::Running => {
            UpstreamCode::Blocked
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
