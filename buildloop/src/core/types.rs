//! Outcome and report types shared by the loop, the recorder and the CLI.

use std::fmt;

use crate::core::target::Target;

/// Build tool subcommand a probe ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// Label resolution only (`query`).
    Query,
    Build,
}

impl BuildStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one build probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    /// The build tool ran but the target did not resolve or compile.
    Failed { step: BuildStep, diagnostics: String },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed { diagnostics, .. } => Some(diagnostics),
        }
    }

    /// The subcommand whose failure this is.
    pub fn failed_step(&self) -> Option<BuildStep> {
        match self {
            Self::Succeeded => None,
            Self::Failed { step, .. } => Some(*step),
        }
    }
}

/// Result of one assistant invocation. Says nothing about whether the build
/// now passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Failed {
        exit_code: Option<i32>,
        output: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Built after at least one patch attempt.
    Passed,
    /// Built on the pre-check probe; the assistant was never invoked.
    AlreadyPassing,
    /// Still failing after the final verification probe.
    Exhausted,
}

impl TargetStatus {
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Exhausted)
    }
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: Target,
    pub status: TargetStatus,
    /// Patch attempts consumed (including failed assistant invocations).
    pub attempts: u32,
    /// Build probes issued, including the pre-check and final verification.
    pub probes: u32,
    /// Assistant invocations that exited successfully.
    pub patches: u32,
    /// Short SHA of the commit recorded for this target, if any.
    pub commit: Option<String>,
}

/// Aggregated outcome for one model's pass over the target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub model: String,
    pub branch: Option<String>,
    pub reports: Vec<TargetReport>,
}

impl RunSummary {
    pub fn failed(&self) -> Vec<&TargetReport> {
        self.reports
            .iter()
            .filter(|report| !report.status.is_success())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.reports.iter().all(|report| report.status.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(label: &str, status: TargetStatus) -> TargetReport {
        TargetReport {
            target: Target::parse(label).expect("parse"),
            status,
            attempts: 0,
            probes: 1,
            patches: 0,
            commit: None,
        }
    }

    #[test]
    fn summary_lists_exhausted_targets() {
        let summary = RunSummary {
            model: "m".to_string(),
            branch: None,
            reports: vec![
                report("//:a", TargetStatus::AlreadyPassing),
                report("//:b", TargetStatus::Exhausted),
                report("//:c", TargetStatus::Passed),
            ],
        };
        assert!(!summary.is_success());
        let failed: Vec<String> = summary.failed().iter().map(|r| r.target.label()).collect();
        assert_eq!(failed, vec!["//:b"]);
    }

    #[test]
    fn diagnostics_only_on_failure() {
        assert_eq!(BuildOutcome::Succeeded.diagnostics(), None);
        assert_eq!(BuildOutcome::Succeeded.failed_step(), None);
        let failed = BuildOutcome::Failed {
            step: BuildStep::Query,
            diagnostics: "ERROR: no such package".to_string(),
        };
        assert_eq!(failed.diagnostics(), Some("ERROR: no such package"));
        assert_eq!(failed.failed_step(), Some(BuildStep::Query));
        assert_eq!(BuildStep::Query.to_string(), "query");
    }
}
