//! Build-edit retry loop for a single target.
//!
//! Probe once for free; while the target fails and attempts remain, hand the
//! latest diagnostics to the assistant and probe again. The probe after the
//! last attempt is the final verification, so a target costs at most
//! `attempts + 1` probes and `attempts` assistant invocations.

use std::path::Path;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::target::Target;
use crate::core::types::{BuildOutcome, BuildStep, PatchOutcome, TargetReport, TargetStatus};
use crate::io::assistant::{PatchInvoker, PatchRequest};
use crate::io::build::BuildProbe;
use crate::io::config::{HarnessConfig, PatchFailurePolicy};
use crate::io::git::Git;

const STASH_MESSAGE: &str = "buildloop-temp-stash";

/// Loop bounds and failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Assistant invocations allowed per target (must be >= 1).
    pub attempts: u32,
    pub on_patch_failure: PatchFailurePolicy,
    /// Stash leftovers after a failed probe before the next attempt.
    pub stash_on_failure: bool,
}

impl From<&HarnessConfig> for RetryPolicy {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            attempts: config.attempts,
            on_patch_failure: config.on_patch_failure,
            stash_on_failure: config.stash_on_failure,
        }
    }
}

/// The assistant exited non-zero under [`PatchFailurePolicy::Abort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("assistant failed for {target} on attempt {attempt} (exit code {exit_code:?})")]
pub struct PatchFailedError {
    pub target: String,
    pub attempt: u32,
    pub exit_code: Option<i32>,
}

/// One target to drive through the loop.
#[derive(Debug, Clone)]
pub struct TargetRequest<'a> {
    pub workdir: &'a Path,
    pub model: &'a str,
    pub target: &'a Target,
    /// Workspace-relative build descriptor the assistant may edit.
    pub descriptor: &'a Path,
}

/// Run the build-edit loop for one target.
///
/// Returns `Err` for environment failures (a tool could not launch, git
/// broke) and for [`PatchFailedError`] under the abort policy. An exhausted
/// target is `Ok` with [`TargetStatus::Exhausted`].
#[instrument(skip_all, fields(target = %request.target, model = request.model))]
pub fn run_target<P: BuildProbe, I: PatchInvoker>(
    probe: &P,
    patcher: &I,
    git: &Git,
    request: &TargetRequest<'_>,
    policy: &RetryPolicy,
) -> Result<TargetReport> {
    let target = request.target;
    let mut report = TargetReport {
        target: target.clone(),
        status: TargetStatus::Exhausted,
        attempts: 0,
        probes: 0,
        patches: 0,
        commit: None,
    };

    let mut outcome = probe.probe(request.workdir, target)?;
    report.probes += 1;
    if outcome.is_success() {
        info!("pre-check build succeeded, skipping assistant");
        report.status = TargetStatus::AlreadyPassing;
        return Ok(report);
    }
    info!("pre-check build failed, invoking assistant");

    for attempt in 1..=policy.attempts {
        report.attempts = attempt;
        let (step, diagnostics) = match &outcome {
            BuildOutcome::Failed { step, diagnostics } => (*step, diagnostics.clone()),
            BuildOutcome::Succeeded => (BuildStep::Build, String::new()),
        };

        let before = git.head_short_sha()?;
        let patch = patcher.patch(&PatchRequest {
            workdir: request.workdir,
            model: request.model,
            target,
            descriptor: request.descriptor,
            diagnostics: &diagnostics,
            step,
            attempt,
            max_attempts: policy.attempts,
        })?;
        match patch {
            PatchOutcome::Applied => {
                report.patches += 1;
                info!(attempt, max_attempts = policy.attempts, "assistant completed");
            }
            PatchOutcome::Failed { exit_code, .. } => match policy.on_patch_failure {
                PatchFailurePolicy::Abort => {
                    return Err(PatchFailedError {
                        target: target.label(),
                        attempt,
                        exit_code,
                    }
                    .into());
                }
                PatchFailurePolicy::Retry => {
                    warn!(
                        attempt,
                        max_attempts = policy.attempts,
                        exit_code = ?exit_code,
                        "assistant failed, consuming attempt"
                    );
                }
            },
        }
        log_assistant_changes(git, &before)?;

        outcome = probe.probe(request.workdir, target)?;
        report.probes += 1;
        if outcome.is_success() {
            info!(attempt, "build succeeded");
            report.status = TargetStatus::Passed;
            return Ok(report);
        }

        if policy.stash_on_failure && attempt < policy.attempts {
            let message = git.stash_push(STASH_MESSAGE)?;
            info!(attempt, "stashed leftovers before next attempt: {message}");
        }
    }

    warn!(
        attempts = policy.attempts,
        "target still failing after final verification:\n{}",
        outcome.diagnostics().unwrap_or_default()
    );
    Ok(report)
}

/// Log what the assistant committed since `before`. A zero diff is normal.
fn log_assistant_changes(git: &Git, before: &str) -> Result<()> {
    let after = git.head_short_sha()?;
    if before == after {
        info!(sha = %after, "assistant committed no changes");
        return Ok(());
    }
    match git.diff(before, &after) {
        Ok(diff) => info!(before, after = %after, "changes made by assistant:\n{diff}"),
        Err(err) => warn!(err = %err, "could not diff assistant changes"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_support::{
        ScriptedPatch, ScriptedPatcher, ScriptedProbe, TestRepo, failed, failed_query,
    };

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            on_patch_failure: PatchFailurePolicy::Retry,
            stash_on_failure: false,
        }
    }

    #[test]
    fn passing_target_never_invokes_assistant() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let target = Target::parse("//:ripgrep").expect("parse");
        let descriptor = PathBuf::from("BUILD.bazel");
        let probe = ScriptedProbe::always(BuildOutcome::Succeeded);
        let patcher = ScriptedPatcher::new(Vec::new());

        let report = run_target(
            &probe,
            &patcher,
            &git,
            &TargetRequest {
                workdir: repo.path(),
                model: "m",
                target: &target,
                descriptor: &descriptor,
            },
            &policy(3),
        )
        .expect("run");

        assert_eq!(report.status, TargetStatus::AlreadyPassing);
        assert_eq!(report.probes, 1);
        assert_eq!(patcher.call_count(), 0);
    }

    #[test]
    fn diagnostics_from_latest_probe_feed_next_prompt() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let target = Target::parse("//:ripgrep").expect("parse");
        let descriptor = PathBuf::from("BUILD.bazel");
        let probe = ScriptedProbe::new(vec![
            failed_query("first failure"),
            failed("second failure"),
            BuildOutcome::Succeeded,
        ]);
        let patcher = ScriptedPatcher::always(ScriptedPatch::applied());

        let report = run_target(
            &probe,
            &patcher,
            &git,
            &TargetRequest {
                workdir: repo.path(),
                model: "m",
                target: &target,
                descriptor: &descriptor,
            },
            &policy(3),
        )
        .expect("run");

        assert_eq!(report.status, TargetStatus::Passed);
        assert_eq!(report.attempts, 2);
        let diagnostics: Vec<String> = patcher
            .requests()
            .into_iter()
            .map(|r| r.diagnostics)
            .collect();
        assert_eq!(diagnostics, vec!["first failure", "second failure"]);
        let steps: Vec<BuildStep> = patcher.requests().into_iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![BuildStep::Query, BuildStep::Build]);
        probe.assert_drained().expect("drained");
    }
}
