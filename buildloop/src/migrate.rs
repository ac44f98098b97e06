//! Run orchestration: workspace per model, build-edit loop per target.

use anyhow::{Context, Result};
use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::controller::{PatchFailedError, RetryPolicy, TargetRequest, run_target};
use crate::core::types::{RunSummary, TargetReport};
use crate::io::assistant::PatchInvoker;
use crate::io::build::BuildProbe;
use crate::io::config::{ExhaustionPolicy, HarnessConfig};
use crate::io::workspace::{Workspace, authenticated_url};
use crate::recorder::{RecordRequest, record};

/// A target was still failing after its last attempt under
/// [`ExhaustionPolicy::Abort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not build {target} with model {model} after {attempts} attempts")]
pub struct TargetExhaustedError {
    pub model: String,
    pub target: String,
    pub attempts: u32,
}

/// Context attached to an aborting error, carrying every summary gathered so
/// far. The last one is partial and ends at the target that stopped the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run aborted")]
pub struct RunAborted {
    pub summaries: Vec<RunSummary>,
}

/// Migrate every configured target once per configured model.
///
/// `env` resolves credential variables. Models run one after another, each in
/// its own freshly cloned workspace which is removed before the next starts.
pub fn migrate<P, I, F>(
    config: &HarnessConfig,
    probe: &P,
    patcher: &I,
    env: F,
) -> Result<Vec<RunSummary>>
where
    P: BuildProbe,
    I: PatchInvoker,
    F: Fn(&str) -> Option<String>,
{
    config.validate()?;
    let clone_url = authenticated_url(&config.repo_url, &config.auth, &env)?;
    let mut summaries = Vec::with_capacity(config.models.len());
    for model in &config.models {
        match migrate_model(config, model, &clone_url, probe, patcher) {
            Ok(summary) => summaries.push(summary),
            Err(mut err) => {
                if let Some(aborted) = err.downcast_mut::<RunAborted>() {
                    aborted.summaries.splice(0..0, summaries);
                }
                return Err(err);
            }
        }
    }
    Ok(summaries)
}

/// One model's pass over the target list.
#[instrument(skip_all, fields(model = %model))]
pub fn migrate_model<P: BuildProbe, I: PatchInvoker>(
    config: &HarnessConfig,
    model: &str,
    clone_url: &str,
    probe: &P,
    patcher: &I,
) -> Result<RunSummary> {
    let mut workspace = Workspace::clone_into(
        config.workspace_root.as_deref(),
        &config.repo_url,
        clone_url,
        config.identity.clone(),
    )
    .context("prepare workspace")?;
    let branch = if config.create_branch {
        Some(workspace.create_branch(model, Utc::now())?)
    } else {
        None
    };

    let policy = RetryPolicy::from(config);
    let mut reports = Vec::with_capacity(config.targets.len());
    for target in &config.targets {
        info!(target = %target, "migrating target");
        let git = workspace.git();
        let baseline = git.head_short_sha()?;
        let descriptor = workspace
            .ensure_descriptor(target, &config.assistant.descriptor_file)
            .with_context(|| format!("prepare build descriptor for {target}"))?;

        let request = TargetRequest {
            workdir: workspace.path(),
            model,
            target,
            descriptor: &descriptor,
        };
        let mut report = match run_target(probe, patcher, git, &request, &policy) {
            Ok(report) => report,
            Err(err) if err.is::<PatchFailedError>() => {
                return Err(err.context(aborted(model, branch, reports)));
            }
            Err(err) => return Err(err),
        };
        let recording = record(
            git,
            patcher,
            &RecordRequest {
                model,
                target,
                baseline: &baseline,
                mode: config.commit_mode,
            },
        )?;
        report.commit = recording.changed.then_some(recording.head);

        info!(
            target = %target,
            status = ?report.status,
            attempts = report.attempts,
            probes = report.probes,
            commit = ?report.commit,
            "target finished"
        );
        let exhausted = !report.status.is_success();
        let attempts = report.attempts;
        reports.push(report);
        if exhausted {
            match config.on_exhaustion {
                ExhaustionPolicy::Abort => {
                    let err = anyhow::Error::new(TargetExhaustedError {
                        model: model.to_string(),
                        target: target.label(),
                        attempts,
                    });
                    return Err(err.context(aborted(model, branch, reports)));
                }
                ExhaustionPolicy::Continue => {
                    warn!(target = %target, "could not build target, continuing");
                }
            }
        }
    }

    workspace.close()?;
    Ok(RunSummary {
        model: model.to_string(),
        branch,
        reports,
    })
}

fn aborted(model: &str, branch: Option<String>, reports: Vec<TargetReport>) -> RunAborted {
    RunAborted {
        summaries: vec![RunSummary {
            model: model.to_string(),
            branch,
            reports,
        }],
    }
}
