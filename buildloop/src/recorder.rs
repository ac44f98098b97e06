//! Per-target change recording: commit leftovers and log the audit diff.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::target::Target;
use crate::io::assistant::PatchInvoker;
use crate::io::config::CommitMode;
use crate::io::git::Git;

#[derive(Debug, Clone)]
pub struct RecordRequest<'a> {
    pub model: &'a str,
    pub target: &'a Target,
    /// HEAD before the target was touched.
    pub baseline: &'a str,
    pub mode: CommitMode,
}

/// What [`record`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// A commit was made for outstanding working-tree changes.
    pub committed: bool,
    /// HEAD after recording.
    pub head: String,
    /// HEAD differs from the baseline (either side may have committed).
    pub changed: bool,
}

pub fn commit_message(model: &str, target: &Target) -> String {
    format!("buildloop: model {model} target {target}")
}

/// Stage everything, commit if anything is staged, then log the baseline diff.
///
/// An empty status skips the commit, so recording twice in a row makes at
/// most one commit. The diff is advisory: failures are logged, not returned.
#[instrument(skip_all, fields(target = %request.target))]
pub fn record<I: PatchInvoker>(
    git: &Git,
    patcher: &I,
    request: &RecordRequest<'_>,
) -> Result<Recording> {
    git.add_all()?;
    let committed = if git.is_clean()? {
        info!("no changes to commit");
        false
    } else {
        match request.mode {
            CommitMode::Git => {
                let message = commit_message(request.model, request.target);
                git.commit(&message)?;
                info!(message = %message, "committed changes");
            }
            CommitMode::Assistant => {
                patcher.commit(git.workdir(), request.model)?;
                info!("assistant committed changes");
            }
        }
        true
    };

    let head = git.head_short_sha()?;
    let changed = head != request.baseline;
    if !changed {
        info!(sha = %head, "build-edit loop made no changes");
    } else {
        match git.diff(request.baseline, &head) {
            Ok(diff) => info!(
                baseline = request.baseline,
                head = %head,
                "changes made in the build-edit loop:\n{diff}"
            ),
            Err(err) => warn!(err = %err, "could not compute audit diff"),
        }
    }

    Ok(Recording {
        committed,
        head,
        changed,
    })
}
