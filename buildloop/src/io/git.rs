//! Git adapter for the harness.
//!
//! The workspace is cloned, branched, committed, and diffed through `git`
//! subprocesses, so we keep a small, explicit wrapper around those calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Author identity applied to commits via `-c user.name=... -c user.email=...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    identity: Option<Identity>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Shallow, single-branch clone of `url` into `dest`.
    ///
    /// Credentials embedded in `url` are masked in logs and error messages.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub fn clone_shallow(url: &str, dest: &Path) -> Result<Self> {
        let shown = redact_url(url);
        debug!(url = %shown, "cloning");
        let dest_arg = dest.to_string_lossy();
        let args = [
            "clone",
            "--depth",
            "1",
            "--single-branch",
            url,
            dest_arg.as_ref(),
        ];
        let output = Command::new("git")
            .args(args)
            .output()
            .with_context(|| format!("spawn git clone {shown}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git clone {shown} failed: {}",
                mask_secret(url, stderr.trim())
            ));
        }
        Ok(Self::new(dest))
    }

    /// Return the current branch name (`HEAD` when detached).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--short", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True when there are no staged, unstaged, or untracked changes.
    pub fn is_clean(&self) -> Result<bool> {
        let clean = self.status_porcelain()?.is_empty();
        debug!(clean, "checked worktree status");
        Ok(clean)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let output = self.run(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(anyhow!(
                "git show-ref for {branch} failed with status {code:?}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit whatever is staged.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(())
    }

    /// Patch text between two revisions.
    pub fn diff(&self, from: &str, to: &str) -> Result<String> {
        self.run_capture(&["diff", from, to])
    }

    /// Stash dirty and untracked files; returns git's message (which is
    /// printed even when there was nothing to stash).
    #[instrument(skip_all)]
    pub fn stash_push(&self, message: &str) -> Result<String> {
        let out = self.run_capture(&["stash", "push", "-u", "-m", message])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = %args.join(" "), "git command failed");
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    /// Every invocation carries the identity override, since `stash` writes
    /// commits too.
    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        if let Some(identity) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", identity.name))
                .arg("-c")
                .arg(format!("user.email={}", identity.email));
        }
        cmd.args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// `url` with any password replaced by `***`.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // Only fails for cannot-be-a-base URLs, which cannot carry a password.
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

fn mask_secret(url: &str, text: &str) -> String {
    match Url::parse(url).ok().and_then(|u| u.password().map(str::to_string)) {
        Some(password) if !password.is_empty() => text.replace(&password, "***"),
        _ => text.to_string(),
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
