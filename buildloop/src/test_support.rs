//! Test-only helpers: scripted tool doubles and throwaway git repositories.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::target::Target;
use crate::core::types::{BuildOutcome, BuildStep, PatchOutcome};
use crate::io::assistant::{PatchInvoker, PatchRequest};
use crate::io::build::BuildProbe;
use crate::io::git::{Git, Identity};

pub fn test_identity() -> Identity {
    Identity {
        name: "Build Loop Test".to_string(),
        email: "buildloop-test@local.invalid".to_string(),
    }
}

/// A real git repository in a temp dir with one initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        Self::with_packages(&[])
    }

    /// Repository whose packages each hold a `Cargo.toml` (git does not track
    /// empty directories).
    pub fn with_packages(packages: &[&str]) -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        let identity = test_identity();
        repo.git(&["config", "user.name", &identity.name])?;
        repo.git(&["config", "user.email", &identity.email])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# fixture\n")?;
        repo.write_file("MODULE.bazel", "module(name = \"fixture\")\n")?;
        for package in packages {
            let name = package.rsplit('/').next().unwrap_or(package);
            repo.write_file(
                &format!("{package}/Cargo.toml"),
                &format!("[package]\nname = \"{name}\"\n"),
            )?;
        }
        repo.commit_all("chore: fixture")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `file://` URL usable with `git clone --depth 1`.
    pub fn file_url(&self) -> String {
        format!("file://{}", self.path().display())
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        let git = Git::new(self.path());
        git.add_all()?;
        git.commit(message)
    }

    pub fn commit_count(&self) -> Result<usize> {
        count_commits(self.path())
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Number of commits reachable from HEAD in `dir`.
pub fn count_commits(dir: &Path) -> Result<usize> {
    let output = Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(dir)
        .output()
        .context("spawn git rev-list")?;
    if !output.status.success() {
        bail!("git rev-list failed");
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .context("parse commit count")
}

/// Write an executable shell script and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// Build probe that replays queued outcomes and records each call.
pub struct ScriptedProbe {
    queue: RefCell<VecDeque<BuildOutcome>>,
    fallback: Option<BuildOutcome>,
    calls: RefCell<Vec<(PathBuf, String)>>,
}

impl ScriptedProbe {
    pub fn new(outcomes: Vec<BuildOutcome>) -> Self {
        Self {
            queue: RefCell::new(outcomes.into()),
            fallback: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Probe that returns `outcome` forever.
    pub fn always(outcome: BuildOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Self::new(Vec::new())
        }
    }

    pub fn failing(diagnostics: &str) -> Self {
        Self::always(failed(diagnostics))
    }

    /// Labels probed, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(_, label)| label.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let remaining = self.queue.borrow().len();
        if remaining > 0 {
            return Err(anyhow!("{remaining} scripted build outcomes left"));
        }
        Ok(())
    }
}

impl BuildProbe for ScriptedProbe {
    fn probe(&self, workdir: &Path, target: &Target) -> Result<BuildOutcome> {
        self.calls
            .borrow_mut()
            .push((workdir.to_path_buf(), target.label()));
        if let Some(outcome) = self.queue.borrow_mut().pop_front() {
            return Ok(outcome);
        }
        self.fallback
            .clone()
            .ok_or_else(|| anyhow!("no scripted build outcome left for {target}"))
    }
}

/// Convenience constructor for a failed `build` outcome.
pub fn failed(diagnostics: &str) -> BuildOutcome {
    BuildOutcome::Failed {
        step: BuildStep::Build,
        diagnostics: diagnostics.to_string(),
    }
}

/// Convenience constructor for a failed `query` outcome.
pub fn failed_query(diagnostics: &str) -> BuildOutcome {
    BuildOutcome::Failed {
        step: BuildStep::Query,
        diagnostics: diagnostics.to_string(),
    }
}

/// One scripted assistant response.
#[derive(Debug, Clone)]
pub struct ScriptedPatch {
    pub outcome: PatchOutcome,
    /// Contents written to the request's descriptor before returning.
    pub edit: Option<String>,
    /// Commit the edit, the way aider auto-commits.
    pub commit: bool,
}

impl ScriptedPatch {
    pub fn applied() -> Self {
        Self {
            outcome: PatchOutcome::Applied,
            edit: None,
            commit: false,
        }
    }

    pub fn editing(contents: &str, commit: bool) -> Self {
        Self {
            outcome: PatchOutcome::Applied,
            edit: Some(contents.to_string()),
            commit,
        }
    }

    pub fn failing(exit_code: i32) -> Self {
        Self {
            outcome: PatchOutcome::Failed {
                exit_code: Some(exit_code),
                output: "assistant exploded".to_string(),
            },
            edit: None,
            commit: false,
        }
    }
}

/// What the scripted assistant was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPatch {
    pub model: String,
    pub target: String,
    pub descriptor: PathBuf,
    pub diagnostics: String,
    pub step: BuildStep,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Patch invoker that replays queued responses and records each request.
pub struct ScriptedPatcher {
    queue: RefCell<VecDeque<ScriptedPatch>>,
    fallback: Option<ScriptedPatch>,
    requests: RefCell<Vec<RecordedPatch>>,
    commits: RefCell<Vec<String>>,
}

impl ScriptedPatcher {
    pub fn new(patches: Vec<ScriptedPatch>) -> Self {
        Self {
            queue: RefCell::new(patches.into()),
            fallback: None,
            requests: RefCell::new(Vec::new()),
            commits: RefCell::new(Vec::new()),
        }
    }

    pub fn always(patch: ScriptedPatch) -> Self {
        Self {
            fallback: Some(patch),
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<RecordedPatch> {
        self.requests.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Models passed to [`PatchInvoker::commit`].
    pub fn commit_calls(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let remaining = self.queue.borrow().len();
        if remaining > 0 {
            return Err(anyhow!("{remaining} scripted patches left"));
        }
        Ok(())
    }
}

impl PatchInvoker for ScriptedPatcher {
    fn patch(&self, request: &PatchRequest<'_>) -> Result<PatchOutcome> {
        self.requests.borrow_mut().push(RecordedPatch {
            model: request.model.to_string(),
            target: request.target.label(),
            descriptor: request.descriptor.to_path_buf(),
            diagnostics: request.diagnostics.to_string(),
            step: request.step,
            attempt: request.attempt,
            max_attempts: request.max_attempts,
        });
        let next = self.queue.borrow_mut().pop_front();
        let patch = next
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("no scripted patch left for {}", request.target))?;

        if let Some(contents) = &patch.edit {
            let path = request.workdir.join(request.descriptor);
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
            if patch.commit {
                let git = Git::new(request.workdir).with_identity(Some(test_identity()));
                git.add_all()?;
                git.commit(&format!("assistant: edit {}", request.descriptor.display()))?;
            }
        }
        Ok(patch.outcome)
    }

    fn commit(&self, workdir: &Path, model: &str) -> Result<()> {
        self.commits.borrow_mut().push(model.to_string());
        let git = Git::new(workdir).with_identity(Some(test_identity()));
        git.add_all()?;
        if git.is_clean()? {
            return Ok(());
        }
        git.commit(&format!("assistant commit ({model})"))
    }
}
