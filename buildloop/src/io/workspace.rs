//! Ephemeral workspace creation and preparation.
//!
//! Each model run gets a fresh shallow clone inside a temp directory. The
//! directory is owned by [`Workspace`] and removed when it is dropped, so
//! every exit path (success, exhaustion, `?` early return, unwinding panic)
//! cleans up.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{debug, info, instrument};
use url::Url;

use crate::core::naming::{branch_name, workspace_prefix};
use crate::core::target::Target;
use crate::io::config::AuthConfig;
use crate::io::git::{Git, Identity, redact_url};

/// Contents written to a build descriptor the checkout did not have.
pub const PLACEHOLDER_CONTENTS: &str = "# created by buildloop\n";

/// A cloned repository in a temp directory.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    git: Git,
    branch: Option<String>,
}

impl Workspace {
    /// Clone `clone_url` into a new temp dir under `root` (system temp dir when `None`).
    ///
    /// `repo_url` is the credential-free URL used to name the directory.
    #[instrument(skip_all, fields(repo = %redact_url(repo_url)))]
    pub fn clone_into(
        root: Option<&Path>,
        repo_url: &str,
        clone_url: &str,
        identity: Option<Identity>,
    ) -> Result<Self> {
        let prefix = workspace_prefix(repo_url);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)
                    .with_context(|| format!("create workspace root {}", root.display()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .context("create workspace dir")?;

        info!(workspace = %dir.path().display(), "cloning repository");
        let git = Git::clone_shallow(clone_url, dir.path())?.with_identity(identity);
        info!(workspace = %dir.path().display(), "cloned repository");
        Ok(Self {
            dir,
            git,
            branch: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Branch created by [`Workspace::create_branch`], if any.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Check out a fresh `<model>-<timestamp>` branch so run commits stay off
    /// the default branch.
    pub fn create_branch(&mut self, model: &str, now: DateTime<Utc>) -> Result<String> {
        let branch = branch_name(model, now);
        if self.git.branch_exists(&branch)? {
            return Err(anyhow!("branch {branch} already exists in workspace"));
        }
        let base = self.git.current_branch()?;
        self.git
            .checkout_new_branch(&branch)
            .with_context(|| format!("checkout branch {branch}"))?;
        info!(branch = %branch, base = %base, "checked out run branch");
        self.branch = Some(branch.clone());
        Ok(branch)
    }

    /// See [`ensure_descriptor`].
    pub fn ensure_descriptor(&self, target: &Target, file_name: &str) -> Result<PathBuf> {
        ensure_descriptor(self.path(), target, file_name)
    }

    /// Remove the workspace now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("remove workspace {}", path.display()))
    }
}

/// Make sure the target's package has a build descriptor the assistant can edit.
///
/// Returns the workspace-relative descriptor path. The package directory must
/// already exist in the checkout; a missing descriptor is created holding only
/// [`PLACEHOLDER_CONTENTS`].
#[instrument(skip_all, fields(target = %target))]
pub fn ensure_descriptor(root: &Path, target: &Target, file_name: &str) -> Result<PathBuf> {
    let package_dir = root.join(target.package());
    if !package_dir.is_dir() {
        return Err(anyhow!(
            "package directory '{}' for target {} does not exist",
            target.package(),
            target
        ));
    }
    let relative = target.descriptor_path(file_name);
    let absolute = root.join(&relative);
    if absolute.exists() {
        debug!(descriptor = %relative.display(), "descriptor already present");
        return Ok(relative);
    }
    fs::write(&absolute, PLACEHOLDER_CONTENTS)
        .with_context(|| format!("create {}", absolute.display()))?;
    info!(descriptor = %relative.display(), "created placeholder descriptor");
    Ok(relative)
}

/// Clone URL with credentials from the environment injected as userinfo.
///
/// Returns `repo_url` unchanged when auth is disabled. A missing variable is
/// an error.
pub fn authenticated_url<F>(repo_url: &str, auth: &AuthConfig, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !auth.enabled {
        return Ok(repo_url.to_string());
    }
    let username = lookup(&auth.username_env)
        .ok_or_else(|| anyhow!("did not find {} in env", auth.username_env))?;
    let token = lookup(&auth.token_env)
        .ok_or_else(|| anyhow!("did not find {} in env", auth.token_env))?;

    let mut url = Url::parse(repo_url).with_context(|| format!("parse url {repo_url}"))?;
    url.set_username(&username)
        .map_err(|_| anyhow!("cannot set username on url {repo_url}"))?;
    url.set_password(Some(&token))
        .map_err(|_| anyhow!("cannot set password on url {repo_url}"))?;
    Ok(url.to_string())
}
