//! Patch invoker abstraction for the coding assistant.
//!
//! The [`PatchInvoker`] trait decouples the retry loop from the actual
//! assistant backend (currently `aider`). Tests use scripted invokers that
//! return predetermined outcomes without spawning processes.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::target::Target;
use crate::core::types::{BuildStep, PatchOutcome};
use crate::io::config::AssistantConfig;
use crate::io::process::{CommandRequest, run_command};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Parameters for one patch attempt.
#[derive(Debug, Clone)]
pub struct PatchRequest<'a> {
    /// Workspace the assistant runs in.
    pub workdir: &'a Path,
    pub model: &'a str,
    pub target: &'a Target,
    /// Workspace-relative build descriptor the assistant may edit.
    pub descriptor: &'a Path,
    /// Combined output of the latest failed probe, embedded verbatim.
    pub diagnostics: &'a str,
    /// Subcommand that produced `diagnostics`.
    pub step: BuildStep,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Abstraction over assistant backends.
///
/// `Err` means the assistant could not be launched at all; a non-zero exit is
/// `Ok(PatchOutcome::Failed { .. })` so the caller's policy decides.
pub trait PatchInvoker {
    fn patch(&self, request: &PatchRequest<'_>) -> Result<PatchOutcome>;

    /// Have the assistant author a commit for outstanding changes.
    fn commit(&self, workdir: &Path, model: &str) -> Result<()>;
}

impl<T: PatchInvoker + ?Sized> PatchInvoker for &T {
    fn patch(&self, request: &PatchRequest<'_>) -> Result<PatchOutcome> {
        (**self).patch(request)
    }

    fn commit(&self, workdir: &Path, model: &str) -> Result<()> {
        (**self).commit(workdir, model)
    }
}

/// Invoker that spawns `aider` with its home directory redirected to a
/// private temp dir, removed when the invoker is dropped.
#[derive(Debug)]
pub struct AiderInvoker {
    config: AssistantConfig,
    build_tool: String,
    prompt: PromptBuilder,
    home: TempDir,
}

impl AiderInvoker {
    pub fn new(config: AssistantConfig, build_tool: impl Into<String>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("buildloop-assistant-");
        let home = match &config.home_root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("create assistant home root {}", root.display()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .context("create assistant home")?;
        debug!(home = %home.path().display(), "assistant home ready");
        Ok(Self {
            prompt: PromptBuilder::new(config.prompt_budget_bytes),
            config,
            build_tool: build_tool.into(),
            home,
        })
    }

    /// Ephemeral `HOME` handed to every assistant process.
    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Remove the assistant home now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<()> {
        let path = self.home.path().to_path_buf();
        self.home
            .close()
            .with_context(|| format!("remove assistant home {}", path.display()))
    }

    /// Argument list for one patch attempt.
    pub fn patch_args(&self, request: &PatchRequest<'_>, message: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-check-update",
            "--no-show-release-notes",
            "--model",
            request.model,
            "--edit-format",
            self.config.edit_format.as_str(),
            "--yes-always",
            "--disable-playwright",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if self.config.auto_test {
            args.push("--auto-test".to_string());
            args.push("--test-cmd".to_string());
            args.push(format!("{} build {}", self.build_tool, request.target.label()));
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--file".to_string());
        args.push(request.descriptor.to_string_lossy().into_owned());
        args.push("--read".to_string());
        args.push(self.config.context_file.clone());
        args.push("--message".to_string());
        args.push(message.to_string());
        args
    }

    fn command(&self, workdir: &Path, args: Vec<String>) -> CommandRequest {
        CommandRequest::new(&self.config.program)
            .args(args)
            .current_dir(workdir)
            .env("HOME", self.home.path().to_string_lossy())
            .timeout(self.config.timeout())
            .output_limit(self.config.output_limit_bytes)
    }
}

impl PatchInvoker for AiderInvoker {
    #[instrument(skip_all, fields(target = %request.target, attempt = request.attempt, model = request.model))]
    fn patch(&self, request: &PatchRequest<'_>) -> Result<PatchOutcome> {
        let descriptor = request.descriptor.to_string_lossy();
        let message = self.prompt.render(&PromptInputs {
            build_tool: &self.build_tool,
            subcommand: request.step.as_str(),
            target: &request.target.label(),
            descriptor: &descriptor,
            context_file: &self.config.context_file,
            diagnostics: request.diagnostics,
            attempt: request.attempt,
            max_attempts: request.max_attempts,
        })?;
        let command = self.command(request.workdir, self.patch_args(request, &message));
        info!(workdir = %request.workdir.display(), "running assistant");
        let output = run_command(&command)
            .with_context(|| format!("run assistant {}", self.config.program))?;
        let transcript = output.combined_lossy();

        if !output.success() {
            warn!(
                exit_code = ?output.code(),
                timed_out = output.timed_out,
                "assistant failed:\n{transcript}"
            );
            return Ok(PatchOutcome::Failed {
                exit_code: output.code(),
                output: transcript,
            });
        }
        info!("assistant finished:\n{transcript}");
        Ok(PatchOutcome::Applied)
    }

    #[instrument(skip_all, fields(model = %model))]
    fn commit(&self, workdir: &Path, model: &str) -> Result<()> {
        let args = vec![
            "--commit".to_string(),
            "--model".to_string(),
            model.to_string(),
        ];
        let output = run_command(&self.command(workdir, args))
            .with_context(|| format!("run assistant {} --commit", self.config.program))?;
        if !output.success() {
            return Err(anyhow!(
                "assistant commit failed with status {:?}:\n{}",
                output.code(),
                output.combined_lossy()
            ));
        }
        debug!("assistant committed outstanding changes");
        Ok(())
    }
}
