//! Build probe adapter for the build tool (`bazel build` / `bazel query`).

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::target::Target;
use crate::core::types::{BuildOutcome, BuildStep};
use crate::io::config::BuildConfig;
use crate::io::process::{CommandRequest, run_command};

/// Asks the build tool whether a target builds.
///
/// `Err` is reserved for the tool failing to launch; a target that does not
/// build is `Ok(BuildOutcome::Failed { .. })`.
pub trait BuildProbe {
    fn probe(&self, workdir: &Path, target: &Target) -> Result<BuildOutcome>;
}

impl<T: BuildProbe + ?Sized> BuildProbe for &T {
    fn probe(&self, workdir: &Path, target: &Target) -> Result<BuildOutcome> {
        (**self).probe(workdir, target)
    }
}

/// Probe that shells out to the configured build tool.
#[derive(Debug, Clone)]
pub struct ToolBuildProbe {
    config: BuildConfig,
}

impl ToolBuildProbe {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    fn request(&self, workdir: &Path, step: BuildStep, target: &Target) -> CommandRequest {
        CommandRequest::new(&self.config.tool)
            .arg(step.as_str())
            .arg(target.label())
            .current_dir(workdir)
            .timeout(self.config.timeout())
            .output_limit(self.config.output_limit_bytes)
    }

    fn run(&self, workdir: &Path, step: BuildStep, target: &Target) -> Result<BuildOutcome> {
        let request = self.request(workdir, step, target);
        let output = run_command(&request).with_context(|| format!("run {request}"))?;
        if output.success() {
            debug!(subcommand = %step, target = %target, "build tool succeeded");
            return Ok(BuildOutcome::Succeeded);
        }
        let diagnostics = output.combined_lossy();
        info!(
            subcommand = %step,
            target = %target,
            exit_code = ?output.code(),
            "build tool failed:\n{diagnostics}"
        );
        Ok(BuildOutcome::Failed { step, diagnostics })
    }
}

impl BuildProbe for ToolBuildProbe {
    #[instrument(skip_all, fields(target = %target, query_first = self.config.query_first))]
    fn probe(&self, workdir: &Path, target: &Target) -> Result<BuildOutcome> {
        if self.config.query_first {
            let query = self.run(workdir, BuildStep::Query, target)?;
            if !query.is_success() {
                return Ok(query);
            }
        }
        self.run(workdir, BuildStep::Build, target)
    }
}
