//! Harness configuration, read from `buildloop.toml` when present.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::target::Target;
use crate::io::git::Identity;

pub const DEFAULT_CONFIG_FILE: &str = "buildloop.toml";

const DEFAULT_REPO_URL: &str = "https://github.com/dan-stowell/ripgrep";
const DEFAULT_MODEL: &str = "openrouter/openai/gpt-5-mini";
const DEFAULT_TARGETS: &[&str] = &[
    "//crates/matcher:grep_matcher",
    "//crates/matcher:integration_test",
    "//crates/globset:globset",
    "//crates/cli:grep_cli",
    "//crates/regex:grep_regex",
    "//crates/searcher:grep_searcher",
    "//crates/pcre2:grep_pcre2",
    "//crates/ignore:ignore",
    "//crates/printer:grep_printer",
    "//crates/grep:grep",
    "//:ripgrep",
    "//:integration_test",
];

/// What to do when the assistant process itself exits non-zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchFailurePolicy {
    /// Abort the whole run.
    Abort,
    /// Log it, consume the attempt, and keep going.
    Retry,
}

/// What to do when a target is still failing after its last attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop the run at the first exhausted target.
    Abort,
    /// Record the failure and move on to the next target.
    Continue,
}

/// Who authors the per-target commit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// `git commit -m "buildloop: model <m> target <t>"`.
    Git,
    /// `aider --commit`, letting the assistant write the message.
    Assistant,
}

/// Harness configuration (TOML).
///
/// Missing fields fall back to the ripgrep migration defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Repository to clone into each workspace.
    pub repo_url: String,

    /// Targets to migrate, in order.
    pub targets: Vec<Target>,

    /// Assistant models; each gets its own workspace and branch.
    pub models: Vec<String>,

    /// Patch attempts per target (the pre-check probe is free).
    pub attempts: u32,

    /// Parent directory for workspaces; system temp dir when unset.
    pub workspace_root: Option<PathBuf>,

    /// Create a `<model>-<timestamp>` branch right after cloning.
    pub create_branch: bool,

    /// Stash dirty files after a failed probe so the next attempt starts clean.
    pub stash_on_failure: bool,

    pub on_patch_failure: PatchFailurePolicy,
    pub on_exhaustion: ExhaustionPolicy,
    pub commit_mode: CommitMode,

    /// Commit author; the ambient git config is used when unset.
    pub identity: Option<Identity>,

    pub auth: AuthConfig,
    pub build: BuildConfig,
    pub assistant: AssistantConfig,
}

/// Credentials injected into the clone URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub username_env: String,
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            username_env: "GITHUB_USERNAME".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build tool executable (`bazel`, `bazelisk`, or a path).
    pub tool: String,
    /// Run `<tool> query <target>` before building.
    pub query_first: bool,
    /// Kill a probe after this many seconds; unset waits forever.
    pub timeout_secs: Option<u64>,
    pub output_limit_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            tool: "bazel".to_string(),
            query_first: false,
            timeout_secs: None,
            output_limit_bytes: 4_000_000,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Assistant executable (`aider` or a path).
    pub program: String,
    pub edit_format: String,
    /// Per-package build descriptor the assistant may edit.
    pub descriptor_file: String,
    /// Root module file the assistant may read.
    pub context_file: String,
    /// Pass `--auto-test --test-cmd "<tool> build <target>"` so the assistant
    /// can iterate on its own before returning.
    pub auto_test: bool,
    /// Extra arguments appended before the file arguments.
    pub extra_args: Vec<String>,
    /// Upper bound on diagnostics embedded in the prompt.
    pub prompt_budget_bytes: usize,
    /// Parent directory for the isolated assistant home; system temp dir when unset.
    pub home_root: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub output_limit_bytes: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            program: "aider".to_string(),
            edit_format: "diff".to_string(),
            descriptor_file: "BUILD.bazel".to_string(),
            context_file: "MODULE.bazel".to_string(),
            auto_test: false,
            extra_args: Vec::new(),
            prompt_budget_bytes: 60_000,
            home_root: None,
            timeout_secs: None,
            output_limit_bytes: 4_000_000,
        }
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            repo_url: DEFAULT_REPO_URL.to_string(),
            targets: DEFAULT_TARGETS
                .iter()
                .filter_map(|label| Target::parse(label).ok())
                .collect(),
            models: vec![DEFAULT_MODEL.to_string()],
            attempts: 3,
            workspace_root: None,
            create_branch: true,
            stash_on_failure: false,
            on_patch_failure: PatchFailurePolicy::Retry,
            on_exhaustion: ExhaustionPolicy::Abort,
            commit_mode: CommitMode::Git,
            identity: None,
            auth: AuthConfig::default(),
            build: BuildConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(anyhow!("repo_url must be set"));
        }
        if self.targets.is_empty() {
            return Err(anyhow!("targets must list at least one target"));
        }
        if self.models.is_empty() || self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(anyhow!("models must be a non-empty list of model identifiers"));
        }
        if self.attempts == 0 {
            return Err(anyhow!("attempts must be > 0"));
        }
        if self.build.tool.trim().is_empty() {
            return Err(anyhow!("build.tool must be set"));
        }
        if self.build.output_limit_bytes == 0 {
            return Err(anyhow!("build.output_limit_bytes must be > 0"));
        }
        if self.build.timeout_secs == Some(0) {
            return Err(anyhow!("build.timeout_secs must be > 0 when set"));
        }
        if self.assistant.program.trim().is_empty() {
            return Err(anyhow!("assistant.program must be set"));
        }
        let descriptor = self.assistant.descriptor_file.trim();
        if descriptor.is_empty() || descriptor.contains('/') {
            return Err(anyhow!(
                "assistant.descriptor_file must be a bare file name"
            ));
        }
        if self.assistant.context_file.trim().is_empty() {
            return Err(anyhow!("assistant.context_file must be set"));
        }
        if self.assistant.prompt_budget_bytes == 0 {
            return Err(anyhow!("assistant.prompt_budget_bytes must be > 0"));
        }
        if self.assistant.output_limit_bytes == 0 {
            return Err(anyhow!("assistant.output_limit_bytes must be > 0"));
        }
        if self.assistant.timeout_secs == Some(0) {
            return Err(anyhow!("assistant.timeout_secs must be > 0 when set"));
        }
        if self.auth.enabled
            && (self.auth.username_env.trim().is_empty() || self.auth.token_env.trim().is_empty())
        {
            return Err(anyhow!("auth.username_env and auth.token_env must be set"));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        let mut buf = toml::to_string_pretty(self).context("serialize config toml")?;
        buf.push('\n');
        Ok(buf)
    }
}

/// Load and validate config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    let cfg = read_config(path)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse config without validating it, for callers that layer overrides on
/// top before calling [`HarnessConfig::validate`].
pub fn read_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        return Ok(HarnessConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let buf = cfg.to_toml()?;
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
