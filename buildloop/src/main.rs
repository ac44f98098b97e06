//! Build-edit loop harness CLI.
//!
//! Clones the configured repository and drives an assistant target-by-target
//! until each one builds. Exit codes are listed in [`buildloop::exit_codes`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use buildloop::controller::PatchFailedError;
use buildloop::core::types::RunSummary;
use buildloop::exit_codes;
use buildloop::io::assistant::AiderInvoker;
use buildloop::io::build::ToolBuildProbe;
use buildloop::io::config::{
    DEFAULT_CONFIG_FILE, ExhaustionPolicy, HarnessConfig, load_config, read_config,
};
use buildloop::logging;
use buildloop::migrate::{RunAborted, TargetExhaustedError, migrate};

#[derive(Parser)]
#[command(
    name = "buildloop",
    version,
    about = "Drive a coding assistant target-by-target until a repo builds"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone the repository and run the build-edit loop over every target.
    Run(RunArgs),
    /// Print the configured targets, one label per line.
    Targets(ConfigArgs),
    /// Print the effective configuration as TOML.
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Assistant model identifier (repeat to run several models in turn).
    #[arg(long = "model")]
    models: Vec<String>,
    /// Patch attempts per target.
    #[arg(long)]
    attempts: Option<u32>,
    /// Parent directory for ephemeral workspaces.
    #[arg(long)]
    workspace_root: Option<PathBuf>,
    /// Record exhausted targets and keep going instead of stopping.
    #[arg(long)]
    keep_going: bool,
}

impl RunArgs {
    fn apply(&self, mut cfg: HarnessConfig) -> Result<HarnessConfig> {
        if !self.models.is_empty() {
            cfg.models = self.models.clone();
        }
        if let Some(attempts) = self.attempts {
            cfg.attempts = attempts;
        }
        if let Some(root) = &self.workspace_root {
            cfg.workspace_root = Some(root.clone());
        }
        if self.keep_going {
            cfg.on_exhaustion = ExhaustionPolicy::Continue;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            if let Some(aborted) = err.downcast_ref::<RunAborted>() {
                for summary in &aborted.summaries {
                    print_summary(summary);
                }
            }
            eprintln!("{err:#}");
            if err.downcast_ref::<PatchFailedError>().is_some()
                || err.downcast_ref::<TargetExhaustedError>().is_some()
            {
                exit_codes::ABORTED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Targets(args) => cmd_targets(&args),
        Command::Config(args) => cmd_config(&args),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let cfg = args.apply(read_config(&args.config.config)?)?;
    info!(
        repo = %buildloop::io::git::redact_url(&cfg.repo_url),
        targets = cfg.targets.len(),
        models = ?cfg.models,
        attempts = cfg.attempts,
        "starting run"
    );
    let probe = ToolBuildProbe::new(cfg.build.clone());
    let patcher = AiderInvoker::new(cfg.assistant.clone(), cfg.build.tool.clone())
        .context("prepare assistant")?;

    let summaries = migrate(&cfg, &probe, &patcher, |key| std::env::var(key).ok())?;
    patcher.close()?;

    for summary in &summaries {
        print_summary(summary);
    }
    if summaries.iter().all(RunSummary::is_success) {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}

fn cmd_targets(args: &ConfigArgs) -> Result<i32> {
    let cfg = load_config(&args.config)?;
    for target in &cfg.targets {
        println!("{target}");
    }
    Ok(exit_codes::OK)
}

fn cmd_config(args: &ConfigArgs) -> Result<i32> {
    let cfg = load_config(&args.config)?;
    print!("{}", cfg.to_toml()?);
    Ok(exit_codes::OK)
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run: model={} branch={}",
        summary.model,
        summary.branch.as_deref().unwrap_or("-")
    );
    for report in &summary.reports {
        println!(
            "target: {} status={:?} attempts={} probes={} commit={}",
            report.target,
            report.status,
            report.attempts,
            report.probes,
            report.commit.as_deref().unwrap_or("-")
        );
    }
    let failed = summary.failed();
    if !failed.is_empty() {
        let labels: Vec<String> = failed.iter().map(|r| r.target.label()).collect();
        println!("failed: {}", labels.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["buildloop", "run"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.models.is_empty());
        assert_eq!(args.config.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        let cfg = args.apply(HarnessConfig::default()).expect("apply");
        assert_eq!(cfg, HarnessConfig::default());
    }

    #[test]
    fn run_flags_override_config() {
        let cli = Cli::parse_from([
            "buildloop",
            "run",
            "--model",
            "x-ai/grok-4",
            "--model",
            "qwen/qwen3-coder",
            "--attempts",
            "5",
            "--keep-going",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let cfg = args.apply(HarnessConfig::default()).expect("apply");
        assert_eq!(cfg.models, vec!["x-ai/grok-4", "qwen/qwen3-coder"]);
        assert_eq!(cfg.attempts, 5);
        assert_eq!(cfg.on_exhaustion, ExhaustionPolicy::Continue);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let cli = Cli::parse_from(["buildloop", "run", "--attempts", "0"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.apply(HarnessConfig::default()).is_err());
    }

    #[test]
    fn flags_can_repair_an_invalid_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("buildloop.toml");
        std::fs::write(&path, "attempts = 0\n").expect("write");
        let path_arg = path.to_str().expect("utf8");
        let cli = Cli::parse_from(["buildloop", "run", "--config", path_arg, "--attempts", "3"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let cfg = args
            .apply(read_config(&args.config.config).expect("read"))
            .expect("apply");
        assert_eq!(cfg.attempts, 3);
    }
}
