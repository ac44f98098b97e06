#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

use buildloop::core::target::Target;
use buildloop::exit_codes;
use buildloop::io::config::{HarnessConfig, write_config};
use buildloop::test_support::{TestRepo, test_identity, write_script};

/// Builds a target once its descriptor mentions `fixed`.
const FAKE_BAZEL: &str = r##"#!/bin/sh
pkg=$(echo "$2" | sed -e 's#^//##' -e 's#:.*##')
if grep -q fixed "$pkg/BUILD.bazel" 2>/dev/null; then
  echo "INFO: Build completed successfully"
  exit 0
fi
echo "ERROR: $pkg/BUILD.bazel: no such target '$2'" >&2
exit 1
"##;

/// Writes `# fixed` into the file passed with `--file` and records its HOME.
const FAKE_AIDER: &str = r##"#!/bin/sh
while [ $# -gt 0 ]; do
  if [ "$1" = "--file" ]; then
    echo "# fixed" > "$2"
  fi
  shift
done
echo "$HOME" >> "$AIDER_HOME_LOG"
exit 0
"##;

/// Leaves every file alone.
const IDLE_AIDER: &str = "#!/bin/sh\nexit 0\n";

struct Fixture {
    source: TestRepo,
    scratch: TempDir,
}

impl Fixture {
    fn new(aider: &str) -> Self {
        let source = TestRepo::with_packages(&["crates/grep", "crates/cli"]).expect("source");
        let scratch = tempfile::tempdir().expect("scratch");
        write_script(scratch.path(), "bazel", FAKE_BAZEL).expect("bazel");
        write_script(scratch.path(), "aider", aider).expect("aider");
        Self { source, scratch }
    }

    fn workspaces(&self) -> PathBuf {
        self.scratch.path().join("workspaces")
    }

    fn homes(&self) -> PathBuf {
        self.scratch.path().join("homes")
    }

    fn home_log(&self) -> PathBuf {
        self.scratch.path().join("homes.log")
    }

    fn write_config(&self) -> PathBuf {
        let mut cfg = HarnessConfig {
            repo_url: self.source.file_url(),
            targets: vec![
                Target::parse("//crates/grep:grep").expect("target"),
                Target::parse("//crates/cli").expect("target"),
            ],
            attempts: 2,
            workspace_root: Some(self.workspaces()),
            identity: Some(test_identity()),
            ..HarnessConfig::default()
        };
        cfg.auth.enabled = false;
        cfg.build.tool = self.scratch.path().join("bazel").display().to_string();
        cfg.assistant.program = self.scratch.path().join("aider").display().to_string();
        cfg.assistant.home_root = Some(self.homes());
        let path = self.scratch.path().join("buildloop.toml");
        write_config(&path, &cfg).expect("write config");
        path
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_buildloop"))
            .args(args)
            .env("AIDER_HOME_LOG", self.home_log())
            .env("RUST_LOG", "warn")
            .current_dir(self.scratch.path())
            .output()
            .expect("spawn buildloop")
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[test]
fn targets_lists_configured_labels() {
    let fixture = Fixture::new(IDLE_AIDER);
    let config = fixture.write_config();

    let output = fixture.run(&["targets", "--config", config.to_str().expect("utf8")]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.lines().collect::<Vec<_>>(),
        vec!["//crates/grep:grep", "//crates/cli:cli"]
    );
}

#[test]
fn config_prints_defaults_without_a_file() {
    let fixture = Fixture::new(IDLE_AIDER);

    let output = fixture.run(&["config", "--config", "does-not-exist.toml"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let printed: HarnessConfig =
        toml::from_str(&String::from_utf8_lossy(&output.stdout)).expect("parse printed config");
    assert_eq!(printed, HarnessConfig::default());
}

#[test]
fn invalid_config_exits_invalid() {
    let fixture = Fixture::new(IDLE_AIDER);
    let path = fixture.scratch.path().join("bad.toml");
    fs::write(&path, "attempts = 0\n").expect("write");

    let output = fixture.run(&["run", "--config", path.to_str().expect("utf8")]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("attempts must be > 0"));
}

#[test]
fn invalid_config_error_is_printed_once() {
    let fixture = Fixture::new(IDLE_AIDER);
    let path = fixture.scratch.path().join("bad.toml");
    fs::write(&path, "attempts = 0\n").expect("write");

    let output = fixture.run(&[
        "run",
        "--config",
        path.to_str().expect("utf8"),
        "--attempts",
        "0",
    ]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("attempts must be > 0").count(), 1, "{stderr}");
}

#[test]
fn run_migrates_every_target_and_cleans_up() {
    let fixture = Fixture::new(FAKE_AIDER);
    let config = fixture.write_config();

    let output = fixture.run(&["run", "--config", config.to_str().expect("utf8")]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stdout:\n{stdout}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("target: //crates/grep:grep status=Passed attempts=1 probes=2"));
    assert!(stdout.contains("target: //crates/cli:cli status=Passed attempts=1 probes=2"));
    assert!(is_empty_dir(&fixture.workspaces()));
    assert!(is_empty_dir(&fixture.homes()));

    let homes = fs::read_to_string(fixture.home_log()).expect("home log");
    let homes: Vec<&str> = homes.lines().collect();
    assert_eq!(homes.len(), 2);
    assert!(homes.iter().all(|h| h.contains("buildloop-assistant-")));
    assert!(!Path::new(homes[0]).exists());
}

#[test]
fn exhausted_run_aborts_unless_keep_going() {
    let fixture = Fixture::new(IDLE_AIDER);
    let config = fixture.write_config();
    let config = config.to_str().expect("utf8");

    let aborted = fixture.run(&["run", "--config", config]);
    assert_eq!(aborted.status.code(), Some(exit_codes::ABORTED));
    let stderr = String::from_utf8_lossy(&aborted.stderr);
    assert_eq!(stderr.matches("after 2 attempts").count(), 1, "{stderr}");
    let stdout = String::from_utf8_lossy(&aborted.stdout);
    assert!(
        stdout.contains("target: //crates/grep:grep status=Exhausted attempts=2"),
        "{stdout}"
    );
    assert!(!stdout.contains("//crates/cli:cli"), "{stdout}");
    assert!(is_empty_dir(&fixture.workspaces()));
    assert!(is_empty_dir(&fixture.homes()));

    let finished = fixture.run(&["run", "--config", config, "--keep-going"]);
    assert_eq!(finished.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&finished.stdout);
    assert!(stdout.contains("failed: //crates/grep:grep //crates/cli:cli"), "{stdout}");
    assert!(is_empty_dir(&fixture.workspaces()));
}
