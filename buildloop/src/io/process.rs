//! Child process execution with combined stdout/stderr capture.
//!
//! Every external tool the harness drives (git, the build tool, the assistant)
//! goes through here. A launch failure is an `Err`; a non-zero exit is a normal
//! `Ok` result carrying the status, so callers decide what a failure means.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 4_000_000;

/// How long to wait for the output pipes to close after a timed-out child is
/// killed. Processes that escaped the process group can hold them open.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Stdout and stderr.
const READERS: usize = 2;

/// A fully described subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` inherits the harness's own.
    pub workdir: Option<PathBuf>,
    /// Variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: Vec::new(),
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured child process output. Stdout and stderr share one buffer in
/// arrival order.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub combined: Vec<u8>,
    pub truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn combined_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.combined).into_owned();
        text.push_str(&self.truncated_notice());
        if self.timed_out {
            text.push_str("\n[command timed out]\n");
        }
        text
    }

    pub fn truncated_notice(&self) -> String {
        if self.truncated > 0 {
            format!("\n[output truncated {} bytes]\n", self.truncated)
        } else {
            String::new()
        }
    }
}

#[derive(Debug)]
struct SharedOutput {
    bytes: Vec<u8>,
    truncated: usize,
    limit: usize,
}

impl SharedOutput {
    fn push(&mut self, chunk: &[u8]) {
        let remaining = self.limit.saturating_sub(self.bytes.len());
        let keep = chunk.len().min(remaining);
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.truncated += chunk.len() - keep;
    }
}

/// Run a command to completion, merging stdout and stderr.
///
/// Both pipes are drained concurrently so a chatty child cannot deadlock on a
/// full pipe. Bytes past `output_limit_bytes` are discarded but still drained.
///
/// With a timeout the child leads its own process group (on unix), and the
/// whole group is killed when the timeout fires so background helpers cannot
/// keep the call blocked.
#[instrument(skip_all, fields(program = %request.program))]
pub fn run_command(request: &CommandRequest) -> Result<CommandOutput> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &request.workdir {
        cmd.current_dir(dir);
    }
    for (key, value) in &request.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if request.timeout.is_some() {
            cmd.process_group(0);
        }
    }

    debug!(command = %request, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, command = %request, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", request.program));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let shared = Arc::new(Mutex::new(SharedOutput {
        bytes: Vec::new(),
        truncated: 0,
        limit: request.output_limit_bytes,
    }));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader(stdout, Arc::clone(&shared), done_tx.clone());
    spawn_reader(stderr, Arc::clone(&shared), done_tx);

    let mut timed_out = false;
    let status = match request.timeout {
        None => child.wait().context("wait for command")?,
        Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    command = %request,
                    "command timed out, killing"
                );
                timed_out = true;
                kill_process_tree(&mut child)?;
                child.wait().context("wait command after kill")?
            }
        },
    };

    let grace = timed_out.then_some(READER_GRACE);
    if !wait_for_readers(&done_rx, grace)? {
        warn!(
            command = %request,
            "output pipes still open after kill, keeping partial output"
        );
    }

    let (combined, truncated) = {
        let mut buffer = shared
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        (std::mem::take(&mut buffer.bytes), buffer.truncated)
    };

    if truncated > 0 {
        warn!(truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        combined,
        truncated,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    shared: Arc<Mutex<SharedOutput>>,
    done: mpsc::Sender<Result<()>>,
) {
    thread::spawn(move || {
        // The receiver is gone only when the caller stopped waiting.
        let _ = done.send(drain_into(reader, &shared));
    });
}

/// Wait for both readers to hit EOF. `grace` bounds each wait; `Ok(false)`
/// means a pipe was still open when it ran out.
fn wait_for_readers(done: &Receiver<Result<()>>, grace: Option<Duration>) -> Result<bool> {
    for _ in 0..READERS {
        let result = match grace {
            None => done
                .recv()
                .map_err(|_| anyhow!("output reader thread panicked"))?,
            Some(grace) => match done.recv_timeout(grace) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
            },
        };
        result.context("read command output")?;
    }
    Ok(true)
}

/// Kill the child's process group, falling back to the child alone.
fn kill_process_tree(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => warn!(?status, "could not signal process group, killing child only"),
            Err(err) => warn!(err = %err, "could not run kill, killing child only"),
        }
    }
    child.kill().context("kill command")
}

fn drain_into<R: Read>(mut reader: R, shared: &Mutex<SharedOutput>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        shared
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?
            .push(&chunk[..n]);
    }
}
