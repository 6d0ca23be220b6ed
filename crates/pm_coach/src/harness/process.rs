//! ProcessRunner - Executing one engine against a target directory
//!
//! Engines are described by a typed [`CommandSpec`] (program + argument list)
//! and never through a shell string, so target paths containing spaces or
//! quotes reach the engine untouched.
//!
//! Every outcome of a run is a [`Capture`]. Timeouts and launch failures are
//! reported through sentinel exit codes instead of errors, because an engine
//! that cannot start is itself a test result.

use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoachError, Result};

/// Wall-clock budget for a single engine run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Exit code reported when the engine exceeded its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when the engine could not be launched at all.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -2;

/// Stderr body reported for a timed-out run.
pub const TIMEOUT_STDERR: &str = "TIMEOUT";

/// Entry point whose presence identifies the project root.
pub const DEFAULT_MARKER: &str = "pm_encoder.py";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which of the two implementations a capture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The reference implementation.
    A,
    /// The candidate implementation.
    B,
}

impl Side {
    /// Lowercase tag used in failure kinds and file prefixes.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }

    /// Prefix for artifacts staged out of this side's run.
    pub fn staging_prefix(self) -> String {
        format!("{}_", self.as_str())
    }
}

/// Lens presets understood by both engines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    Architecture,
    Debug,
    Security,
    Onboarding,
}

impl Lens {
    pub fn as_str(self) -> &'static str {
        match self {
            Lens::Architecture => "architecture",
            Lens::Debug => "debug",
            Lens::Security => "security",
            Lens::Onboarding => "onboarding",
        }
    }
}

/// Flavor of instruction file generated in artifact mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentTarget {
    #[default]
    Claude,
    Gemini,
}

impl AgentTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentTarget::Claude => "claude",
            AgentTarget::Gemini => "gemini",
        }
    }

    /// Name of the primary instruction file the engines write.
    pub fn instruction_file(self) -> &'static str {
        match self {
            AgentTarget::Claude => "CLAUDE.md",
            AgentTarget::Gemini => "GEMINI_INSTRUCTIONS.txt",
        }
    }
}

/// What the engines are asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Mode {
    /// Plain serialization to stdout.
    #[default]
    Serialize,
    /// Serialization filtered through a lens.
    Lens(Lens),
    /// Generate the named artifact files into the working directory.
    Artifacts(AgentTarget),
}

impl Mode {
    /// Arguments appended after the engine entry point.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![".".to_string()];
        match self {
            Mode::Serialize => {}
            Mode::Lens(lens) => {
                args.push("--lens".to_string());
                args.push(lens.as_str().to_string());
            }
            Mode::Artifacts(target) => {
                args.push("--init-prompt".to_string());
                args.push("--target".to_string());
                args.push(target.as_str().to_string());
            }
        }
        args
    }

    pub fn is_artifacts(&self) -> bool {
        matches!(self, Mode::Artifacts(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Serialize => "serialize",
            Mode::Lens(_) => "lens",
            Mode::Artifacts(_) => "artifacts",
        }
    }
}

/// A fully resolved command: program plus argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {:?}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How one implementation is launched, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSpec {
    /// Human-readable name used in summaries.
    pub label: String,
    /// Interpreter to run the entry point with, if any.
    #[serde(default)]
    pub launcher: Option<String>,
    /// Arguments passed to the launcher before the entry point.
    #[serde(default)]
    pub launcher_args: Vec<String>,
    /// Script or binary, relative to the project root unless absolute.
    pub entry: PathBuf,
}

impl EngineSpec {
    /// Default reference engine: the Python script at the project root.
    pub fn reference() -> Self {
        Self {
            label: "python".to_string(),
            launcher: Some("python3".to_string()),
            launcher_args: Vec::new(),
            entry: PathBuf::from(DEFAULT_MARKER),
        }
    }

    /// Default candidate engine: the release build of the Rust port.
    pub fn candidate() -> Self {
        Self {
            label: "rust".to_string(),
            launcher: None,
            launcher_args: Vec::new(),
            entry: PathBuf::from("rust/target/release/pm_encoder"),
        }
    }

    /// Build the command for this engine in the given mode.
    pub fn command(&self, root: &ProjectRoot, mode: &Mode) -> CommandSpec {
        let entry = root.resolve(&self.entry);
        let spec = match &self.launcher {
            Some(launcher) => CommandSpec::new(launcher)
                .args(&self.launcher_args)
                .arg(entry),
            None => CommandSpec::new(entry),
        };
        spec.args(mode.args())
    }
}

/// Directory the engine entry points are resolved against.
///
/// Read-only after startup; shared by every target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    path: PathBuf,
}

impl ProjectRoot {
    /// Search the current directory, its parent, then the directory of the
    /// running executable for `marker`.
    pub fn discover(marker: &str) -> Result<Self> {
        let mut candidates = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            if let Some(parent) = cwd.parent() {
                let parent = parent.to_path_buf();
                candidates.push(cwd);
                candidates.push(parent);
            } else {
                candidates.push(cwd);
            }
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(dir);
        }
        Self::discover_in(&candidates, marker)
    }

    /// First candidate containing `marker` wins.
    pub fn discover_in(candidates: &[PathBuf], marker: &str) -> Result<Self> {
        for candidate in candidates {
            if candidate.join(marker).exists() {
                debug!(root = %candidate.display(), marker, "Discovered project root");
                return Ok(Self {
                    path: candidate.clone(),
                });
            }
        }
        Err(CoachError::ProjectRootNotFound {
            marker: marker.to_string(),
            searched: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Use an explicit directory, still requiring the marker to be present.
    pub fn at(path: impl Into<PathBuf>, marker: &str) -> Result<Self> {
        Self::discover_in(&[path.into()], marker)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an entry relative to the root; absolute entries pass through.
    pub fn resolve(&self, entry: &Path) -> PathBuf {
        if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            self.path.join(entry)
        }
    }
}

/// Everything observed from one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
}

impl Capture {
    /// A run that exited zero with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A run that exited non-zero with the given stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    fn timeout(timeout: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: TIMEOUT_STDERR.to_string(),
            exit_code: TIMEOUT_EXIT_CODE,
            elapsed_ms: duration_ms(timeout),
        }
    }

    fn launch_failure(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: message,
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    pub fn launch_failed(&self) -> bool {
        self.exit_code == LAUNCH_FAILURE_EXIT_CODE
    }
}

/// Runs engine commands under a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `command` with `cwd` as its working directory.
    ///
    /// Never fails: timeouts and launch errors come back as sentinel captures.
    pub fn run(&self, command: &CommandSpec, cwd: &Path) -> Capture {
        debug!(command = %command, cwd = %cwd.display(), "Running engine");
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut cmd = Command::new(command.program());
        cmd.args(command.arguments())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout can take down launcher children too.
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to launch engine");
                return Capture::launch_failure(format!(
                    "failed to launch {}: {e}",
                    command.program().display()
                ));
            }
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        command = %command,
                        timeout_secs = self.timeout.as_secs(),
                        "Engine timed out, killing process group"
                    );
                    kill_group(&mut child);
                    let _ = child.wait();
                    return Capture::timeout(self.timeout);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    kill_group(&mut child);
                    return Capture::launch_failure(format!("failed waiting for engine: {e}"));
                }
            }
        };

        // A background process left behind by the engine can hold the pipes
        // open after the engine itself exited; the deadline still applies.
        let (Some(stdout), Some(stderr)) = (collect(&stdout, deadline), collect(&stderr, deadline))
        else {
            warn!(
                command = %command,
                timeout_secs = self.timeout.as_secs(),
                "Engine output still open at timeout, killing process group"
            );
            kill_group(&mut child);
            return Capture::timeout(self.timeout);
        };

        let capture = Capture {
            stdout,
            stderr,
            exit_code: exit_code(status),
            elapsed_ms: duration_ms(started.elapsed()),
        };
        debug!(
            exit_code = capture.exit_code,
            elapsed_ms = capture.elapsed_ms,
            stdout_bytes = capture.stdout.len(),
            "Engine finished"
        );
        capture
    }
}

/// Read a pipe to the end on a detached thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

/// `None` when the pipe is still open at `deadline`.
fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant) -> Option<String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

/// SIGKILL the engine's whole process group, falling back to the engine alone.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    // The engine leads its own group, so the group id is its pid.
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());
    if killed {
        return;
    }
    if let Err(e) = child.kill() {
        warn!(error = %e, "Failed to kill engine");
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "Failed to kill engine");
    }
}

/// Signals map to `128 + signal`, the shell convention (SIGKILL -> 137).
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
