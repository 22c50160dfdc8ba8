//! Subprocess execution with a bounded runtime.
//!
//! Every external process texgit starts (git as well as user commands) goes
//! through [`run`]. The child's stdin is fed from a writer thread and its
//! stdout/stderr are drained by reader threads, while the calling thread
//! polls for exit. On Unix the child leads its own process group, and the
//! whole group is killed once the timeout has elapsed, so helpers it spawned
//! (a shell's children, `git-remote-https`) cannot keep the run alive by
//! holding the output pipes open.
//!
//! The environment handed to user commands is an explicit [`ExecEnvironment`]
//! value rather than whatever the process happens to inherit at the time of
//! the call.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the pipes may stay open after the process group was killed.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Options for a single subprocess invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions<'a> {
    pub working_dir: Option<&'a Path>,
    /// Replaces the inherited environment when set.
    pub env: Option<&'a BTreeMap<String, String>>,
    pub stdin: Option<&'a str>,
    pub timeout: Duration,
}

impl<'a> RunOptions<'a> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            working_dir: None,
            env: None,
            stdin: None,
            timeout,
        }
    }

    pub fn working_dir(mut self, dir: &'a Path) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn env(mut self, env: &'a BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn stdin(mut self, input: &'a str) -> Self {
        self.stdin = Some(input);
        self
    }
}

/// Output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Reads `pipe` to the end on a detached thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

/// Waits for a reader until `deadline`.
///
/// Returns `None` if the pipe is still open by then.
fn collect(rx: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Option<String> {
    let Some(rx) = rx else {
        return Some(String::new());
    };
    let bytes = rx
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

/// Kills every process in the child's group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: killpg only sends a signal, the group id is our own child's
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn timed_out(display: String, timeout: Duration, stderr: &str) -> Error {
    Error::ExecutionFailed {
        command: display,
        code: None,
        stderr: format!(
            "timed out after {:?}{}{}",
            timeout,
            if stderr.is_empty() { "" } else { ": " },
            stderr.trim_end()
        ),
    }
}

/// Runs `command` (program followed by its arguments) to completion.
///
/// Fails with `ExecutionFailed` if the program cannot be started, exits
/// with a non-zero status, or is still running (or still holding its output
/// open through a child of its own) when the timeout expires.
pub fn run(command: &[String], options: &RunOptions<'_>) -> Result<Captured> {
    let (program, args) = command.split_first().ok_or_else(|| Error::InvalidArgument {
        message: "cannot execute an empty command".to_string(),
    })?;
    let display = command.join(" ");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    if let Some(dir) = options.working_dir {
        cmd.current_dir(dir);
    }
    if let Some(env) = options.env {
        cmd.env_clear().envs(env);
    }
    isolate(&mut cmd);

    debug!(
        "Executing {:?} (working dir {:?}, timeout {:?})",
        display, options.working_dir, options.timeout
    );
    let mut child = cmd.spawn().map_err(|e| Error::ExecutionFailed {
        command: display.clone(),
        code: None,
        stderr: format!("failed to start: {}", e),
    })?;

    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), options.stdin) {
        let input = input.to_string();
        let name = display.clone();
        thread::spawn(move || {
            // the child may legitimately stop reading early, e.g. `head`
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    warn!("Failed to feed stdin of {:?}: {}", name, e);
                }
            }
        });
    }
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let deadline = started + options.timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            kill_group(&child);
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let Some(status) = status else {
        let stderr = collect(stderr, Instant::now() + KILL_GRACE).unwrap_or_default();
        return Err(timed_out(display, options.timeout, &stderr));
    };

    let stdout = collect(stdout, deadline);
    let stderr = collect(stderr, deadline.max(Instant::now()));
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        debug!("{:?} exited but its output is still open", display);
        kill_group(&child);
        return Err(timed_out(display, options.timeout, ""));
    };

    if !status.success() {
        return Err(Error::ExecutionFailed {
            command: display,
            code: status.code(),
            stderr: stderr.trim_end().to_string(),
        });
    }
    debug!(
        "{:?} finished after {:?} with {} bytes of output",
        display,
        started.elapsed(),
        stdout.len()
    );
    Ok(Captured { stdout, stderr })
}

/// The interpreter that scripts invoked by user commands should run under.
///
/// A command whose program starts with `generic_name` (case-insensitively)
/// is rewritten to `path` and executed with `env`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub generic_name: String,
    pub path: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl Interpreter {
    /// Locates `python3`, preferring the active virtual environment.
    ///
    /// The returned environment is `base` with `VIRTUAL_ENV` preserved and
    /// the interpreter's directory put first on `PATH`.
    pub fn detect(base: &BTreeMap<String, String>) -> Option<Self> {
        let path = base
            .get("VIRTUAL_ENV")
            .map(|venv| Path::new(venv).join("bin").join("python3"))
            .filter(|p| p.is_file())
            .or_else(|| which::which("python3").ok())?;

        let mut env = base.clone();
        if let Some(dir) = path.parent() {
            let mut dirs = vec![dir.to_path_buf()];
            if let Some(existing) = base.get("PATH") {
                dirs.extend(env::split_paths(existing).filter(|p| p != dir));
            }
            if let Ok(joined) = env::join_paths(dirs) {
                env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
            }
        }
        debug!("Using interpreter {}", path.display());
        Some(Self {
            generic_name: "python3".to_string(),
            path,
            env,
        })
    }

    fn matches(&self, program: &str) -> bool {
        program.to_lowercase().starts_with(&self.generic_name)
    }
}

/// The environment user commands are executed in.
#[derive(Debug, Clone)]
pub struct ExecEnvironment {
    pub env: BTreeMap<String, String>,
    pub interpreter: Option<Interpreter>,
    pub timeout: Duration,
}

impl ExecEnvironment {
    /// An environment with the given variables and no interpreter rewriting.
    pub fn new(env: BTreeMap<String, String>, timeout: Duration) -> Self {
        Self {
            env,
            interpreter: None,
            timeout,
        }
    }

    /// Captures the current process environment and detects the interpreter.
    pub fn from_process(timeout: Duration) -> Self {
        let env: BTreeMap<String, String> = env::vars().collect();
        let interpreter = Interpreter::detect(&env);
        Self {
            env,
            interpreter,
            timeout,
        }
    }

    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Applies interpreter substitution to `command` and picks the matching
    /// environment.
    pub fn prepare(&self, mut command: Vec<String>) -> (Vec<String>, &BTreeMap<String, String>) {
        if let (Some(interpreter), Some(program)) = (&self.interpreter, command.first_mut()) {
            if interpreter.matches(program) {
                *program = interpreter.path.to_string_lossy().into_owned();
                return (command, &interpreter.env);
            }
        }
        (command, &self.env)
    }
}
