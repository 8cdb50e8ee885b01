//! Blocking execution of external programs.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

/// Everything needed to start one external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed. `None` gives the child a null stdin.
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// How a child process ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The program could not be started (missing, not executable, ...).
    NotStarted { error: io::Error },
    /// Killed by a signal, crashed, or killed by the watchdog.
    Crashed {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        timed_out: bool,
    },
    /// Exited on its own with `code`.
    Exited {
        code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

impl ProcessOutcome {
    /// `true` for a normal exit with status 0.
    pub fn succeeded(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: 0, .. })
    }

    pub fn stdout(&self) -> &[u8] {
        match self {
            ProcessOutcome::NotStarted { .. } => &[],
            ProcessOutcome::Crashed { stdout, .. } | ProcessOutcome::Exited { stdout, .. } => {
                stdout
            }
        }
    }

    pub fn stderr(&self) -> &[u8] {
        match self {
            ProcessOutcome::NotStarted { .. } => &[],
            ProcessOutcome::Crashed { stderr, .. } | ProcessOutcome::Exited { stderr, .. } => {
                stderr
            }
        }
    }
}

/// The seam between the pipeline and the operating system.
///
/// Implementations block until the child has exited (or was killed).
pub trait ProcessRunner: Send + Sync {
    fn run(&self, request: &ProcessRequest) -> ProcessOutcome;
}

/// Runs requests with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to keep collecting output after the watchdog killed the child.
///
/// Grandchildren (e.g. `latex` started by a shell wrapper) inherit the pipes and may keep them
/// open long after the direct child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, request: &ProcessRequest) -> ProcessOutcome {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => return ProcessOutcome::NotStarted { error },
        };

        // Pipes are drained on their own threads so a chatty child can't fill a pipe
        // buffer and block forever while we wait on it.
        let stdin_writer = match (child.stdin.take(), request.stdin.clone()) {
            (Some(mut pipe), Some(payload)) => Some(thread::spawn(move || {
                // A child that exits without reading stdin closes the pipe; that is not an error.
                let _ = pipe.write_all(&payload);
            })),
            _ => None,
        };
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let waited = wait_with_timeout(&mut child, request.timeout);

        let drain_deadline = match waited {
            Ok(None) => Some(Instant::now() + DRAIN_GRACE),
            _ => None,
        };
        if let (Some(handle), None) = (stdin_writer, drain_deadline) {
            let _ = handle.join();
        }
        let stdout = collect_output(stdout_reader, drain_deadline);
        let stderr = collect_output(stderr_reader, drain_deadline);

        match waited {
            Ok(Some(status)) => match status.code() {
                Some(code) => ProcessOutcome::Exited {
                    code,
                    stdout,
                    stderr,
                },
                None => ProcessOutcome::Crashed {
                    stdout,
                    stderr,
                    timed_out: false,
                },
            },
            Ok(None) => ProcessOutcome::Crashed {
                stdout,
                stderr,
                timed_out: true,
            },
            Err(error) => {
                tracing::warn!(
                    program = %request.program.display(),
                    error = %error,
                    "failed to wait for child process"
                );
                ProcessOutcome::Crashed {
                    stdout,
                    stderr,
                    timed_out: false,
                }
            }
        }
    }
}

/// Forwards the pipe's contents in chunks until EOF.
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Gathers chunks until the pipe closes, or until `deadline` if one is given.
fn collect_output(chunks: Option<Receiver<Vec<u8>>>, deadline: Option<Instant>) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(chunks) = chunks else {
        return out;
    };
    loop {
        let chunk = match deadline {
            None => chunks.recv().ok(),
            Some(deadline) => chunks
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .ok(),
        };
        match chunk {
            Some(chunk) => out.extend_from_slice(&chunk),
            None => return out,
        }
    }
}

/// `Ok(None)` means the watchdog fired and the child was killed.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> io::Result<Option<std::process::ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            // The child may exit between try_wait and kill; either way it is gone afterwards.
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
