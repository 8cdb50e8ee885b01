use crate::error::{BackendError, ErrorKind, Result, Stage};
use crate::process::{ProcessOutcome, ProcessRequest, ProcessRunner};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base name shared by every file a render creates in its work directory.
pub(crate) const BASE_NAME: &str = "klfformula";

pub(crate) fn file_name(suffix: &str) -> String {
    format!("{BASE_NAME}{suffix}")
}

/// Captured streams of a stage that exited with status 0.
#[derive(Debug, Default)]
pub(crate) struct StageStreams {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs programs inside one render's work directory and classifies their outcome.
pub(crate) struct StageRunner<'a> {
    runner: &'a dyn ProcessRunner,
    work_dir: &'a Path,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        work_dir: &'a Path,
        env: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            work_dir,
            env,
            timeout,
        }
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir
    }

    pub fn path(&self, suffix: &str) -> PathBuf {
        self.work_dir.join(file_name(suffix))
    }

    /// A request for `program` with the work directory, extra environment and watchdog applied.
    pub fn request(&self, program: &Path) -> ProcessRequest {
        ProcessRequest::new(program)
            .cwd(self.work_dir)
            .envs(self.env.iter().cloned())
            .timeout(self.timeout)
    }

    pub fn run(&self, stage: Stage, request: &ProcessRequest) -> Result<StageStreams> {
        tracing::debug!(
            stage = stage.label(),
            program = %request.program.display(),
            command = %request.command_line(),
            "running stage"
        );
        match self.runner.run(request) {
            ProcessOutcome::NotStarted { error } => Err(BackendError::new(
                stage.no_run(),
                format!(
                    "Unable to start {} program `{}`: {error}",
                    stage.program_name(),
                    request.program.display()
                ),
            )),
            ProcessOutcome::Crashed { timed_out, .. } => {
                let message = match (timed_out, request.timeout) {
                    (true, Some(limit)) => format!(
                        "{} program `{}` was killed after running for more than {} seconds.",
                        stage.program_name(),
                        request.program.display(),
                        limit.as_secs_f64()
                    ),
                    _ => format!(
                        "{} program `{}` did not exit normally (crashed or killed).",
                        stage.program_name(),
                        request.program.display()
                    ),
                };
                Err(BackendError::new(stage.no_normal_exit(), message))
            }
            ProcessOutcome::Exited {
                code,
                stdout,
                stderr,
            } if code != 0 => Err(BackendError::new(
                ErrorKind::ProgramError(stage),
                program_error_message(stage, code, &stdout, &stderr),
            )),
            ProcessOutcome::Exited { stdout, stderr, .. } => Ok(StageStreams { stdout, stderr }),
        }
    }

    /// Reads a file the stage was expected to produce.
    pub fn read_output(&self, stage: Stage, suffix: &str) -> Result<Vec<u8>> {
        let path = self.path(suffix);
        if !path.is_file() {
            return Err(BackendError::new(
                stage.no_output(),
                format!(
                    "{} did not produce the expected output file `{}`.",
                    stage.label(),
                    file_name(suffix)
                ),
            ));
        }
        std::fs::read(&path).map_err(|err| {
            BackendError::new(
                stage.output_read_fail().unwrap_or(stage.no_output()),
                format!("Unable to read `{}`: {err}", path.display()),
            )
        })
    }

    /// Runs the stage and reads back the file it writes.
    pub fn run_for_output(
        &self,
        stage: Stage,
        request: &ProcessRequest,
        output_suffix: &str,
    ) -> Result<Vec<u8>> {
        self.run(stage, request)?;
        self.read_output(stage, output_suffix)
    }

    pub fn write_file(&self, suffix: &str, data: &[u8], kind: ErrorKind) -> Result<()> {
        let path = self.path(suffix);
        std::fs::write(&path, data).map_err(|err| {
            BackendError::new(kind, format!("Unable to write `{}`: {err}", path.display()))
        })
    }
}

/// HTML diagnostic for a program that exited cleanly with a non-zero status.
pub(crate) fn program_error_message(stage: Stage, code: i32, stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(stderr));
    }
    format!(
        "<p><b>{}</b> reported an error (exit status {code}). Full output:</p>\n<pre>\n{}\n</pre>",
        htmlize::escape_text(stage.label()),
        htmlize::escape_text(combined.trim())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_error_message_escapes_and_trims_output() {
        let msg = program_error_message(
            Stage::Latex,
            1,
            b"\n! Undefined control sequence <\\foo>.\n",
            b"l.6 & more\n\n",
        );
        assert!(msg.starts_with("<p><b>latex</b> reported an error (exit status 1)."));
        assert!(msg.contains(
            "<pre>\n! Undefined control sequence &lt;\\foo&gt;.\nl.6 &amp; more\n</pre>"
        ));
    }

    #[test]
    fn file_names_share_base_name() {
        assert_eq!(file_name(".tex"), "klfformula.tex");
        assert_eq!(file_name("-bbox.eps"), "klfformula-bbox.eps");
    }
}
