//! External command plumbing.
//!
//! Every host tool the pipeline drives (dd, du, losetup, sfdisk, mkdosfs,
//! mount, grub-mkimage, ...) is described as a [`Cmd`] and executed through a
//! [`CommandRunner`]. Production code uses [`SystemRunner`]; tests substitute a
//! recorder so the pipeline can be exercised without root or real devices.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, trace};

/// A host command invocation: program, arguments and optional stdin payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            error_msg: None,
            allow_fail: false,
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

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Bytes written to the child's stdin before waiting on it.
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Message prefixed to the error when the command fails.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Report a non-zero exit as an unsuccessful [`CmdOutput`] instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_payload(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn is_allow_fail(&self) -> bool {
        self.allow_fail
    }

    /// Run with the real host runner.
    pub fn run(&self) -> Result<CmdOutput, ExternalToolError> {
        SystemRunner.run(self)
    }

    pub fn run_with(&self, runner: &dyn CommandRunner) -> Result<CmdOutput, ExternalToolError> {
        runner.run(self)
    }

    pub(crate) fn failed(&self, status: Option<i32>, stderr: &str) -> ExternalToolError {
        ExternalToolError {
            program: self.program.clone(),
            args: self.args.clone(),
            message: self.error_msg.clone(),
            kind: ToolFailure::Exit {
                status,
                stderr: stderr.trim().to_string(),
            },
        }
    }

    fn spawn_failed(&self, source: std::io::Error) -> ExternalToolError {
        ExternalToolError {
            program: self.program.clone(),
            args: self.args.clone(),
            message: self.error_msg.clone(),
            kind: ToolFailure::Spawn(source),
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// How an external tool failed.
#[derive(Debug)]
pub enum ToolFailure {
    Spawn(std::io::Error),
    Exit {
        status: Option<i32>,
        stderr: String,
    },
}

/// An external tool could not be started or exited non-zero.
#[derive(Debug)]
pub struct ExternalToolError {
    pub program: String,
    pub args: Vec<String>,
    pub message: Option<String>,
    pub kind: ToolFailure,
}

impl fmt::Display for ExternalToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(msg) = &self.message {
            write!(f, "{}: ", msg)?;
        }
        match &self.kind {
            ToolFailure::Spawn(err) => write!(f, "could not run {}: {}", self.program, err),
            ToolFailure::Exit { status, stderr } => {
                match status {
                    Some(code) => write!(f, "{} exited with status {}", self.program, code)?,
                    None => write!(f, "{} was terminated by a signal", self.program)?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ExternalToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ToolFailure::Spawn(err) => Some(err),
            ToolFailure::Exit { .. } => None,
        }
    }
}

/// Executes host commands on behalf of the pipeline.
pub trait CommandRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput, ExternalToolError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput, ExternalToolError> {
        debug!("running: {}", cmd);

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| cmd.spawn_failed(e))?;

        if let (Some(payload), Some(mut stdin)) = (cmd.stdin.as_ref(), child.stdin.take()) {
            stdin.write_all(payload).map_err(|e| cmd.spawn_failed(e))?;
        }

        let output = child.wait_with_output().map_err(|e| cmd.spawn_failed(e))?;
        let result = CmdOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!("{} -> {:?}", cmd.program, result.status);

        if !result.success() && !cmd.allow_fail {
            return Err(cmd.failed(result.status, &result.stderr));
        }
        Ok(result)
    }
}
