//! External command description and execution.
//!
//! Every subprocess the pipeline launches goes through a [`CommandRunner`].
//! [`SystemRunner`] spawns real processes; tests substitute scripted runners.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Whether a command's output is collected for echoing or handed to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    #[default]
    Captured,
    Streamed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Run `program args…` as a script through the runner's shell.
    pub shell: bool,
    pub output: OutputMode,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            shell: false,
            output: OutputMode::Captured,
            env: BTreeMap::new(),
        }
    }

    pub fn script(script: impl Into<String>) -> Self {
        Self {
            shell: true,
            ..Self::new(script)
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The command as a single line, used for logging and as the shell script.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// Interleaved stdout and stderr. Empty for streamed commands.
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Ordered list of directories searched for executables.
///
/// The pipeline never mutates the process-wide `PATH`; instead the search
/// path is carried in the pipeline context and exported to every child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn from_env() -> Self {
        let dirs = env::var_os("PATH")
            .map(|value| env::split_paths(&value).collect())
            .unwrap_or_default();
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.iter().any(|existing| existing == dir)
    }

    /// Returns `false` when `dir` was already present.
    pub fn prepend(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.contains(&dir) {
            return false;
        }
        self.dirs.insert(0, dir);
        true
    }

    /// Finds `program` on the search path. Path-qualified names resolve
    /// against the current directory.
    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        let cwd = env::current_dir().ok()?;
        self.locate_in(program, &cwd)
    }

    /// Like [`locate`](Self::locate), with path-qualified names such as
    /// `./configure` resolved against `cwd`.
    pub fn locate_in(&self, program: &str, cwd: &Path) -> Option<PathBuf> {
        if program.is_empty() {
            return None;
        }
        let paths = self.to_os_string().ok()?;
        which::which_in(program, Some(paths), cwd).ok()
    }

    pub fn to_os_string(&self) -> Result<OsString, PipelineError> {
        env::join_paths(&self.dirs).map_err(|err| {
            PipelineError::io(
                "failed to assemble PATH for child processes",
                io::Error::new(io::ErrorKind::InvalidInput, err),
            )
        })
    }
}

pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion. A non-zero exit is a successful `run`;
    /// only failure to launch or to collect output is an error.
    fn run(&self, spec: &CommandSpec, search_path: &SearchPath)
    -> Result<CommandResult, PipelineError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    shell: String,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new("bash")
    }
}

impl SystemRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn build(&self, spec: &CommandSpec, search_path: &SearchPath) -> Result<Command, PipelineError> {
        let cwd = std::path::absolute(spec.cwd.as_deref().unwrap_or(Path::new(".")))
            .map_err(|err| PipelineError::io("failed to resolve working directory", err))?;
        let mut command = if spec.shell {
            let shell = search_path
                .locate_in(&self.shell, &cwd)
                .unwrap_or_else(|| PathBuf::from(&self.shell));
            let mut command = Command::new(shell);
            command.arg("-c").arg(spec.command_line());
            command
        } else {
            let program = search_path
                .locate_in(&spec.program, &cwd)
                .unwrap_or_else(|| PathBuf::from(&spec.program));
            let mut command = Command::new(program);
            command.args(&spec.args);
            command
        };
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        command.env("PATH", search_path.to_os_string()?);
        command.envs(&spec.env);
        Ok(command)
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        search_path: &SearchPath,
    ) -> Result<CommandResult, PipelineError> {
        let mut command = self.build(spec, search_path)?;
        let line = spec.command_line();
        match spec.output {
            OutputMode::Streamed => {
                let status = command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .map_err(|source| PipelineError::Spawn {
                        command: line,
                        source,
                    })?;
                Ok(CommandResult {
                    exit_code: exit_code(status),
                    output: String::new(),
                })
            }
            OutputMode::Captured => capture_combined(command, line),
        }
    }
}

/// Both stdout and stderr share one pipe so their interleaving survives.
fn capture_combined(mut command: Command, line: String) -> Result<CommandResult, PipelineError> {
    let (mut reader, writer) =
        io::pipe().map_err(|err| PipelineError::io("failed to create output pipe", err))?;
    let stderr_writer = writer
        .try_clone()
        .map_err(|err| PipelineError::io("failed to duplicate output pipe", err))?;
    command
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer);

    let spawned = command.spawn();
    // The command still owns our copies of the write end; reading would never
    // see EOF while they are open.
    drop(command);
    let mut child = spawned.map_err(|source| PipelineError::Spawn {
        command: line.clone(),
        source,
    })?;

    let mut buffer = Vec::new();
    let read = reader.read_to_end(&mut buffer);
    let status = child
        .wait()
        .map_err(|err| PipelineError::io(format!("failed to wait for `{line}`"), err))?;
    read.map_err(|err| PipelineError::io(format!("failed to read output of `{line}`"), err))?;

    Ok(CommandResult {
        exit_code: exit_code(status),
        output: String::from_utf8_lossy(&buffer).into_owned(),
    })
}

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
