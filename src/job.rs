//! Logged, checked execution of one external command.
//!
//! A [`Job`] verifies its required inputs before anything is spawned, appends
//! a header naming the command to its log files before the process starts,
//! and verifies its required outputs after a zero exit.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::error::QimbaError;

const LOG_RULE_WIDTH: usize = 80;
const FAILURE_TAIL_LINES: usize = 20;

/// Process creation seam; tests substitute counting or scripted launchers.
pub trait Launcher: Send + Sync {
    fn launch(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, command: &mut Command) -> io::Result<Output> {
        command.output()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    argv: Vec<OsString>,
    required_inputs: Vec<PathBuf>,
    required_outputs: Vec<PathBuf>,
    stdout_log: Option<PathBuf>,
    stderr_log: Option<PathBuf>,
}

/// Result of a successful run. Streams that went to a log file are `None`.
#[derive(Debug)]
pub struct JobOutput {
    pub status: ExitStatus,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

impl JobOutput {
    pub fn stdout_text(&self) -> Option<String> {
        self.stdout
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn stderr_text(&self) -> Option<String> {
        self.stderr
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Job {
    pub fn new<I, S>(argv: I) -> Result<Self, QimbaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let argv = argv.into_iter().map(Into::into).collect::<Vec<_>>();
        if argv.first().is_none_or(|program| program.is_empty()) {
            return Err(QimbaError::InvalidArgument(
                "job command must name a program".to_string(),
            ));
        }
        Ok(Self {
            argv,
            required_inputs: Vec::new(),
            required_outputs: Vec::new(),
            stdout_log: None,
            stderr_log: None,
        })
    }

    pub fn require_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.required_inputs.push(path.into());
        self
    }

    pub fn require_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.required_outputs.push(path.into());
        self
    }

    pub fn log_stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_log = Some(path.into());
        self
    }

    pub fn log_stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_log = Some(path.into());
        self
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn program(&self) -> String {
        self.argv[0].to_string_lossy().into_owned()
    }

    pub fn required_inputs(&self) -> &[PathBuf] {
        &self.required_inputs
    }

    pub fn required_outputs(&self) -> &[PathBuf] {
        &self.required_outputs
    }

    pub fn stdout_log_path(&self) -> Option<&Path> {
        self.stdout_log.as_deref()
    }

    pub fn stderr_log_path(&self) -> Option<&Path> {
        self.stderr_log.as_deref()
    }

    /// The argument vector joined by single spaces, as written to the logs.
    pub fn command_line(&self) -> String {
        self.argv
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn run(&self) -> Result<JobOutput, QimbaError> {
        self.run_with(&SystemLauncher)
    }

    pub fn run_with(&self, launcher: &dyn Launcher) -> Result<JobOutput, QimbaError> {
        if let Some(missing) = self.required_inputs.iter().find(|path| !path.exists()) {
            return Err(QimbaError::InputMissing(missing.clone()));
        }

        let command_line = self.command_line();
        let header = log_header(&command_line, Local::now());

        let stdout_log = self.stdout_log.as_deref().map(open_log).transpose()?;
        let stderr_log = self.stderr_log.as_deref().map(open_log).transpose()?;
        if let Some((path, file)) = &stdout_log {
            write_header(path, file, &header)?;
        }
        if let Some((path, file)) = &stderr_log {
            if self.stdout_log.as_deref() != Some(path.as_path()) {
                write_header(path, file, &header)?;
            }
        }

        let mut command = Command::new(&self.argv[0]);
        command.args(&self.argv[1..]);
        command.stdout(match stdout_log {
            Some((_, file)) => Stdio::from(file),
            None => Stdio::piped(),
        });
        command.stderr(match stderr_log {
            Some((_, file)) => Stdio::from(file),
            None => Stdio::piped(),
        });

        info!(command = %command_line, "running job");
        let output = launcher
            .launch(&mut command)
            .map_err(|source| QimbaError::Spawn {
                program: self.program(),
                source,
            })?;
        drop(command);

        if !output.status.success() {
            return Err(QimbaError::ProcessFailed {
                command: command_line,
                code: output.status.code(),
                detail: self.failure_detail(&output),
            });
        }

        if let Some(missing) = self.required_outputs.iter().find(|path| !path.exists()) {
            return Err(QimbaError::OutputMissing(missing.clone()));
        }
        debug!(command = %command_line, "job finished");

        Ok(JobOutput {
            status: output.status,
            stdout: self.stdout_log.is_none().then_some(output.stdout),
            stderr: self.stderr_log.is_none().then_some(output.stderr),
        })
    }

    fn failure_detail(&self, output: &Output) -> Option<String> {
        if let Some(path) = &self.stderr_log {
            return Some(format!("check the log at {}", path.display()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines = stderr.trim_end().lines().collect::<Vec<_>>();
        if lines.is_empty() {
            return None;
        }
        let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
        Some(lines[start..].join("\n"))
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Separator, timestamp and command text written before every attempt.
pub fn log_header(command_line: &str, at: DateTime<Local>) -> String {
    let rule = "=".repeat(LOG_RULE_WIDTH);
    format!(
        "\n{rule}\n{}\nCommand: {command_line}\n{rule}\n",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn open_log(path: &Path) -> Result<(PathBuf, File), QimbaError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| QimbaError::fs(parent, err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| QimbaError::fs(path, err))?;
    Ok((path.to_path_buf(), file))
}

fn write_header(path: &Path, mut file: &File, header: &str) -> Result<(), QimbaError> {
    file.write_all(header.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|err| QimbaError::fs(path, err))
}
