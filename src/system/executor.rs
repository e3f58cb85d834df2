// src/system/executor.rs

use crate::CancellationToken;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, #[source] std::io::Error),
    #[error("Command '{command}' exited with code {code}.")]
    NonZeroExitStatus { command: String, code: i32 },
    #[error("Command '{command}' was terminated by signal {signal}.")]
    Signal { command: String, signal: i32 },
    #[error("Command '{command}' was interrupted.")]
    Interrupted { command: String },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl ExecutionError {
    /// The exit code the process should end with when this error reaches the top level.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NonZeroExitStatus { code, .. } => *code,
            Self::Signal { signal, .. } => 128 + signal,
            Self::Interrupted { .. } => 130,
            _ => 1,
        }
    }
}

fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program];
    parts.extend(args.iter().map(String::as_str));
    shlex::try_join(parts.iter().copied()).unwrap_or_else(|_| parts.join(" "))
}

fn status_to_result(command: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ExecutionError::NonZeroExitStatus {
            command: command.to_string(),
            code,
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExecutionError::Signal {
                command: command.to_string(),
                signal,
            });
        }
    }
    Err(ExecutionError::NonZeroExitStatus {
        command: command.to_string(),
        code: 1,
    })
}

/// Resolves when the process receives SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if res.is_err() {
                            terminate.recv().await;
                        }
                    }
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                log::debug!("SIGTERM listener unavailable: {}", e);
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn supervise(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
    cancellation_token: &CancellationToken,
) -> Result<(), ExecutionError> {
    let display = display_command(program, args);
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .current_dir(dunce::simplified(cwd))
        .env_clear()
        .envs(env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?;

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?,
        _ = shutdown_signal() => {
            cancellation_token.store(true, Ordering::SeqCst);
            log::debug!("Signal received, stopping child process of '{}'", display);
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to stop child process of '{}': {}", display, e);
            }
            let _ = child.wait().await;
            return Err(ExecutionError::Interrupted { command: display });
        }
    };

    status_to_result(&display, status)
}

/// Runs a program to completion with inherited standard streams.
///
/// The child receives exactly `env` (the derived environment), not the live process
/// environment. SIGINT and SIGTERM received while it runs stop the child and surface as
/// [`ExecutionError::Interrupted`]; the cancellation token is raised so callers running a
/// sequence of steps stop before the next one.
pub fn run_process(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
    cancellation_token: &CancellationToken,
) -> Result<(), ExecutionError> {
    if cancellation_token.load(Ordering::SeqCst) {
        return Err(ExecutionError::Interrupted {
            command: display_command(program, args),
        });
    }
    log::debug!("Running '{}'", display_command(program, args));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ExecutionError::CommandFailed(display_command(program, args), e))?;
    runtime.block_on(supervise(program, args, cwd, env, cancellation_token))
}

/// A shell-like command line split into words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub words: Vec<String>,
    /// Set by a leading `-`: a failing exit status is not fatal.
    pub ignore_errors: bool,
}

impl CommandLine {
    /// A blank line yields no words; callers decide whether that is an error.
    pub fn parse(command_line: &str) -> Result<Self, ExecutionError> {
        let trimmed = command_line.trim();
        let (line, ignore_errors) = match trimmed.strip_prefix('-') {
            Some(rest) => (rest.trim(), true),
            None => (trimmed, false),
        };
        let words = shlex::split(line).ok_or_else(|| ExecutionError::CommandParse(line.to_string()))?;
        Ok(Self { words, ignore_errors })
    }

    /// Applies the leading `-` to the outcome of running this line.
    pub fn settle(&self, result: Result<(), ExecutionError>) -> Result<(), ExecutionError> {
        match result {
            Err(ExecutionError::NonZeroExitStatus { command, code }) if self.ignore_errors => {
                log::debug!("Ignoring exit code {} of '{}'", code, command);
                Ok(())
            }
            other => other,
        }
    }
}

/// Runs a program and captures its standard output. Standard error is discarded.
/// Used to read the help metadata of an executable.
pub fn capture_output(
    program: &Path,
    args: &[&str],
    env: &BTreeMap<String, String>,
) -> Result<String, ExecutionError> {
    let display = program.display().to_string();
    let output = std::process::Command::new(program)
        .args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?;

    status_to_result(&display, output.status)?;

    String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: display,
        source: e,
    })
}
