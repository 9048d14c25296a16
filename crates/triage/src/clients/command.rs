//! Helper for running external CLI tools.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound for a single tool invocation unless the caller sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Failures when invoking an external tool.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The binary could not be started.
    #[error("failed to execute {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool did not finish in time and was killed.
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The tool ran and exited unsuccessfully.
    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The tool succeeded but its output could not be parsed.
    #[error("unexpected output from {program}")]
    Output {
        program: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args` and capture its output, whatever the exit code.
///
/// The child is killed if it is still running after `timeout`.
pub async fn capture<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.display().to_string();
    let args: Vec<S> = args.into_iter().collect();
    debug!(
        program = %name,
        args = ?args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(),
        "Running command"
    );

    let mut command = Command::new(program);
    command.args(&args).kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result.map_err(|source| CommandError::Spawn {
            program: name,
            source,
        })?,
        Err(_) => {
            warn!(program = %name, ?timeout, "Command timed out");
            return Err(CommandError::Timeout {
                program: name,
                timeout,
            });
        }
    };

    Ok(CommandOutput {
        code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run `program` and return stdout, failing on a non-zero exit.
pub async fn run<I, S>(program: &Path, args: I, timeout: Duration) -> Result<String, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = capture(program, args, timeout).await?;
    if !output.success {
        return Err(CommandError::Failed {
            program: program.display().to_string(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}

/// Run `program` and parse its stdout as JSON.
pub async fn run_json<T, I, S>(program: &Path, args: I, timeout: Duration) -> Result<T, CommandError>
where
    T: serde::de::DeserializeOwned,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let stdout = run(program, args, timeout).await?;
    serde_json::from_str(&stdout).map_err(|source| CommandError::Output {
        program: program.display().to_string(),
        source,
    })
}
