//! Foreground shell execution with combined output capture.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use wait_timeout::ChildExt;

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch command: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for command: {source}")]
    Wait {
        output: String,
        #[source]
        source: io::Error,
    },

    #[error("command execution failed: {status}")]
    Failed { output: String, status: String },

    #[error("command timed out after {}s", timeout.as_secs())]
    TimedOut { output: String, timeout: Duration },
}

impl ExecError {
    /// Output captured before the failure, if any.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Spawn { .. } => "",
            Self::Wait { output, .. }
            | Self::Failed { output, .. }
            | Self::TimedOut { output, .. } => output,
        }
    }
}

/// Runs `command` through the platform shell inside `workspace` and waits for it.
///
/// Stderr is folded into stdout. The pipe is drained on its own thread so a
/// chatty command cannot fill it and stall the wait.
pub fn run_foreground(
    command: &str,
    workspace: &Path,
    timeout: Option<Duration>,
    env: &[(&str, &str)],
) -> Result<CommandOutput, ExecError> {
    let mut builder = shell_command(command);
    builder
        .current_dir(workspace)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = builder.spawn().map_err(|source| ExecError::Spawn { source })?;
    let stdout = child.stdout.take();
    let reader = match thread::Builder::new()
        .name("command-output".to_string())
        .spawn(move || read_pipe_bytes(stdout))
    {
        Ok(reader) => reader,
        Err(source) => {
            kill_process_group(&mut child);
            let _ = child.wait();
            return Err(ExecError::Spawn { source });
        }
    };

    let status = match timeout {
        Some(timeout) => match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                kill_process_group(&mut child);
                let _ = child.wait();
                let output = collect_output(reader);
                return Err(ExecError::TimedOut { output, timeout });
            }
            Err(source) => {
                kill_process_group(&mut child);
                let _ = child.wait();
                let output = collect_output(reader);
                return Err(ExecError::Wait { output, source });
            }
        },
        None => match child.wait() {
            Ok(status) => status,
            Err(source) => {
                let output = collect_output(reader);
                return Err(ExecError::Wait { output, source });
            }
        },
    };

    let output = collect_output(reader);
    let status_label = format_exit_status(status);
    if status.success() {
        Ok(CommandOutput {
            output,
            status: status_label,
        })
    } else {
        Err(ExecError::Failed {
            output,
            status: status_label,
        })
    }
}

/// Shell invocation with stderr merged into stdout, started in its own process group.
pub(crate) fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        let mut builder = Command::new("sh");
        builder.arg("-c").arg(format!("exec 2>&1\n{command}"));
        builder.process_group(0);
        builder
    }

    #[cfg(not(unix))]
    {
        let mut builder = Command::new("cmd");
        builder.arg("/C").arg(format!("{command} 2>&1"));
        builder
    }
}

/// Kills the child together with everything it started.
pub(crate) fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: kill(2) with a negative pid only signals; it touches no memory.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

fn collect_output(reader: JoinHandle<Vec<u8>>) -> String {
    let bytes = reader.join().unwrap_or_default();
    truncate_to_byte_limit(
        String::from_utf8_lossy(&bytes).into_owned(),
        DEFAULT_MAX_OUTPUT_BYTES,
    )
}

fn read_pipe_bytes(pipe: Option<impl Read>) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };

    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    bytes
}

pub(crate) fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

pub(crate) fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_to_byte_limit;

    #[test]
    fn truncation_respects_char_boundaries() {
        let content = "ab\u{e9}cd".to_string();
        assert_eq!(truncate_to_byte_limit(content.clone(), 10), content);
        assert_eq!(
            truncate_to_byte_limit(content, 3),
            "ab\n[truncated]".to_string()
        );
    }
}
