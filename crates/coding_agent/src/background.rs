//! Detached commands tracked by small integer handles.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::executor::{kill_process_group, shell_command};
use crate::lock_unpoisoned;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const REMINDER_PREFIX: &str = "[background-reminder]";

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("background process with PID {handle} not found")]
    NotFound { handle: u32 },

    #[error("failed to launch background command: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Finished { exit_code: Option<i32> },
    Killed,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("Running"),
            Self::Finished {
                exit_code: Some(code),
            } => write!(f, "Finished (Exit Code: {code})"),
            Self::Finished { exit_code: None } => f.write_str("Finished (terminated by signal)"),
            Self::Killed => f.write_str("Killed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStatus {
    Killed,
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub handle: u32,
    pub command: String,
    pub started_at: String,
    pub status: ProcessStatus,
}

struct Record {
    command: String,
    started_at: String,
    status: ProcessStatus,
    output: Arc<Mutex<Vec<u8>>>,
    child: Arc<Mutex<Child>>,
}

struct Registry {
    next_handle: u32,
    records: BTreeMap<u32, Record>,
}

/// Shared handle to the process registry. Clones observe the same processes.
#[derive(Clone)]
pub struct BackgroundProcessManager {
    registry: Arc<Mutex<Registry>>,
    workspace: PathBuf,
    retention: Option<usize>,
    poll_interval: Duration,
}

impl fmt::Debug for BackgroundProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundProcessManager")
            .field("workspace", &self.workspace)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl BackgroundProcessManager {
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_handle: 1,
                records: BTreeMap::new(),
            })),
            workspace: workspace.into(),
            retention: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Caps how many finished records are kept; the oldest are evicted on launch.
    #[must_use]
    pub fn with_retention(mut self, retention: Option<usize>) -> Self {
        self.retention = retention;
        self
    }

    /// How often supervisors check whether their process has exited.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Starts `command` detached and returns its handle without waiting.
    pub fn launch(&self, command: &str) -> Result<u32, BackgroundError> {
        let mut builder = shell_command(command);
        builder
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = builder
            .spawn()
            .map_err(|source| BackgroundError::Spawn { source })?;
        let stdout = child.stdout.take();
        let output = Arc::new(Mutex::new(Vec::new()));
        let child = Arc::new(Mutex::new(child));
        let started_at = session_store::now_rfc3339().unwrap_or_default();

        let handle = {
            let mut registry = lock_unpoisoned(&self.registry);
            if let Some(retention) = self.retention {
                evict_finished(&mut registry, retention);
            }
            let handle = registry.next_handle;
            registry.next_handle = registry.next_handle.saturating_add(1);
            registry.records.insert(
                handle,
                Record {
                    command: command.to_string(),
                    started_at,
                    status: ProcessStatus::Running,
                    output: Arc::clone(&output),
                    child: Arc::clone(&child),
                },
            );
            handle
        };

        if let Err(source) = self.start_threads(handle, stdout, output, Arc::clone(&child)) {
            kill_process_group(&mut lock_unpoisoned(&child));
            lock_unpoisoned(&self.registry).records.remove(&handle);
            return Err(BackgroundError::Spawn { source });
        }

        info!(handle, command, "background command started");
        Ok(handle)
    }

    fn start_threads(
        &self,
        handle: u32,
        stdout: Option<std::process::ChildStdout>,
        output: Arc<Mutex<Vec<u8>>>,
        child: Arc<Mutex<Child>>,
    ) -> io::Result<()> {
        let reader = thread::Builder::new()
            .name(format!("background-output-{handle}"))
            .spawn(move || {
                let Some(mut stdout) = stdout else {
                    return;
                };
                let mut chunk = [0_u8; 4096];
                loop {
                    match stdout.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => lock_unpoisoned(&output).extend_from_slice(&chunk[..read]),
                    }
                }
            })?;

        let registry = Arc::clone(&self.registry);
        let poll_interval = self.poll_interval;
        thread::Builder::new()
            .name(format!("background-supervisor-{handle}"))
            .spawn(move || {
                let status = wait_for_exit(&child, poll_interval);
                let _ = reader.join();
                let mut registry = lock_unpoisoned(&registry);
                if let Some(record) = registry.records.get_mut(&handle) {
                    if record.status == ProcessStatus::Running {
                        record.status = ProcessStatus::Finished {
                            exit_code: status.and_then(|status| status.code()),
                        };
                    }
                }
                debug!(handle, "background command exited");
            })?;
        Ok(())
    }

    /// Kills the process group behind `handle`. Finished processes are not an error.
    pub fn kill(&self, handle: u32) -> Result<KillStatus, BackgroundError> {
        let child = {
            let mut registry = lock_unpoisoned(&self.registry);
            let record = registry
                .records
                .get_mut(&handle)
                .ok_or(BackgroundError::NotFound { handle })?;
            if record.status != ProcessStatus::Running {
                return Ok(KillStatus::AlreadyFinished);
            }
            // The process may have exited since the supervisor last looked.
            let exited = lock_unpoisoned(&record.child).try_wait();
            if let Ok(Some(status)) = exited {
                record.status = ProcessStatus::Finished {
                    exit_code: status.code(),
                };
                return Ok(KillStatus::AlreadyFinished);
            }
            record.status = ProcessStatus::Killed;
            Arc::clone(&record.child)
        };

        kill_process_group(&mut lock_unpoisoned(&child));
        info!(handle, "background command killed");
        Ok(KillStatus::Killed)
    }

    /// Output captured so far, decoded lossily.
    pub fn logs(&self, handle: u32) -> Result<String, BackgroundError> {
        let output = {
            let registry = lock_unpoisoned(&self.registry);
            let record = registry
                .records
                .get(&handle)
                .ok_or(BackgroundError::NotFound { handle })?;
            Arc::clone(&record.output)
        };
        let bytes = lock_unpoisoned(&output);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProcessSummary> {
        lock_unpoisoned(&self.registry)
            .records
            .iter()
            .map(|(handle, record)| ProcessSummary {
                handle: *handle,
                command: record.command.clone(),
                started_at: record.started_at.clone(),
                status: record.status,
            })
            .collect()
    }

    #[must_use]
    pub fn running(&self) -> Vec<ProcessSummary> {
        self.list()
            .into_iter()
            .filter(|summary| summary.status == ProcessStatus::Running)
            .collect()
    }

    #[must_use]
    pub fn has_running(&self) -> bool {
        lock_unpoisoned(&self.registry)
            .records
            .values()
            .any(|record| record.status == ProcessStatus::Running)
    }

    /// Forgets `handle`, killing it first when still running.
    pub fn remove(&self, handle: u32) -> Result<(), BackgroundError> {
        self.kill(handle)?;
        lock_unpoisoned(&self.registry).records.remove(&handle);
        Ok(())
    }

    /// Human-readable listing shared by the tool and the `/bg` command.
    #[must_use]
    pub fn describe(&self) -> String {
        let processes = self.list();
        if processes.is_empty() {
            return "No background commands running.".to_string();
        }

        let mut listing = String::from("Background Commands:");
        for process in processes {
            listing.push_str(&format!(
                "\n- PID: {} | Command: {} | Status: {}",
                process.handle, process.command, process.status
            ));
        }
        listing
    }

    /// Hidden system note listing running handles, or `None` when nothing runs.
    #[must_use]
    pub fn reminder(&self) -> Option<String> {
        let running = self.running();
        if running.is_empty() {
            return None;
        }

        let mut reminder = format!("{REMINDER_PREFIX} Background commands still running:");
        for summary in running {
            reminder.push_str(&format!(
                "\n- PID: {} | Command: {}",
                summary.handle, summary.command
            ));
        }
        reminder.push_str("\nUse get_background_logs to check on them or kill_background_command when done.");
        Some(reminder)
    }
}

fn wait_for_exit(child: &Mutex<Child>, poll_interval: Duration) -> Option<ExitStatus> {
    loop {
        match lock_unpoisoned(child).try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        thread::sleep(poll_interval);
    }
}

fn evict_finished(registry: &mut Registry, retention: usize) {
    let finished: Vec<u32> = registry
        .records
        .iter()
        .filter(|(_, record)| record.status != ProcessStatus::Running)
        .map(|(handle, _)| *handle)
        .collect();
    let excess = finished.len().saturating_sub(retention);
    for handle in finished.into_iter().take(excess) {
        registry.records.remove(&handle);
    }
}
