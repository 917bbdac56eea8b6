//! System-layer snapshots: committing the running container to an image.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::executor::format_exit_status;
use crate::shadow_git::SnapshotError;

pub trait SystemSnapshotter: Send + Sync {
    fn in_container(&self) -> bool;

    /// Commits the current system state under `tag` and returns the image reference.
    fn commit_image(&self, tag: &str) -> Result<String, SnapshotError>;
}

/// Used when the agent does not run inside a container.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSystemSnapshot;

impl SystemSnapshotter for NoSystemSnapshot {
    fn in_container(&self) -> bool {
        false
    }

    fn commit_image(&self, _tag: &str) -> Result<String, SnapshotError> {
        Err(SnapshotError::Unavailable {
            reason: "not running inside a container".to_string(),
        })
    }
}

/// Commits the enclosing Docker container through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerSnapshotter {
    marker: PathBuf,
    hostname_file: PathBuf,
}

impl Default for DockerSnapshotter {
    fn default() -> Self {
        Self {
            marker: PathBuf::from("/.dockerenv"),
            hostname_file: PathBuf::from("/etc/hostname"),
        }
    }
}

impl DockerSnapshotter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Docker sets the hostname to the short container id.
    fn container_id(&self) -> Option<String> {
        fs::read_to_string(&self.hostname_file)
            .ok()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn docker(&self, args: &[&str]) -> Result<String, SnapshotError> {
        debug!(args = args.join(" "), "running docker");
        let output = Command::new("docker")
            .args(args)
            .output()
            .map_err(|source| SnapshotError::Launch {
                program: "docker",
                source,
            })?;
        if !output.status.success() {
            return Err(SnapshotError::Docker {
                args: args.join(" "),
                status: format_exit_status(output.status),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SystemSnapshotter for DockerSnapshotter {
    fn in_container(&self) -> bool {
        self.marker.exists()
    }

    fn commit_image(&self, tag: &str) -> Result<String, SnapshotError> {
        if !self.in_container() {
            return NoSystemSnapshot.commit_image(tag);
        }
        let container_id = self
            .container_id()
            .ok_or_else(|| SnapshotError::Unavailable {
                reason: "cannot determine the container id".to_string(),
            })?;

        self.docker(&["ps", "-q"])?;
        self.docker(&["commit", &container_id, tag])?;
        Ok(tag.to_string())
    }
}

/// Docker snapshotter inside a container, the no-op one elsewhere.
#[must_use]
pub fn detect_system_snapshotter() -> std::sync::Arc<dyn SystemSnapshotter> {
    let docker = DockerSnapshotter::new();
    if docker.in_container() {
        std::sync::Arc::new(docker)
    } else {
        std::sync::Arc::new(NoSystemSnapshot)
    }
}
