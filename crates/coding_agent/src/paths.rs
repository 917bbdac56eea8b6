//! On-disk layout of the state root and the per-workspace `.agent/` directory.

use std::path::{Path, PathBuf};

use crate::config::ConfigError;

pub const STATE_ROOT_ENV_VAR: &str = "CODING_AGENT_HOME";

/// Directories under the user-level state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    #[must_use]
    pub fn todos_dir(&self) -> PathBuf {
        self.root.join("todos")
    }

    #[must_use]
    pub fn checkpoint_metadata_dir(&self) -> PathBuf {
        self.root.join("checkpoints").join("metadata")
    }

    #[must_use]
    pub fn shadow_git_dir(&self) -> PathBuf {
        self.root.join("checkpoints").join("shadow_git")
    }

    #[must_use]
    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }
}

/// Directories under `<workspace>/.agent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    workspace: PathBuf,
}

impl WorkspacePaths {
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    #[must_use]
    pub fn agent_dir(&self) -> PathBuf {
        self.workspace.join(".agent")
    }

    #[must_use]
    pub fn notes_dir(&self) -> PathBuf {
        self.agent_dir().join("notes")
    }

    #[must_use]
    pub fn plans_dir(&self) -> PathBuf {
        self.agent_dir().join("plans")
    }

    #[must_use]
    pub fn current_plan_file(&self) -> PathBuf {
        self.agent_dir().join("current_plan.md")
    }

    #[must_use]
    pub fn skills_dir(&self) -> PathBuf {
        self.agent_dir().join("skills")
    }
}

/// Picks the state root: explicit flag, then `CODING_AGENT_HOME`, then `~/.config/coding-agent`.
pub fn resolve_state_root(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    resolve_state_root_with(explicit, |name| std::env::var_os(name), dirs::home_dir)
}

fn resolve_state_root_with<E, H>(
    explicit: Option<PathBuf>,
    env: E,
    home: H,
) -> Result<PathBuf, ConfigError>
where
    E: Fn(&str) -> Option<std::ffi::OsString>,
    H: Fn() -> Option<PathBuf>,
{
    if let Some(root) = explicit {
        return Ok(root);
    }
    if let Some(root) = env(STATE_ROOT_ENV_VAR).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    home()
        .map(|home| home.join(".config").join("coding-agent"))
        .ok_or(ConfigError::NoHomeDirectory)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{resolve_state_root_with, StatePaths, WorkspacePaths};

    #[test]
    fn state_root_prefers_flag_then_env_then_home() {
        let from_flag = resolve_state_root_with(
            Some(PathBuf::from("/flag")),
            |_| Some("/env".into()),
            || Some(PathBuf::from("/home/me")),
        )
        .expect("flag root");
        assert_eq!(from_flag, PathBuf::from("/flag"));

        let from_env = resolve_state_root_with(
            None,
            |_| Some("/env".into()),
            || Some(PathBuf::from("/home/me")),
        )
        .expect("env root");
        assert_eq!(from_env, PathBuf::from("/env"));

        let from_home =
            resolve_state_root_with(None, |_| None, || Some(PathBuf::from("/home/me")))
                .expect("home root");
        assert_eq!(from_home, PathBuf::from("/home/me/.config/coding-agent"));

        assert!(resolve_state_root_with(None, |_| None, || None).is_err());
    }

    #[test]
    fn layouts_nest_under_their_roots() {
        let state = StatePaths::new("/state");
        assert_eq!(
            state.checkpoint_metadata_dir(),
            PathBuf::from("/state/checkpoints/metadata")
        );
        assert_eq!(
            state.shadow_git_dir(),
            PathBuf::from("/state/checkpoints/shadow_git")
        );

        let workspace = WorkspacePaths::new("/work");
        assert_eq!(
            workspace.current_plan_file(),
            PathBuf::from("/work/.agent/current_plan.md")
        );
        assert_eq!(workspace.notes_dir(), PathBuf::from("/work/.agent/notes"));
    }
}
