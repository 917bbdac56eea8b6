#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_provider::Completion;
use agent_provider_mock::ScriptedCompletionService;
use coding_agent::checkpoint::CheckpointManager;
use coding_agent::config::{AgentConfig, ExecutionMode};
use coding_agent::container::SystemSnapshotter;
use coding_agent::conversation::RunState;
use coding_agent::dispatcher::Dispatcher;
use coding_agent::gate::{CommandDecision, ConfirmationGate};
use coding_agent::paths::StatePaths;
use coding_agent::shadow_git::{SnapshotError, SnapshotStore, Staged};
use tempfile::TempDir;

/// In-memory file layer: every stage reports a change and commits are numbered.
#[derive(Debug, Default)]
pub struct FakeSnapshotStore {
    fail: bool,
    fail_restore: bool,
    commits: Mutex<Vec<(String, String)>>,
    restores: Mutex<Vec<(String, String)>>,
}

impl FakeSnapshotStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Snapshots succeed but every restore fails.
    pub fn failing_restore() -> Self {
        Self {
            fail_restore: true,
            ..Self::default()
        }
    }

    pub fn commits(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.commits).clone()
    }

    pub fn restores(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.restores).clone()
    }
}

impl SnapshotStore for FakeSnapshotStore {
    fn stage_all(&self, _history: &str) -> Result<Staged, SnapshotError> {
        if self.fail {
            return Err(SnapshotError::Unavailable {
                reason: "snapshot store offline".to_string(),
            });
        }
        Ok(Staged::Changed {
            diff: "diff --git a/file b/file".to_string(),
        })
    }

    fn commit(&self, history: &str, message: &str) -> Result<String, SnapshotError> {
        let mut commits = lock_unpoisoned(&self.commits);
        commits.push((history.to_string(), message.to_string()));
        Ok(format!("commit-{}", commits.len()))
    }

    fn restore(&self, history: &str, hash: &str) -> Result<(), SnapshotError> {
        if self.fail_restore {
            return Err(SnapshotError::Git {
                args: format!("checkout --quiet -f {hash}"),
                status: "exit_code=128".to_string(),
                stderr: "fatal: unable to write new index file".to_string(),
            });
        }
        lock_unpoisoned(&self.restores).push((history.to_string(), hash.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeSystemSnapshotter {
    pub in_container: bool,
    pub fail: bool,
}

impl SystemSnapshotter for FakeSystemSnapshotter {
    fn in_container(&self) -> bool {
        self.in_container
    }

    fn commit_image(&self, tag: &str) -> Result<String, SnapshotError> {
        if self.fail {
            return Err(SnapshotError::Unavailable {
                reason: "docker daemon unreachable".to_string(),
            });
        }
        Ok(tag.to_string())
    }
}

/// Gate answering from a queue; an empty queue declines.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<CommandDecision>>,
    approve_plans: bool,
    asked: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn new(decisions: impl IntoIterator<Item = CommandDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn approving_plans(mut self) -> Self {
        self.approve_plans = true;
        self
    }

    pub fn asked(&self) -> Vec<String> {
        lock_unpoisoned(&self.asked).clone()
    }
}

impl ConfirmationGate for ScriptedGate {
    fn confirm_command(&self, command: &str) -> CommandDecision {
        lock_unpoisoned(&self.asked).push(command.to_string());
        lock_unpoisoned(&self.decisions)
            .pop_front()
            .unwrap_or(CommandDecision::Decline)
    }

    fn approve_plan(&self, name: &str, _description: &str) -> bool {
        lock_unpoisoned(&self.asked).push(format!("plan:{name}"));
        self.approve_plans
    }
}

/// Dispatcher wired to temp directories, a scripted model and fake snapshots.
pub struct Harness {
    pub state_dir: TempDir,
    pub workspace: TempDir,
    pub service: Arc<ScriptedCompletionService>,
    pub snapshots: Arc<FakeSnapshotStore>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(turns: impl IntoIterator<Item = Completion>) -> Self {
        Self::with_parts(
            ScriptedCompletionService::with_turns(turns),
            test_config(),
            FakeSnapshotStore::default(),
            Arc::new(ScriptedGate::default()),
        )
    }

    pub fn with_parts(
        service: ScriptedCompletionService,
        config: AgentConfig,
        snapshots: FakeSnapshotStore,
        gate: Arc<dyn ConfirmationGate>,
    ) -> Self {
        let state_dir = tempfile::tempdir().expect("temp state dir");
        let workspace = tempfile::tempdir().expect("temp workspace");
        let service = Arc::new(service);
        let snapshots = Arc::new(snapshots);
        let state_paths = StatePaths::new(state_dir.path());
        let checkpoints = CheckpointManager::new(
            state_paths.checkpoint_metadata_dir(),
            Arc::clone(&snapshots) as Arc<dyn SnapshotStore>,
            Arc::new(FakeSystemSnapshotter::default()),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&service) as Arc<dyn agent_provider::CompletionService>,
            config,
            state_paths,
            workspace.path(),
        )
        .with_gate(gate)
        .with_checkpoints(checkpoints);

        Self {
            state_dir,
            workspace,
            service,
            snapshots,
            dispatcher,
        }
    }

    pub fn run_state(&self) -> RunState {
        self.dispatcher
            .new_run_state(None)
            .expect("fresh run state")
    }
}

/// Defaults with the mock provider and commands running unconfirmed.
pub fn test_config() -> AgentConfig {
    AgentConfig {
        provider: "mock".to_string(),
        model: "mock-model".to_string(),
        execution_mode: ExecutionMode::Yolo,
        ..AgentConfig::default()
    }
}

/// Texts of the tool messages in order, paired with their call ids.
pub fn tool_results(state: &RunState) -> Vec<(String, String)> {
    state
        .conversation
        .messages
        .iter()
        .filter(|message| message.role == agent_provider::Role::Tool)
        .map(|message| {
            (
                message.tool_call_id.clone().unwrap_or_default(),
                message.text_content().to_string(),
            )
        })
        .collect()
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
