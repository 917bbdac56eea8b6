mod support;

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use agent_provider::{CompletionService, Message, SamplingConfig, ToolCall};
use agent_provider_mock::{text_turn, ScriptedCompletionService};
use assert_matches::assert_matches;
use coding_agent::checkpoint::{CheckpointError, CheckpointManager, MAX_AUTO_CHECKPOINTS};
use coding_agent::container::NoSystemSnapshot;
use coding_agent::conversation::Conversation;
use coding_agent::shadow_git::ShadowGit;
use pretty_assertions::assert_eq;
use session_store::TokenUsage;
use support::{FakeSnapshotStore, FakeSystemSnapshotter};
use tempfile::tempdir;

fn manager_with(
    metadata_root: &Path,
    snapshots: Arc<FakeSnapshotStore>,
    system: FakeSystemSnapshotter,
) -> CheckpointManager {
    CheckpointManager::new(metadata_root, snapshots, Arc::new(system))
}

fn conversation() -> Conversation {
    let mut conversation = Conversation::new("You are a coding agent.");
    conversation.messages.push(Message::user("refactor main"));
    conversation
}

#[test]
fn automatic_checkpoints_are_pruned_but_manual_ones_kept() {
    let state = tempdir().expect("temp state");
    let manager = manager_with(
        state.path(),
        Arc::new(FakeSnapshotStore::default()),
        FakeSystemSnapshotter::default(),
    );
    let conversation = conversation();

    let first_manual = manager
        .create(&conversation, TokenUsage::default(), "before", false)
        .expect("manual checkpoint");
    let mut automatic = Vec::new();
    for index in 0..MAX_AUTO_CHECKPOINTS + 2 {
        let checkpoint = manager
            .create(
                &conversation,
                TokenUsage::default(),
                &format!("auto {index}"),
                true,
            )
            .expect("automatic checkpoint");
        automatic.push(checkpoint.id);
    }
    let second_manual = manager
        .create(&conversation, TokenUsage::default(), "after", false)
        .expect("manual checkpoint");

    let listed = manager.list(&conversation.id).expect("list checkpoints");
    let ids: Vec<&str> = listed.iter().map(|checkpoint| checkpoint.id.as_str()).collect();
    assert_eq!(listed.len(), MAX_AUTO_CHECKPOINTS + 2);
    assert_eq!(ids.first(), Some(&second_manual.id.as_str()));
    assert!(ids.contains(&first_manual.id.as_str()));
    assert!(!ids.contains(&automatic[0].as_str()));
    assert!(!ids.contains(&automatic[1].as_str()));
    assert!(ids.contains(&automatic[2].as_str()));
    assert_eq!(
        listed.iter().filter(|checkpoint| checkpoint.is_auto).count(),
        MAX_AUTO_CHECKPOINTS
    );
}

#[test]
fn restore_returns_history_without_the_dangling_tool_call() {
    let state = tempdir().expect("temp state");
    let snapshots = Arc::new(FakeSnapshotStore::default());
    let manager = manager_with(
        state.path(),
        Arc::clone(&snapshots),
        FakeSystemSnapshotter::default(),
    );
    let mut conversation = conversation();
    conversation.messages.push(Message::assistant_with_tool_calls(
        None,
        vec![ToolCall::new("c1", "execute_command", r#"{"command":"make"}"#)],
    ));
    let usage = TokenUsage {
        total_tokens: 120,
        ..TokenUsage::default()
    };

    let checkpoint = manager
        .create(&conversation, usage, "Auto-checkpoint before execute_command", true)
        .expect("create checkpoint");
    assert_eq!(checkpoint.snapshot_commit.as_deref(), Some("commit-1"));

    let restored = manager
        .restore(&conversation.id, &checkpoint.id)
        .expect("restore checkpoint");

    assert_eq!(restored.messages, conversation.messages[..2].to_vec());
    assert_eq!(restored.usage.total_tokens, 120);
    assert!(restored.warnings.is_empty());
    assert_eq!(
        snapshots.restores(),
        vec![(conversation.id.clone(), "commit-1".to_string())]
    );
}

#[test]
fn manual_checkpoints_use_their_name_as_commit_message() {
    let state = tempdir().expect("temp state");
    let snapshots = Arc::new(FakeSnapshotStore::default());
    let manager = manager_with(
        state.path(),
        Arc::clone(&snapshots),
        FakeSystemSnapshotter::default(),
    );

    manager
        .create(&conversation(), TokenUsage::default(), "Before refactor", false)
        .expect("create checkpoint");

    assert_eq!(snapshots.commits()[0].1, "Checkpoint: Before refactor");
}

#[test]
fn automatic_commit_messages_follow_the_current_model() {
    let state = tempdir().expect("temp state");
    let snapshots = Arc::new(FakeSnapshotStore::default());
    let service = Arc::new(ScriptedCompletionService::with_turns([text_turn(
        "Rename helpers in main.rs\nextra detail",
        3,
    )]));
    let manager = manager_with(
        state.path(),
        Arc::clone(&snapshots),
        FakeSystemSnapshotter::default(),
    )
    .with_summarizer(
        Arc::clone(&service) as Arc<dyn CompletionService>,
        SamplingConfig::new("mock-model", 0.2, 100),
    );

    manager.set_summary_model("gpt-4o");
    manager
        .create(&conversation(), TokenUsage::default(), "auto", true)
        .expect("create checkpoint");

    assert_eq!(service.requests()[0].sampling.model, "gpt-4o");
    assert_eq!(snapshots.commits()[0].1, "Rename helpers in main.rs");
}

#[test]
fn deleting_removes_only_the_metadata_record() {
    let state = tempdir().expect("temp state");
    let snapshots = Arc::new(FakeSnapshotStore::default());
    let manager = manager_with(
        state.path(),
        Arc::clone(&snapshots),
        FakeSystemSnapshotter::default(),
    );
    let conversation = conversation();
    let checkpoint = manager
        .create(&conversation, TokenUsage::default(), "doomed", false)
        .expect("create checkpoint");

    manager
        .delete(&conversation.id, &checkpoint.id)
        .expect("delete checkpoint");

    assert!(manager
        .list(&conversation.id)
        .expect("list checkpoints")
        .is_empty());
    assert_eq!(snapshots.commits().len(), 1);
    assert_matches!(
        manager.delete(&conversation.id, &checkpoint.id),
        Err(CheckpointError::NotFound { .. })
    );
}

#[test]
fn unknown_checkpoints_are_not_found() {
    let state = tempdir().expect("temp state");
    let manager = manager_with(
        state.path(),
        Arc::new(FakeSnapshotStore::default()),
        FakeSystemSnapshotter::default(),
    );

    assert_matches!(
        manager.restore("conversation", "20240101_000000_000000000"),
        Err(CheckpointError::NotFound { .. })
    );
}

#[test]
fn snapshot_failures_leave_no_metadata() {
    let state = tempdir().expect("temp state");
    let manager = manager_with(
        state.path(),
        Arc::new(FakeSnapshotStore::failing()),
        FakeSystemSnapshotter::default(),
    );
    let conversation = conversation();

    assert_matches!(
        manager.create(&conversation, TokenUsage::default(), "x", false),
        Err(CheckpointError::Snapshot(_))
    );
    assert!(manager
        .list(&conversation.id)
        .expect("list checkpoints")
        .is_empty());
}

#[test]
fn container_checkpoints_capture_an_image_and_warn_on_restore() {
    let state = tempdir().expect("temp state");
    let manager = manager_with(
        state.path(),
        Arc::new(FakeSnapshotStore::default()),
        FakeSystemSnapshotter {
            in_container: true,
            fail: false,
        },
    );
    let conversation = conversation();

    let checkpoint = manager
        .create(&conversation, TokenUsage::default(), "system", false)
        .expect("create checkpoint");
    let image = checkpoint.system_image.clone().expect("image captured");
    assert_eq!(image, format!("coding-agent-ckpt-{}", checkpoint.id));

    let restored = manager
        .restore(&conversation.id, &checkpoint.id)
        .expect("restore checkpoint");
    assert_eq!(restored.warnings.len(), 1);
    assert!(
        restored.warnings[0].contains(&format!("docker run -it {image}")),
        "{}",
        restored.warnings[0]
    );
}

#[test]
fn image_failures_are_not_fatal_but_reported_on_restore() {
    let state = tempdir().expect("temp state");
    let manager = manager_with(
        state.path(),
        Arc::new(FakeSnapshotStore::default()),
        FakeSystemSnapshotter {
            in_container: true,
            fail: true,
        },
    );
    let conversation = conversation();

    let checkpoint = manager
        .create(&conversation, TokenUsage::default(), "system", false)
        .expect("file layer still checkpoints");
    assert_eq!(checkpoint.system_image, None);

    let restored = manager
        .restore(&conversation.id, &checkpoint.id)
        .expect("restore checkpoint");
    assert!(restored.warnings[0].starts_with("No system image was captured"));
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[test]
fn shadow_git_round_trip_restores_files() {
    if !git_available() {
        eprintln!("skipping: git is not installed");
        return;
    }

    let state = tempdir().expect("temp state");
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("a.txt"), "one").expect("write a.txt");

    let shadow = Arc::new(ShadowGit::new(state.path().join("shadow"), workspace.path()));
    let manager = CheckpointManager::new(
        state.path().join("metadata"),
        Arc::clone(&shadow) as Arc<dyn coding_agent::shadow_git::SnapshotStore>,
        Arc::new(NoSystemSnapshot),
    );
    let conversation = conversation();

    let first = manager
        .create(&conversation, TokenUsage::default(), "initial", false)
        .expect("first checkpoint");
    let unchanged = manager
        .create(&conversation, TokenUsage::default(), "no changes", false)
        .expect("second checkpoint");
    assert_eq!(first.snapshot_commit, unchanged.snapshot_commit);
    assert!(!workspace.path().join(".git").exists());

    fs::write(workspace.path().join("a.txt"), "two").expect("modify a.txt");
    fs::write(workspace.path().join("b.txt"), "new").expect("write b.txt");
    let second = manager
        .create(&conversation, TokenUsage::default(), "edited", false)
        .expect("third checkpoint");
    assert_ne!(first.snapshot_commit, second.snapshot_commit);

    manager
        .restore(&conversation.id, &first.id)
        .expect("restore first checkpoint");
    assert_eq!(
        fs::read_to_string(workspace.path().join("a.txt")).expect("read a.txt"),
        "one"
    );
    assert!(!workspace.path().join("b.txt").exists());

    manager
        .restore(&conversation.id, &second.id)
        .expect("restore second checkpoint");
    assert_eq!(
        fs::read_to_string(workspace.path().join("b.txt")).expect("read b.txt"),
        "new"
    );
}

#[test]
fn shadow_git_restores_files_the_workspace_ignores() {
    if !git_available() {
        eprintln!("skipping: git is not installed");
        return;
    }

    let state = tempdir().expect("temp state");
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join(".gitignore"), "*.log\n").expect("write .gitignore");
    fs::write(workspace.path().join("keep.log"), "original").expect("write keep.log");

    let manager = CheckpointManager::new(
        state.path().join("metadata"),
        Arc::new(ShadowGit::new(state.path().join("shadow"), workspace.path())),
        Arc::new(NoSystemSnapshot),
    );
    let conversation = conversation();
    let checkpoint = manager
        .create(&conversation, TokenUsage::default(), "with logs", false)
        .expect("create checkpoint");

    fs::write(workspace.path().join("keep.log"), "mutated").expect("modify keep.log");
    fs::write(workspace.path().join("new.log"), "later").expect("write new.log");
    fs::write(workspace.path().join("new.txt"), "later").expect("write new.txt");

    manager
        .restore(&conversation.id, &checkpoint.id)
        .expect("restore checkpoint");

    assert_eq!(
        fs::read_to_string(workspace.path().join("keep.log")).expect("read keep.log"),
        "original"
    );
    assert!(!workspace.path().join("new.log").exists());
    assert!(!workspace.path().join("new.txt").exists());
    assert_eq!(
        fs::read_to_string(workspace.path().join(".gitignore")).expect("read .gitignore"),
        "*.log\n"
    );
}
