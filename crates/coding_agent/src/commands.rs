//! Interactive slash commands.

use crate::agents::DEFAULT_AGENT_NAME;
use crate::checkpoint::{render_checkpoint_list, DEFAULT_CHECKPOINT_NAME};
use crate::config::{ExecutionMode, OperationMode};
use crate::conversation::RunState;
use crate::dispatcher::Dispatcher;

pub const HELP_TEXT: &str = "Commands:
  /help                    Show this help
  /quit                    Save the session and exit
  /plan | /build           Switch operation mode
  /ask | /yolo             Switch execution mode
  /agent [name|none]       List agents, or switch/clear the active agent
  /checkpoint [name]       Create a checkpoint
  /checkpoints             List checkpoints
  /restore <id>            Restore a checkpoint
  /checkpoint-delete <id>  Delete a checkpoint
  /compress                Compress the conversation now
  /bg                      List background commands
  /save [name]             Save (and optionally name) the session
  /load <name>             Load a saved session
  /sessions                List saved sessions
  /model <id>              Change the model
  /contextlength <n>       Change the context length used for compression";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Quit,
    Plan,
    Build,
    Ask,
    Yolo,
    Agent(Option<String>),
    Checkpoint(Option<String>),
    Checkpoints,
    Restore(String),
    DeleteCheckpoint(String),
    Compress,
    Background,
    Save(Option<String>),
    Load(String),
    Sessions,
    Model(String),
    ContextLength(u64),
    /// Known command used with missing or malformed arguments.
    Usage(&'static str),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue(String),
    Quit,
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/quit" | "/exit" => SlashCommand::Quit,
        "/plan" => SlashCommand::Plan,
        "/build" => SlashCommand::Build,
        "/ask" => SlashCommand::Ask,
        "/yolo" => SlashCommand::Yolo,
        "/agent" => SlashCommand::Agent(argument),
        "/checkpoint" => SlashCommand::Checkpoint(argument),
        "/checkpoints" => SlashCommand::Checkpoints,
        "/restore" => match argument {
            Some(id) => SlashCommand::Restore(id),
            None => SlashCommand::Usage("/restore <id>"),
        },
        "/checkpoint-delete" => match argument {
            Some(id) => SlashCommand::DeleteCheckpoint(id),
            None => SlashCommand::Usage("/checkpoint-delete <id>"),
        },
        "/compress" => SlashCommand::Compress,
        "/bg" => SlashCommand::Background,
        "/save" => SlashCommand::Save(argument),
        "/load" => match argument {
            Some(name) => SlashCommand::Load(name),
            None => SlashCommand::Usage("/load <name>"),
        },
        "/sessions" => SlashCommand::Sessions,
        "/model" => match argument {
            Some(model) => SlashCommand::Model(model),
            None => SlashCommand::Usage("/model <id>"),
        },
        "/contextlength" => match argument.as_deref().map(str::parse::<u64>) {
            Some(Ok(length)) if length > 0 => SlashCommand::ContextLength(length),
            _ => SlashCommand::Usage("/contextlength <positive integer>"),
        },
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

pub fn execute_slash_command(
    dispatcher: &mut Dispatcher,
    state: &mut RunState,
    command: SlashCommand,
) -> CommandOutcome {
    let message = match command {
        SlashCommand::Quit => return CommandOutcome::Quit,
        SlashCommand::Help => HELP_TEXT.to_string(),
        SlashCommand::Plan => {
            state.operation_mode = OperationMode::Plan;
            "Switched to plan mode.".to_string()
        }
        SlashCommand::Build => {
            state.operation_mode = OperationMode::Build;
            "Switched to build mode.".to_string()
        }
        SlashCommand::Ask => {
            state.execution_mode = ExecutionMode::Ask;
            "Commands now require confirmation.".to_string()
        }
        SlashCommand::Yolo => {
            state.execution_mode = ExecutionMode::Yolo;
            "Commands now run without confirmation.".to_string()
        }
        SlashCommand::Agent(None) => list_agents(dispatcher, state),
        SlashCommand::Agent(Some(name)) if name == "none" => {
            match dispatcher.set_agent(state, None) {
                Ok(()) => "Agent cleared.".to_string(),
                Err(error) => format!("Error: {error}"),
            }
        }
        SlashCommand::Agent(Some(name)) => match dispatcher.set_agent(state, Some(&name)) {
            Ok(()) => format!("Switched to agent '{name}'."),
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Checkpoint(name) => {
            let name = name.as_deref().unwrap_or(DEFAULT_CHECKPOINT_NAME);
            match dispatcher.create_checkpoint(state, name, false) {
                Ok(checkpoint) => format!("Checkpoint created with ID: {}", checkpoint.id),
                Err(error) => format!("Error: {error}"),
            }
        }
        SlashCommand::Checkpoints => {
            match dispatcher.checkpoints().list(&state.conversation.id) {
                Ok(checkpoints) => render_checkpoint_list(&checkpoints),
                Err(error) => format!("Error: {error}"),
            }
        }
        SlashCommand::Restore(id) => match dispatcher.restore_checkpoint(state, &id) {
            Ok(restored) => {
                let mut message = format!("Restored checkpoint {}.", restored.checkpoint_id);
                for warning in restored.warnings {
                    message.push_str(&format!("\nWarning: {warning}"));
                }
                message
            }
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::DeleteCheckpoint(id) => {
            match dispatcher.checkpoints().delete(&state.conversation.id, &id) {
                Ok(()) => format!("Deleted checkpoint {id}."),
                Err(error) => format!("Error: {error}"),
            }
        }
        SlashCommand::Compress => match dispatcher.compress_now(state) {
            Ok(()) => "Conversation compressed.".to_string(),
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Background => dispatcher.background().describe(),
        SlashCommand::Save(Some(name)) => match dispatcher.rename_session(state, &name) {
            Ok(()) => format!("Session saved as '{name}'."),
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Save(None) => match dispatcher.save_session(state) {
            Ok(record) => format!("Session saved as '{}'.", record.key()),
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Load(name) => match dispatcher.load_session(&name) {
            Ok(loaded) => {
                *state = loaded;
                format!(
                    "Loaded session '{name}' ({} messages).",
                    state.conversation.messages.len()
                )
            }
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Sessions => match dispatcher.sessions().list() {
            Ok(sessions) if sessions.is_empty() => "No saved sessions.".to_string(),
            Ok(sessions) => {
                let mut listing = String::from("Sessions:");
                for session in sessions {
                    listing.push_str(&format!(
                        "\n- {} ({} messages, updated {})",
                        session.key, session.message_count, session.updated_at
                    ));
                }
                listing
            }
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Model(model) => match dispatcher.set_model(&model) {
            Ok(()) => format!("Model set to {model}."),
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::ContextLength(length) => match dispatcher.set_context_length(length) {
            Ok(()) => format!("Context length set to {length}."),
            Err(error) => format!("Error: {error}"),
        },
        SlashCommand::Usage(usage) => format!("Usage: {usage}"),
        SlashCommand::Unknown(command) => {
            format!("Unknown command: {command}. Type /help for the list of commands.")
        }
    };

    CommandOutcome::Continue(message)
}

fn list_agents(dispatcher: &Dispatcher, state: &RunState) -> String {
    let active = state
        .conversation
        .agent_def_name
        .as_deref()
        .unwrap_or(DEFAULT_AGENT_NAME);
    match dispatcher.agents().list() {
        Ok(definitions) => {
            let mut listing = String::from("Agents:");
            for definition in definitions {
                let marker = if definition.name == active { "*" } else { "-" };
                listing.push_str(&format!("\n{marker} {}", definition.name));
                if !definition.description.is_empty() {
                    listing.push_str(&format!(": {}", definition.description));
                }
            }
            listing
        }
        Err(error) => format!("Error: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_slash_command, SlashCommand};

    #[test]
    fn parses_commands_with_and_without_arguments() {
        assert_eq!(parse_slash_command("hello"), None);
        assert_eq!(parse_slash_command(" /help "), Some(SlashCommand::Help));
        assert_eq!(
            parse_slash_command("/checkpoint before refactor"),
            Some(SlashCommand::Checkpoint(Some("before refactor".to_string())))
        );
        assert_eq!(
            parse_slash_command("/checkpoint"),
            Some(SlashCommand::Checkpoint(None))
        );
        assert_eq!(
            parse_slash_command("/checkpoint-delete 20240101_000000_000000000"),
            Some(SlashCommand::DeleteCheckpoint(
                "20240101_000000_000000000".to_string()
            ))
        );
        assert_eq!(
            parse_slash_command("/contextlength 4096"),
            Some(SlashCommand::ContextLength(4096))
        );
        assert_eq!(
            parse_slash_command("/frobnicate now"),
            Some(SlashCommand::Unknown("/frobnicate".to_string()))
        );
    }

    #[test]
    fn missing_required_arguments_yield_usage() {
        assert_eq!(
            parse_slash_command("/restore"),
            Some(SlashCommand::Usage("/restore <id>"))
        );
        assert_eq!(
            parse_slash_command("/contextlength lots"),
            Some(SlashCommand::Usage("/contextlength <positive integer>"))
        );
        assert_eq!(
            parse_slash_command("/contextlength 0"),
            Some(SlashCommand::Usage("/contextlength <positive integer>"))
        );
    }
}
