//! User confirmation for commands and plans.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use crate::lock_unpoisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDecision {
    Foreground,
    Background,
    Decline,
}

pub trait ConfirmationGate: Send + Sync {
    fn confirm_command(&self, command: &str) -> CommandDecision;

    fn approve_plan(&self, name: &str, description: &str) -> bool;
}

/// Prompts on stdout and reads answers from stdin, one question at a time.
#[derive(Debug, Default)]
pub struct TerminalGate {
    prompt_lock: Mutex<()>,
}

impl TerminalGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ask(&self, question: &str) -> Option<String> {
        let _guard = lock_unpoisoned(&self.prompt_lock);
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "{question}");
        let _ = stdout.flush();
        drop(stdout);

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(answer),
        }
    }
}

impl ConfirmationGate for TerminalGate {
    fn confirm_command(&self, command: &str) -> CommandDecision {
        let question = format!(
            "\nThe agent wants to run:\n  {command}\nExecute? [y=foreground/b=background/N] "
        );
        self.ask(&question)
            .map(|answer| parse_command_answer(&answer))
            .unwrap_or(CommandDecision::Decline)
    }

    fn approve_plan(&self, name: &str, description: &str) -> bool {
        let question = format!("\nProposed plan: {name}\n\n{description}\n\nApprove this plan? [y/N] ");
        self.ask(&question)
            .is_some_and(|answer| parse_yes(&answer))
    }
}

/// Non-interactive gate: commands run in the foreground, plans are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ConfirmationGate for AutoApprove {
    fn confirm_command(&self, _command: &str) -> CommandDecision {
        CommandDecision::Foreground
    }

    fn approve_plan(&self, _name: &str, _description: &str) -> bool {
        false
    }
}

#[must_use]
pub fn parse_command_answer(answer: &str) -> CommandDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => CommandDecision::Foreground,
        "b" | "bg" | "background" => CommandDecision::Background,
        _ => CommandDecision::Decline,
    }
}

fn parse_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::{parse_command_answer, parse_yes, CommandDecision};

    #[test]
    fn answers_default_to_decline() {
        assert_eq!(parse_command_answer("y\n"), CommandDecision::Foreground);
        assert_eq!(parse_command_answer(" B "), CommandDecision::Background);
        assert_eq!(parse_command_answer(""), CommandDecision::Decline);
        assert_eq!(parse_command_answer("sure"), CommandDecision::Decline);
        assert!(parse_yes("YES"));
        assert!(!parse_yes("n"));
    }
}
