//! Slash commands for interactive mode

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Start a fresh conversation id
    NewConversation,
    /// Print the current conversation id
    ShowId,
    /// Show a message to the user (not sent to the workflow)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command. Returns `None` for ordinary input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let name = input.strip_prefix('/')?;
    let command = name.split_whitespace().next().unwrap_or("").to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),
        "new" | "n" => CommandResult::NewConversation,
        "id" => CommandResult::ShowId,
        "quit" | "exit" | "q" => CommandResult::Exit,
        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /new, /n             Start a new conversation
  /id                  Show the current conversation id
  /quit, /exit, /q     Exit"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_input_is_not_a_command() {
        assert_eq!(execute_command("show my tickets"), None);
    }

    #[test]
    fn test_commands_and_aliases() {
        assert_eq!(execute_command("/new"), Some(CommandResult::NewConversation));
        assert_eq!(execute_command("  /Q "), Some(CommandResult::Exit));
        assert_eq!(execute_command("/id"), Some(CommandResult::ShowId));
        assert!(matches!(execute_command("/?"), Some(CommandResult::Message(m)) if m.contains("/new")));
        assert_eq!(
            execute_command("/frobnicate now"),
            Some(CommandResult::Unknown("frobnicate".into()))
        );
    }
}
