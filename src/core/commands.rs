// src/core/commands.rs

//! The chat command grammar carried inside TEXT frames.

/// A parsed chat command.
///
/// Dispatch precedence: exact `/list`, then the `/w ` prefix, then exact
/// `bye`, then free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `/list` — reply with the usernames currently connected.
    ListUsers,
    /// `/w <username> <message>` — a private message.
    Whisper { target: String, text: String },
    /// A `/w` line with too few tokens; the sender gets a usage hint.
    WhisperUsage,
    /// `bye` — end the session.
    Quit,
    /// Anything else is broadcast as chat text.
    Say(String),
}

impl ChatCommand {
    /// Parses one TEXT payload into a command. The payload is trimmed first,
    /// and whispers are split into at most three tokens so the message part
    /// may contain spaces.
    pub fn parse(raw: &str) -> Self {
        let message = raw.trim();
        if message == "/list" {
            return ChatCommand::ListUsers;
        }
        if let Some(rest) = message.strip_prefix("/w ") {
            let mut parts = rest.splitn(2, ' ');
            let target = parts.next().unwrap_or_default();
            let text = parts.next().unwrap_or_default();
            if target.is_empty() || text.is_empty() {
                return ChatCommand::WhisperUsage;
            }
            return ChatCommand::Whisper {
                target: target.to_string(),
                text: text.to_string(),
            };
        }
        if message == "bye" {
            return ChatCommand::Quit;
        }
        ChatCommand::Say(message.to_string())
    }
}
