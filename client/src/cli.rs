//! CLI interface for the story chat client
//!
//! Provides command parsing, message formatting and the interactive loop
//! that interleaves async stdin with events coming out of the chat core.

use crate::error::{ClientError, Result};
use crate::events::{ChatEvent, EventReceiver};
use crate::models::{ChatContext, Message, MessageStatus};
use crate::services::{ChatHandle, ClientManager, HistoryOutcome, SyncOutcome};
use chrono::{Local, TimeZone};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

const SEARCH_LIMIT: usize = 20;

/// Command types for CLI
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Message(String),
    More,
    Sync,
    /// 1-based position in the displayed list
    Retry(usize),
    List,
    Search(String),
    Prune,
    Quit,
}

impl Command {
    /// Parse a command string
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let input = input.trim();

        match input {
            "/quit" | "/exit" => return Ok(Command::Quit),
            "/more" => return Ok(Command::More),
            "/sync" => return Ok(Command::Sync),
            "/list" => return Ok(Command::List),
            "/prune" => return Ok(Command::Prune),
            "/retry" => return Err("Usage: /retry <n>".to_string()),
            "/search" => return Err("Usage: /search <text>".to_string()),
            _ => {}
        }

        if let Some(arg) = input.strip_prefix("/retry ") {
            return arg
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Command::Retry)
                .ok_or_else(|| "Usage: /retry <n>".to_string());
        }

        if let Some(query) = input.strip_prefix("/search ") {
            let query = query.trim();
            if query.is_empty() {
                return Err("Usage: /search <text>".to_string());
            }
            return Ok(Command::Search(query.to_string()));
        }

        if input.starts_with('/') {
            return Err(format!("Unknown command: {}", input));
        }

        Ok(Command::Message(input.to_string()))
    }
}

/// Parse a command from user input
pub fn parse_command(input: &str) -> Result<Command> {
    Command::parse(input).map_err(ClientError::InvalidCommand)
}

fn status_marker(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sent => "",
        MessageStatus::Sending => " (sending)",
        MessageStatus::Failed => " (failed, /retry to resend)",
    }
}

fn format_time(timestamp: i64) -> String {
    match Local.timestamp_millis_opt(timestamp).single() {
        Some(time) => time.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

/// Format a message for display
pub fn format_message(index: usize, message: &Message) -> String {
    format!(
        "[{}] {} <{}> {}{}",
        index,
        format_time(message.timestamp),
        message.sender_id,
        message.content,
        status_marker(message.status)
    )
}

/// Format a control message for display
pub fn format_control(chat: &str, action: &str) -> String {
    format!("#{} {}", chat, action)
}

fn render(messages: &[Message]) {
    for (i, message) in messages.iter().enumerate() {
        println!("{}", format_message(i + 1, message));
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

/// Run the interactive loop until `/quit` or end of input
pub async fn run_client_loop(
    manager: &ClientManager,
    context: ChatContext,
    mut events: EventReceiver,
) -> Result<()> {
    let chat = context.chat_id.to_string();
    let handle = manager.switch_chat(context);

    let bg = handle.clone();
    tokio::spawn(async move {
        match bg.load_initial().await {
            SyncOutcome::Offline { cached } => {
                log::warn!("Server unreachable, showing {} cached messages", cached)
            }
            outcome => log::debug!("Initial load: {:?}", outcome),
        }
    });

    // next_line is cancel safe, so losing the select race drops no input
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    prompt()?;
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(manager, &handle, command).await {
                            println!("{}", format_control(&chat, &format!("error: {}", e)));
                        }
                    }
                    Err(e) => println!("{}", e),
                }
                prompt()?;
            }
            Some(event) = events.recv() => {
                match event {
                    ChatEvent::MessagesChanged { messages, .. } => render(&messages),
                    ChatEvent::StatusChanged { client_tag, status, .. } => {
                        log::debug!("Message {} is now {}", client_tag, status);
                        if status == MessageStatus::Failed {
                            println!("{}", format_control(&chat, "a message failed to send"));
                        }
                    }
                    ChatEvent::HistoryExhausted { .. } => {
                        println!("{}", format_control(&chat, "no more history"));
                    }
                }
                prompt()?;
            }
        }
    }

    manager.close_chat(handle.chat_id());
    Ok(())
}

async fn execute(manager: &ClientManager, handle: &ChatHandle, command: Command) -> Result<()> {
    let chat = handle.chat_id().to_string();
    match command {
        Command::Message(text) => {
            // Delivery outcome arrives as events
            handle.send_in_background(&text).await?;
        }
        Command::More => match handle.load_more_history().await {
            HistoryOutcome::Loaded { added, .. } => {
                println!("{}", format_control(&chat, &format!("loaded {} older messages", added)))
            }
            HistoryOutcome::Exhausted { .. } | HistoryOutcome::Cancelled => {}
        },
        Command::Sync => {
            if let SyncOutcome::Offline { .. } = handle.sync_newer().await {
                println!("{}", format_control(&chat, "server unreachable"));
            }
        }
        Command::Retry(position) => {
            let messages = handle.messages().await;
            let message = messages
                .get(position - 1)
                .ok_or_else(|| ClientError::NotFound(format!("No message at position {}", position)))?;
            let tag = message.client_tag.clone();
            let retrying = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = retrying.retry(&tag).await {
                    log::warn!("Retry of {} failed: {}", tag, e);
                }
            });
        }
        Command::List => render(&handle.messages().await),
        Command::Search(query) => {
            let found = manager.search(handle.chat_id(), &query, SEARCH_LIMIT)?;
            println!("{}", format_control(&chat, &format!("{} matches for '{}'", found.len(), query)));
            render(&found);
        }
        Command::Prune => {
            let removed = manager.prune().await?;
            println!("{}", format_control(&chat, &format!("pruned {} cached messages", removed)));
        }
        Command::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatId, ClientTag};

    #[test]
    fn test_parse_regular_message() {
        let result = parse_command("  Hello world ");
        assert!(matches!(result, Ok(Command::Message(msg)) if msg == "Hello world"));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("/more"), Ok(Command::More));
        assert_eq!(Command::parse("/sync"), Ok(Command::Sync));
        assert_eq!(Command::parse("/list"), Ok(Command::List));
        assert_eq!(Command::parse("/prune"), Ok(Command::Prune));
        assert_eq!(Command::parse("/quit"), Ok(Command::Quit));
        assert_eq!(Command::parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_retry() {
        assert_eq!(Command::parse("/retry 3"), Ok(Command::Retry(3)));
        assert!(Command::parse("/retry").is_err());
        assert!(Command::parse("/retry 0").is_err());
        assert!(Command::parse("/retry x").is_err());
    }

    #[test]
    fn test_parse_search() {
        assert_eq!(
            Command::parse("/search the dragon"),
            Ok(Command::Search("the dragon".to_string()))
        );
        assert!(Command::parse("/search   ").is_err());
    }

    #[test]
    fn test_invalid_command() {
        let result = parse_command("/unknown");
        assert!(matches!(result, Err(ClientError::InvalidCommand(_))));
    }

    #[test]
    fn test_format_message_marks_status() {
        let mut message = Message::from_server(
            1,
            ClientTag::from_string("t"),
            ChatId::from("c1"),
            "narrator".to_string(),
            "The door creaks open.".to_string(),
            0,
        );
        let formatted = format_message(2, &message);
        assert!(formatted.starts_with("[2] "));
        assert!(formatted.ends_with("<narrator> The door creaks open."));

        message.status = MessageStatus::Failed;
        assert!(format_message(2, &message).contains("(failed"));
    }

    #[test]
    fn test_format_control_message() {
        let formatted = format_control("tale", "no more history");
        assert_eq!(formatted, "#tale no more history");
    }
}
