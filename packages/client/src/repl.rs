//! Interactive terminal front end: slash commands over the chat session
//! and the presence tracker.

use std::io::Write;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::{
    config::ClientConfig,
    formatter::MessageFormatter,
    presence::PresenceTracker,
    session::{ChatSession, SessionEvent, SessionStatus},
};

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// Plain text for the active room.
    Say(String),
    Rooms,
    Join(String),
    DirectMessage { user_id: i64, user_name: String },
    History,
    Who,
    Status,
    Retry,
    Quit,
    Help,
    Invalid(String),
}

const HELP_TEXT: &str = "\
Commands:
  /rooms                 list known rooms
  /join <room-id>        switch the active room and load its history
  /dm <user-id> <name>   open a direct room with a user
  /history               reload the active room's history
  /who                   list online users
  /status                show both connection states
  /retry                 retry after the reconnect budget is spent
  /quit                  exit
Anything not starting with / is sent to the active room.";

/// Parse one line of input into a command.
pub fn parse_input(line: &str) -> InputCommand {
    let line = line.trim();
    if !line.starts_with('/') {
        return InputCommand::Say(line.to_string());
    }

    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    match command {
        "/rooms" => InputCommand::Rooms,
        "/join" => match parts.next() {
            Some(room_id) => InputCommand::Join(room_id.to_string()),
            None => InputCommand::Invalid("usage: /join <room-id>".to_string()),
        },
        "/dm" => {
            let user_id = parts.next().and_then(|raw| raw.parse::<i64>().ok());
            let user_name = parts.next();
            match (user_id, user_name) {
                (Some(user_id), Some(user_name)) => InputCommand::DirectMessage {
                    user_id,
                    user_name: user_name.to_string(),
                },
                _ => InputCommand::Invalid("usage: /dm <user-id> <name>".to_string()),
            }
        }
        "/history" => InputCommand::History,
        "/who" => InputCommand::Who,
        "/status" => InputCommand::Status,
        "/retry" => InputCommand::Retry,
        "/quit" | "/exit" => InputCommand::Quit,
        "/help" => InputCommand::Help,
        other => InputCommand::Invalid(format!("unknown command: {} (try /help)", other)),
    }
}

/// Run the interactive client until the user quits or input ends.
pub async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = ChatSession::connect(config.clone());
    let presence = PresenceTracker::connect(config);
    let mut events = session.events();

    println!("\nConnecting to {} ...", session.config().url);
    match &session.config().user_name {
        Some(name) => println!("You are '{}'. Type /help for commands, Ctrl+C to exit.\n", name),
        None => println!("Type /help for commands, Ctrl+C to exit.\n"),
    }

    // Spawn a blocking thread for rustyline (synchronous readline)
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            // Channel closed, exit thread
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            line = input_rx.recv() => match line {
                Some(line) => {
                    if handle_input(&session, &presence, &line).await {
                        break;
                    }
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => render_event(&session, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Display fell behind; {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.disconnect();
    presence.disconnect();
    Ok(())
}

/// Execute one command. Returns `true` when the user asked to quit.
async fn handle_input(session: &ChatSession, presence: &PresenceTracker, line: &str) -> bool {
    match parse_input(line) {
        InputCommand::Say(text) => match session.active_room().await {
            Some(room_id) => {
                if !session.send_chat_message(&room_id, &text, None) {
                    println!("(not sent)");
                }
            }
            None => println!("No active room. /join <room-id> or /dm <user-id> <name> first."),
        },
        InputCommand::Rooms => {
            let rooms = session.rooms().await;
            if rooms.is_empty() {
                println!("No rooms yet.");
            } else {
                let active = session.active_room().await;
                for room in rooms {
                    let unread = session.unread_count(&room.id).await;
                    println!(
                        "{}",
                        MessageFormatter::format_room_line(&room, active.as_deref(), unread)
                    );
                }
            }
        }
        InputCommand::Join(room_id) => {
            session.set_active_room(Some(room_id.clone())).await;
            let limit = session.config().history_limit;
            if !session.load_chat_history(&room_id, limit).await {
                println!("Joined {}; history request not sent.", room_id);
            }
        }
        InputCommand::DirectMessage { user_id, user_name } => {
            match session.create_direct_message(user_id, &user_name).await {
                Ok(room_id) => println!("Direct room {} ready.", room_id),
                Err(e) => println!("Could not open direct room: {}", e),
            }
        }
        InputCommand::History => match session.active_room().await {
            Some(room_id) => {
                let limit = session.config().history_limit;
                if !session.load_chat_history(&room_id, limit).await {
                    // Offline: show what is cached.
                    let messages = session.messages(&room_id).await;
                    print!(
                        "{}",
                        MessageFormatter::format_history(
                            &room_id,
                            &messages,
                            session.config().user_id
                        )
                    );
                }
            }
            None => println!("No active room."),
        },
        InputCommand::Who => {
            println!("{} user(s) online", presence.online_count().await);
            for user in presence.online_users().await {
                println!("{}", MessageFormatter::format_presence_line(&user));
            }
        }
        InputCommand::Status => {
            println!(
                "{}",
                MessageFormatter::format_connection_state("chat", &session.connection_state())
            );
            println!(
                "{}",
                MessageFormatter::format_connection_state("presence", &presence.connection_state())
            );
            if let Some(detail) = session.last_error().await {
                print!("{}", MessageFormatter::format_error_banner(&detail));
            }
        }
        InputCommand::Retry => {
            session.reconnect();
            presence.reconnect();
            println!("Reconnect requested.");
        }
        InputCommand::Quit => return true,
        InputCommand::Help => println!("{}", HELP_TEXT),
        InputCommand::Invalid(reason) => println!("{}", reason),
    }
    false
}

async fn render_event(session: &ChatSession, event: SessionEvent) {
    match event {
        SessionEvent::MessageReceived { room_id, message } => {
            let active = session.active_room().await;
            if active.as_deref() == Some(room_id.as_str()) {
                print!(
                    "{}",
                    MessageFormatter::format_chat_message(&message, session.config().user_id)
                );
            } else {
                println!("\n(new message in {} from {})", room_id, message.sender_name);
            }
            redisplay_prompt();
        }
        SessionEvent::HistoryLoaded { room_id, .. } => {
            let messages = session.messages(&room_id).await;
            print!(
                "{}",
                MessageFormatter::format_history(&room_id, &messages, session.config().user_id)
            );
            redisplay_prompt();
        }
        SessionEvent::RoomCreated { room_id } => {
            println!("\n(room {} is ready)", room_id);
            redisplay_prompt();
        }
        SessionEvent::TypingChanged { room_id } => {
            let active = session.active_room().await;
            if active.as_deref() == Some(room_id.as_str()) {
                let names = session.typing_users(&room_id).await;
                print!("{}", MessageFormatter::format_typing(&room_id, &names));
                redisplay_prompt();
            }
        }
        SessionEvent::StatusChanged(status) => {
            match status {
                SessionStatus::Connected => println!("\n(chat connection restored)"),
                SessionStatus::Disconnected => println!("\n(chat connection lost, retrying...)"),
                SessionStatus::Error => println!("\n(chat connection failed, use /retry)"),
            }
            redisplay_prompt();
        }
        SessionEvent::ServerError { detail } => {
            print!("{}", MessageFormatter::format_error_banner(&detail));
            redisplay_prompt();
        }
    }
}

/// Redisplay the prompt after asynchronous output
fn redisplay_prompt() {
    print!("> ");
    std::io::stdout().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_treats_plain_text_as_message() {
        // テスト項目: スラッシュで始まらない入力がメッセージ本文になる
        // given (前提条件):
        let line = "  hello there  ";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert_eq!(result, InputCommand::Say("hello there".to_string()));
    }

    #[test]
    fn test_parse_input_join_requires_a_room_id() {
        // テスト項目: /join は引数が無いと使い方の案内を返す
        // given (前提条件):
        let with_arg = "/join r1";
        let without_arg = "/join";

        // when (操作):
        let parsed_with = parse_input(with_arg);
        let parsed_without = parse_input(without_arg);

        // then (期待する結果):
        assert_eq!(parsed_with, InputCommand::Join("r1".to_string()));
        assert!(matches!(parsed_without, InputCommand::Invalid(usage) if usage.contains("/join")));
    }

    #[test]
    fn test_parse_input_dm_parses_user_id_and_name() {
        // テスト項目: /dm がユーザー ID と名前を解析する
        // given (前提条件):
        let valid = "/dm 42 Bob";
        let bad_id = "/dm forty-two Bob";

        // when (操作):
        let parsed_valid = parse_input(valid);
        let parsed_bad = parse_input(bad_id);

        // then (期待する結果):
        assert_eq!(
            parsed_valid,
            InputCommand::DirectMessage {
                user_id: 42,
                user_name: "Bob".to_string(),
            }
        );
        assert!(matches!(parsed_bad, InputCommand::Invalid(usage) if usage.contains("/dm")));
    }

    #[test]
    fn test_parse_input_quit_accepts_both_spellings() {
        // テスト項目: /quit と /exit の両方で終了コマンドになる
        // given (前提条件):

        // when (操作):
        let quit = parse_input("/quit");
        let exit = parse_input("/exit");

        // then (期待する結果):
        assert_eq!(quit, InputCommand::Quit);
        assert_eq!(exit, InputCommand::Quit);
    }

    #[test]
    fn test_parse_input_rejects_unknown_commands() {
        // テスト項目: 未知のコマンドが /help への案内付きで拒否される
        // given (前提条件):
        let line = "/frobnicate";

        // when (操作):
        let result = parse_input(line);

        // then (期待する結果):
        assert!(matches!(result, InputCommand::Invalid(reason) if reason.contains("/help")));
    }
}
