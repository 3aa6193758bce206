//! `chatsync`: line-oriented chat client.
//!
//! Connects to a backend, keeps the chat list and the open chat in sync,
//! and reads commands from stdin. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/chatsync/config.toml`).
//!
//! ```bash
//! cargo run --bin chatsync -- --server-url http://127.0.0.1:8080 \
//!     --user-id alice --token alice-token
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;

use chatsync::chat::store::StoreEvent;
use chatsync::chat::{ChatClient, DefaultChannel};
use chatsync::config::{CliArgs, ClientConfig};
use chatsync_proto::message::{ChatId, Message, MessageId, MessageStatus};

type Client = Arc<ChatClient<DefaultChannel>>;

const HELP: &str = "\
commands:
  /chats                 list chats
  /open <chat_id>        open a chat and load its newest page
  /older                 load an older page of the open chat
  /read                  mark the open chat read
  /unsend <id>...        unsend messages in the open chat
  /delete <id>...        delete messages for me in the open chat
  /select                toggle selection mode
  /pick <id>             toggle a message in the selection
  /unsend-selected       unsend the selection
  /delete-selected       delete the selection for me
  /sync                  run catch-up now
  /state                 show the connection state
  /quit                  exit
anything else is sent as a message to the open chat";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // CLI args > env > config file > defaults.
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("chatsync starting");

    let (client, mut background) = match ChatClient::from_config(&config) {
        Ok((client, background)) => (Arc::new(client), background),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(async move {
        while let Some(error) = background.recv().await {
            println!("! {error}");
        }
    });

    client.connect();
    if !client
        .transport()
        .wait_connected(config.transport.connect_timeout)
        .await
    {
        println!("! socket not connected yet; requests will use REST");
    }
    match client.refresh_chats().await {
        Ok(count) => println!("{count} chat(s). /help for commands."),
        Err(e) => println!("! could not load chats: {e}"),
    }

    spawn_store_printer(Arc::clone(&client));
    run_repl(&client).await;

    client.disconnect().await;
    tracing::info!("chatsync exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Logs go to a file so they do not interleave with the prompt. Returns a
/// [`WorkerGuard`] that must be held until shutdown to flush buffered entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("chatsync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn status_marker(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "…",
        MessageStatus::Sent => "✓",
        MessageStatus::Delivered => "✓✓",
        MessageStatus::Read => "✓✓ read",
    }
}

fn format_message(msg: &Message, status: MessageStatus) -> String {
    if msg.is_tombstone() {
        return format!("[{}] {}: (message unsent)", msg.id, msg.sender_id);
    }
    format!(
        "[{}] {}: {} {}",
        msg.id,
        msg.sender_id,
        msg.content,
        status_marker(status)
    )
}

/// Print the open chat's newest message and send failures as they happen.
fn spawn_store_printer(client: Client) {
    let mut events = client.subscribe_store();
    tokio::spawn(async move {
        let mut last_shown: Option<MessageId> = None;
        loop {
            match events.recv().await {
                Ok(StoreEvent::MessagesChanged { chat_id }) => {
                    let newest = client.with_store(|s| {
                        if !s.is_active(&chat_id) {
                            return None;
                        }
                        s.messages(&chat_id)
                            .last()
                            .map(|m| (m.id.clone(), format_message(m, s.status_of(m))))
                    });
                    if let Some((id, line)) = newest
                        && last_shown.as_ref() != Some(&id)
                    {
                        println!("{line}");
                        last_shown = Some(id);
                    }
                }
                Ok(StoreEvent::SendFailed { reason, .. }) => {
                    println!("! send failed ({reason}); text restored to draft");
                }
                Ok(StoreEvent::ChatListChanged | StoreEvent::SelectionChanged) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "store printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn open_chat_id(client: &Client) -> Option<ChatId> {
    client.with_store(|s| s.active_chat().cloned())
}

fn ids(args: &str) -> Vec<MessageId> {
    args.split_whitespace().map(MessageId::new).collect()
}

fn print_chats(client: &Client) {
    client.with_store(|s| {
        for chat in s.chats() {
            let preview = chat.last_message_content.as_deref().unwrap_or("");
            println!(
                "{} with {} ({} unread) {}",
                chat.chat_id, chat.other_user_id, chat.unread_count, preview
            );
        }
    });
}

fn print_open_chat(client: &Client, chat_id: &ChatId) {
    client.with_store(|s| {
        for msg in s.messages(chat_id) {
            println!("{}", format_message(&msg, s.status_of(&msg)));
        }
    });
}

/// Read commands from stdin until `/quit` or end of input.
async fn run_repl(client: &Client) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(err = %e, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        let args = args.trim();
        match command {
            "/quit" => break,
            "/help" => println!("{HELP}"),
            "/state" => println!("{}", client.state()),
            "/chats" => match client.refresh_chats().await {
                Ok(_) => print_chats(client),
                Err(e) => println!("! {e}"),
            },
            "/open" => {
                let chat_id = ChatId::new(args);
                match client.open_chat(&chat_id).await {
                    Ok(_) => print_open_chat(client, &chat_id),
                    Err(e) => println!("! {e}"),
                }
            }
            "/select" => {
                let on = !client.with_store(|s| s.selection_mode());
                client.set_selection_mode(on);
                println!("selection mode {}", if on { "on" } else { "off" });
            }
            "/pick" => {
                let selected = client.toggle_selected(&MessageId::new(args));
                println!("{args} {}", if selected { "selected" } else { "not selected" });
            }
            "/unsend-selected" => report_count(client.unsend_selected().await, "unsent"),
            "/delete-selected" => report_count(client.delete_selected().await, "deleted"),
            "/sync" => match client.sync_now().await {
                Ok(report) => println!("applied {} action(s)", report.applied),
                Err(e) => println!("! {e}"),
            },
            _ => run_chat_command(client, command, args, line).await,
        }
    }
}

/// Commands that need an open chat, plus plain text.
async fn run_chat_command(client: &Client, command: &str, args: &str, line: &str) {
    let Some(chat_id) = open_chat_id(client) else {
        println!("! no chat open; use /open <chat_id>");
        return;
    };
    match command {
        "/older" => report_count(client.load_older(&chat_id).await, "loaded"),
        "/read" => {
            if let Err(e) = client.mark_read(&chat_id).await {
                println!("! {e}");
            }
        }
        "/unsend" => report_count(client.unsend(&chat_id, &ids(args)).await, "unsent"),
        "/delete" => report_count(client.delete_for_me(&chat_id, &ids(args)).await, "deleted"),
        _ if command.starts_with('/') => println!("! unknown command {command}; /help"),
        _ => {
            if let Err(e) = client.send_text(&chat_id, line).await {
                println!("! {e}");
            }
        }
    }
}

fn report_count<E: std::fmt::Display>(result: Result<usize, E>, verb: &str) {
    match result {
        Ok(n) => println!("{verb} {n}"),
        Err(e) => println!("! {e}"),
    }
}
