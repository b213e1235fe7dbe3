use std::io::{self, Write};
use std::sync::Arc;

use coach_chat::{logging, ChatSession, EnvConfig, LogNotifier, TurnError};
use coach_store::{ConversationId, JsonlTranscriptStore};
use completion_api::CompletionClient;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = EnvConfig::from_env();
    logging::init(config.log_filter.as_deref());

    let conversation_id = std::env::args()
        .nth(1)
        .map(ConversationId::from)
        .unwrap_or_else(ConversationId::generate);

    let store = JsonlTranscriptStore::new(&config.data_dir).map_err(io::Error::other)?;
    let client = CompletionClient::new(config.completion_config()).map_err(io::Error::other)?;
    let session = ChatSession::new(
        Arc::new(store),
        Arc::new(client),
        Arc::new(LogNotifier),
        config.session_options(),
    );

    let history = session.load(&conversation_id).map_err(io::Error::other)?;
    let mut stdout = io::stdout();
    writeln!(stdout, "conversation {conversation_id}")?;
    for message in history.messages() {
        writeln!(stdout, "[{}] {}", message.role.as_str(), message.content)?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        run_turn(&session, &conversation_id, &line, &mut stdout).await?;
    }

    Ok(())
}

/// Submits one line and echoes the assistant reply as it streams in.
async fn run_turn(
    session: &ChatSession,
    conversation_id: &ConversationId,
    line: &str,
    stdout: &mut io::Stdout,
) -> io::Result<()> {
    let mut updates = session.subscribe(conversation_id);
    updates.borrow_and_update();
    let mut printed = 0usize;

    let submit = session.submit(conversation_id, line);
    tokio::pin!(submit);

    let mut watching = true;
    let result = loop {
        tokio::select! {
            result = &mut submit => break result,
            changed = updates.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let pending = updates
                    .borrow_and_update()
                    .pending()
                    .map(|message| message.content.clone());
                if let Some(content) = pending {
                    printed = print_suffix(stdout, &content, printed)?;
                }
            }
        }
    };

    match result {
        Ok(outcome) => {
            print_suffix(stdout, &outcome.assistant_message.content, printed)?;
            writeln!(stdout)?;
        }
        Err(TurnError::Cancelled) => writeln!(stdout)?,
        Err(error) => {
            if printed > 0 {
                writeln!(stdout)?;
            }
            eprintln!("error: {error}");
        }
    }
    stdout.flush()
}

fn print_suffix(stdout: &mut io::Stdout, content: &str, printed: usize) -> io::Result<usize> {
    if let Some(suffix) = content.get(printed..) {
        stdout.write_all(suffix.as_bytes())?;
        stdout.flush()?;
    }
    Ok(content.len())
}
