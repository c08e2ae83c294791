mod command;
mod config;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use staffchat_core::{ChatSession, StoreChange, TracingNotifier};
use staffchat_gateway::{WsConfig, WsTransport};
use staffchat_http::HttpChatApi;

use crate::command::Command;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "staffchat=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let api = HttpChatApi::new(config.api_url.clone(), config.token.clone())?;
    let (transport, events) = WsTransport::connect(WsConfig {
        url: config.gateway_url.clone(),
        token: config.token.clone(),
    });

    let session = Arc::new(ChatSession::new(
        config.chat_config(),
        Arc::new(api),
        Arc::new(transport),
        Arc::new(TracingNotifier),
    ));

    let report = session.load_conversations().await?;
    info!(
        subscribed = report.subscribed.len(),
        failed = report.failed.len(),
        "Conversations loaded"
    );

    let mut changes = session.store().subscribe();
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            if let StoreChange::UnreadChanged {
                conversation_id,
                unread_count,
            } = change
            {
                info!(conversation_id, unread_count, "Unread count changed");
            }
        }
    });

    let runner = session.clone();
    let mut events_task = tokio::spawn(async move { runner.run(events).await });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(cmd)) => execute(&session, cmd).await,
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            _ = &mut events_task => {
                warn!("Realtime event loop stopped");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.teardown();
    Ok(())
}

async fn execute(session: &ChatSession, cmd: Command) {
    let active = session.store().read(|s| s.active_conversation());
    let result = match (cmd, active) {
        (Command::Open(conversation_id), _) => session.open_conversation(conversation_id).await,
        (Command::List, _) => {
            session.store().read(|s| {
                for c in s.conversations().filter(|c| !c.left) {
                    info!(
                        conversation_id = c.id,
                        unread = c.unread_count,
                        "{}",
                        c.title.as_deref().unwrap_or("(direct)")
                    );
                }
            });
            Ok(())
        }
        (_, None) => {
            warn!("No open conversation; use /open <id>");
            Ok(())
        }
        (Command::Close, Some(conversation_id)) => {
            session.close_conversation(conversation_id);
            Ok(())
        }
        (Command::Older, Some(conversation_id)) => session
            .load_older_messages(conversation_id)
            .await
            .map(|added| info!(conversation_id, added, "Loaded older messages")),
        (Command::Read, Some(conversation_id)) => {
            session.receipts().mark_conversation_read(conversation_id).await
        }
        (Command::React { message_id, emoji }, Some(conversation_id)) => session
            .reactions()
            .toggle_reaction(conversation_id, message_id, &emoji)
            .await
            .map(|outcome| info!(%message_id, ?outcome, "Reaction toggled")),
        (Command::Retry(message_id), Some(conversation_id)) => session
            .pipeline()
            .retry_send(conversation_id, message_id)
            .await
            .map(|id| info!(message_id = %id, "Message delivered")),
        (Command::Delete { message_id, hard }, Some(conversation_id)) => {
            session
                .pipeline()
                .delete_message(conversation_id, message_id, hard)
                .await
        }
        (Command::Send(text), Some(conversation_id)) => session
            .pipeline()
            .send_text(conversation_id, &text, None)
            .await
            .map(|id| info!(message_id = %id, "Message delivered")),
        (Command::Quit, Some(_)) => Ok(()),
    };

    if let Err(e) = result {
        if e.is_retryable() {
            warn!("{} (retry with /retry)", e);
        } else {
            warn!("{}", e);
        }
    }
}
