use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dmsync::api::HttpInboxApi;
use dmsync::bus::PanelEvent;
use dmsync::chat::{AttachmentUpload, ConversationId};
use dmsync::config::Config;
use dmsync::entity::UserId;
use dmsync::presence::NoPresence;
use dmsync::{DmPanel, SendOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    info!("dmsync starting against {}", config.api_url);

    let api = HttpInboxApi::new(
        config.api_url.clone(),
        config.api_token.clone(),
        config.http_timeout,
    )
    .context("Failed to build HTTP client")?;

    let panel = DmPanel::new(
        config.user_id.clone(),
        Arc::new(api),
        Arc::new(NoPresence),
        config.intervals,
    );

    let render_handle = tokio::spawn(render_events(panel.clone()));

    panel.open().await;
    if let Some(id) = config.conversation.clone() {
        panel.select_conversation(id).await;
    }
    print_help();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = read_commands(panel.clone()) => {
            if let Err(e) = res {
                error!("Input loop stopped with error: {}", e);
            }
        }
    }

    panel.close();
    render_handle.abort();
    Ok(())
}

fn print_help() {
    println!("commands: /inbox  /open <conversation>  /dm <community> <user>  /upload <path>  /retry  /quit");
    println!("anything else is sent to the open conversation");
}

async fn read_commands(panel: DmPanel) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("/quit") => break,
            Some("/inbox") => print_inbox(&panel),
            Some("/retry") => panel.retry_messages().await,
            Some("/open") => match words.next() {
                Some(id) => panel.select_conversation(ConversationId::new(id)).await,
                None => println!("usage: /open <conversation>"),
            },
            Some("/dm") => match (words.next(), words.next()) {
                (Some(community), Some(user)) => {
                    panel.start_conversation(community, &UserId::new(user)).await;
                }
                _ => println!("usage: /dm <community> <user>"),
            },
            Some("/upload") => match words.next() {
                Some(path) => upload(&panel, Path::new(path)).await,
                None => println!("usage: /upload <path>"),
            },
            Some(cmd) if cmd.starts_with('/') => print_help(),
            _ => {
                if let SendOutcome::Rejected(reason) = panel.send(&line).await {
                    println!("not sent: {}", reason);
                }
            }
        }
    }
    Ok(())
}

async fn upload(panel: &DmPanel, path: &Path) {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("cannot read {}: {}", path.display(), e);
            return;
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = content_type_for(path);
    panel
        .upload(AttachmentUpload::new(file_name, content_type, bytes))
        .await;
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn print_inbox(panel: &DmPanel) {
    let snapshot = panel.snapshot();
    println!("inbox ({} unread)", snapshot.total_unread);
    for conversation in &snapshot.conversations {
        let peer = conversation
            .peer(panel.me())
            .map(|p| p.display_name.as_str())
            .unwrap_or("?");
        let dot = if panel.is_peer_online(&conversation.id) { "*" } else { " " };
        let unread = conversation.unread_for(panel.me());
        let marker = if snapshot.selected.as_ref() == Some(&conversation.id) { ">" } else { " " };
        println!(
            "{}{} {:<12} {:<20} {:>3}  {}",
            marker,
            dot,
            conversation.id,
            peer,
            unread,
            conversation.last_message_preview.as_deref().unwrap_or("")
        );
    }
}

fn print_thread(panel: &DmPanel, id: &ConversationId) {
    let snapshot = panel.snapshot();
    if snapshot.selected.as_ref() != Some(id) {
        return;
    }
    println!("--- {} ---", id);
    for message in &snapshot.messages {
        let seen = if snapshot.seen.as_ref() == Some(&message.id) { "  (seen)" } else { "" };
        println!("[{}] {}{}", message.created_at.format("%H:%M"), message, seen);
    }
}

async fn render_events(panel: DmPanel) {
    let mut rx = panel.subscribe();
    loop {
        match rx.recv().await {
            Ok(PanelEvent::ConversationsUpdated) => print_inbox(&panel),
            Ok(PanelEvent::MessagesUpdated(id)) => print_thread(&panel, &id),
            Ok(PanelEvent::Error(message)) => println!("! {}", message),
            Ok(PanelEvent::ScrollToBottom) | Ok(PanelEvent::Opened) | Ok(PanelEvent::Closed) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                info!("Renderer skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
