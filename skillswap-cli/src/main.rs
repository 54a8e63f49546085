//! SkillSwap collaboration CLI.
//!
//! `skillswap relay` runs the topic relay. `skillswap join` opens a
//! session's shared notes: every stdin line is appended to the document,
//! and remote changes are printed as they arrive.
//!
//! Commands typed on stdin while joined:
//! - `/cursor <index> [length]` moves the local caret
//! - `/show` prints the current text
//! - `/end` ends the learning session (deactivates the document)
//! - `/quit` leaves

mod cli;

use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use cli::{Cli, Command};
use skillswap_collab::config::{CollabConfig, RelayConfig};
use skillswap_collab::editor::{CollabEditor, EditorEvent, EditorHandle};
use skillswap_collab::identity::{
    CredentialProvider, IdentityProvider, MemoryCredentials, StaticIdentity, TokenIdentity,
    UserIdentity,
};
use skillswap_collab::server::RelayServer;
use skillswap_collab::store::{DocumentStore, HttpDocumentStore, InMemoryDocumentStore};
use skillswap_collab::transport::Transport;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Relay { bind, max_peers } => run_relay(bind, max_peers).await,
        Command::Join {
            session,
            relay_url,
            store_url,
            token,
            name,
            user_id,
        } => {
            let mut config = CollabConfig::from_env()?;
            if let Some(url) = relay_url {
                config.relay_url = url;
            }
            if store_url.is_some() {
                config.store_url = store_url;
            }
            run_join(config, &session, token, name, user_id).await
        }
    }
}

async fn run_relay(bind: Option<String>, max_peers: Option<usize>) -> CliResult {
    let mut config = RelayConfig::from_env()?;
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    if let Some(max_peers) = max_peers {
        config.max_peers_per_room = max_peers;
    }

    info!("Starting SkillSwap relay on {}...", config.bind_addr);
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            server.shutdown();
            let stats = server.stats().await;
            info!(
                "Relay stopped: {} connections served, {} frames relayed",
                stats.total_connections, stats.total_frames
            );
        }
    }
    Ok(())
}

async fn run_join(
    config: CollabConfig,
    session_id: &str,
    token: Option<String>,
    name: Option<String>,
    user_id: Option<String>,
) -> CliResult {
    let credentials = Arc::new(MemoryCredentials::new());
    if let Some(token) = token {
        credentials.set_token(token);
    }

    let identity: Box<dyn IdentityProvider> = match name {
        Some(name) => {
            let user_id = user_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            Box::new(StaticIdentity(UserIdentity::new(user_id, name)))
        }
        None => Box::new(TokenIdentity::new(credentials.clone())),
    };

    let store: Arc<dyn DocumentStore> = match &config.store_url {
        Some(url) => Arc::new(HttpDocumentStore::new(url.as_str(), credentials.clone())?),
        None => {
            info!("No store URL configured, notes are kept in memory only");
            Arc::new(InMemoryDocumentStore::new())
        }
    };

    let transport = Transport::new(&config);
    let editor = CollabEditor::open(&config, store, transport, identity.as_ref(), session_id).await?;
    println!(
        "Joined session {session_id} as {} (document {}, version {})",
        editor.identity().display_name,
        editor.document_id(),
        editor.version()
    );

    let text = editor.content().to_string();
    let handle = editor.spawn();
    edit_loop(handle, text).await;
    Ok(())
}

async fn edit_loop(mut handle: EditorHandle, mut text: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim_end();
                    if line == "/quit" {
                        break;
                    }
                    if line == "/end" {
                        handle.end_session().await;
                        println!("Session ended");
                        return;
                    }
                    if line == "/show" {
                        println!("{text}");
                        continue;
                    }
                    if let Some(args) = line.strip_prefix("/cursor") {
                        let mut numbers = args.split_whitespace().map(str::parse::<usize>);
                        let range = match (numbers.next(), numbers.next()) {
                            (Some(Ok(index)), None) => Some((index, 0)),
                            (Some(Ok(index)), Some(Ok(length))) => Some((index, length)),
                            _ => None,
                        };
                        match range {
                            Some((index, length)) => {
                                if handle.move_cursor(index, length).await.is_err() {
                                    break;
                                }
                            }
                            None => println!("usage: /cursor <index> [length]"),
                        }
                        continue;
                    }
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(line);
                    if handle.edit(text.clone()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read stdin: {e}");
                    break;
                }
            },

            event = handle.next_event() => match event {
                Some(EditorEvent::ContentReplaced { content, version, by }) => {
                    println!("── {by} (version {version}) ──\n{content}");
                    text = content;
                }
                Some(EditorEvent::RosterChanged(names)) => {
                    println!("In this session: {}", if names.is_empty() { "just you".to_string() } else { names.join(", ") });
                }
                Some(EditorEvent::Published { version, .. }) => log::debug!("Published version {version}"),
                Some(EditorEvent::Connection(state)) => println!("[{state:?}]"),
                Some(EditorEvent::CursorsChanged(cursors)) => {
                    for cursor in cursors {
                        log::debug!("{} at {}+{}", cursor.display_name, cursor.range.index, cursor.range.length);
                    }
                }
                Some(EditorEvent::Ready { .. }) => {}
                Some(EditorEvent::Closed) | None => return,
            },
        }
    }

    handle.close().await;
}
