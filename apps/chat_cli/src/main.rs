use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{BackendEndpoint, ChatSession, SelectionOutcome, SessionEvent};
use shared::domain::{FriendEdge, Message, User};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{Command, HELP};
use config::{load_settings, Settings, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the friends chat backend")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    session_cookie: Option<String>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.base_url {
            settings.base_url = v;
        }
        if let Some(v) = self.session_cookie {
            settings.session_cookie = Some(v);
        }
        if let Some(v) = self.request_timeout_secs {
            settings.request_timeout_secs = v;
        }
        if let Some(v) = self.log_filter {
            settings.log_filter = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone();
    let (mut settings, config_error) = load_settings(&config_path);
    args.apply(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    if let Some(err) = config_error {
        warn!(path = %config_path.display(), "config: ignoring unreadable config file: {err}");
    }

    let endpoint = BackendEndpoint::parse(&settings.base_url).context("invalid base url")?;
    info!(base_url = %endpoint.base(), "chat: starting");
    let session = ChatSession::connect_http(
        endpoint,
        settings.session_cookie.clone(),
        settings.request_timeout(),
    )?;

    let printer = spawn_event_printer(session.subscribe_events());
    let me = session.mount().await.context("failed to start session")?;
    println!("Signed in as {} <{}>", me.display_name, me.email_address);
    print_friends(&session.accepted_friends().await);
    print_requests(&session.pending_requests().await);
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match Command::parse(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(usage)) => {
                println!("{usage}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        run_command(&session, command).await;
    }

    session.unmount().await;
    printer.abort();
    Ok(())
}

async fn run_command(session: &Arc<ChatSession>, command: Command) {
    match command {
        Command::Friends(filter) => {
            let friends = match filter {
                Some(query) => session.filter_friends(&query).await,
                None => match session.refresh_friends().await {
                    Ok(friends) => friends,
                    Err(err) => {
                        println!("error: {}", err.user_message());
                        return;
                    }
                },
            };
            print_friends(&friends);
        }
        Command::Requests => print_requests(&session.pending_requests().await),
        Command::Select(peer_id) => {
            // Runs in the background so a later /select can supersede it.
            let session = Arc::clone(session);
            tokio::spawn(async move {
                match session.select_peer_by_id(peer_id).await {
                    Ok(SelectionOutcome::Connected) => println!("connected to {peer_id}"),
                    Ok(SelectionOutcome::PeerOffline) => {
                        println!("{peer_id} is offline; showing history only")
                    }
                    Ok(SelectionOutcome::ConnectFailed) => println!("could not connect to {peer_id}"),
                    Ok(SelectionOutcome::Superseded) => {}
                    Err(err) => println!("error: {}", err.user_message()),
                }
            });
        }
        Command::Leave => session.deselect().await,
        Command::Add => match session.open_add_friend().await {
            Ok(candidates) => print_users("People you may know", &candidates),
            Err(err) => println!("error: {}", err.user_message()),
        },
        Command::Cancel => session.close_add_friend().await,
        Command::Propose(email) => {
            if let Err(err) = session.propose_friend_request(&email).await {
                println!("error: {}", err.user_message());
            }
        }
        Command::Accept(edge_id) => {
            if let Err(err) = session.accept_request(edge_id).await {
                println!("error: {}", err.user_message());
            }
        }
        Command::Who => match session.selected_peer().await {
            Some(peer) => {
                let online = session
                    .presence()
                    .await
                    .map(|presence| if presence.online { "online" } else { "offline" })
                    .unwrap_or("checking");
                println!(
                    "talking to {} ({}), {online}, connection {}",
                    peer.display_name,
                    peer.id,
                    session.connection_state().await
                );
            }
            None => println!("no conversation selected"),
        },
        Command::Help => println!("{HELP}"),
        Command::Send(text) => {
            if let Err(err) = session.send_message(&text).await {
                println!("error: {}", err.user_message());
            }
        }
        Command::Quit => {}
    }
}

fn spawn_event_printer(mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    for line in render_event(&event) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat: event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Terminal lines for one session event. Only what the event carries is
/// rendered, never the current view, so a stale event cannot show another
/// conversation.
fn render_event(event: &SessionEvent) -> Vec<String> {
    let line = match event {
        SessionEvent::PeerSelected { peer, .. } => {
            format!("-- conversation with {} --", peer.display_name)
        }
        SessionEvent::PeerDeselected => "-- conversation closed --".to_string(),
        SessionEvent::HistoryLoaded { messages, .. } if messages.is_empty() => {
            "(no earlier messages)".to_string()
        }
        SessionEvent::HistoryLoaded { messages, .. } => {
            return messages.iter().map(render_message).collect();
        }
        SessionEvent::PresenceUpdated(presence) => match (presence.online, presence.last_seen) {
            (true, _) => format!("[{} is online]", presence.peer_id),
            (false, Some(seen)) => format!(
                "[{} is offline, last seen {}]",
                presence.peer_id,
                seen.format("%Y-%m-%d %H:%M")
            ),
            (false, None) => format!("[{} is offline]", presence.peer_id),
        },
        SessionEvent::ConnectionError(reason) => format!("[connection error: {reason}]"),
        SessionEvent::MessageAppended(message) => render_message(message),
        SessionEvent::Notice(text) => text.clone(),
        SessionEvent::Error(error) => format!("error: {}", error.message),
        SessionEvent::SessionFailed(error) => {
            format!("session ended: {}; restart to sign in again", error.message)
        }
        SessionEvent::FriendsUpdated(_)
        | SessionEvent::RequestsUpdated(_)
        | SessionEvent::CandidatesUpdated(_)
        | SessionEvent::IdentityResolved(_)
        | SessionEvent::ConversationCleared { .. }
        | SessionEvent::ConnectionStateChanged(_) => return Vec::new(),
    };
    vec![line]
}

fn render_message(message: &Message) -> String {
    format!("{}: {}", message.sender_display_name, message.content)
}

fn print_friends(friends: &[User]) {
    print_users("Friends", friends);
}

fn print_users(title: &str, users: &[User]) {
    if users.is_empty() {
        println!("{title}: none");
        return;
    }
    println!("{title}:");
    for user in users {
        println!("  {:>6}  {} <{}>", user.id.0, user.display_name, user.email_address);
    }
}

fn print_requests(requests: &[FriendEdge]) {
    if requests.is_empty() {
        println!("Friend requests: none");
        return;
    }
    println!("Friend requests:");
    for request in requests {
        println!("  {:>6}  from {}", request.id.0, request.label());
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
