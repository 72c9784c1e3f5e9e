//! Command-line client for Mentorline real-time chat.
//!
//! Used for manual testing against a running messaging server: join a room
//! and chat from stdin, tail notifications, or exercise the authenticated
//! HTTP path.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use mentorline_core::api::{ApiClient, ReqwestDispatcher};
use mentorline_core::config::ClientConfig;
use mentorline_core::connection::{ConnectionStatus, SocketManager};
use mentorline_core::conversation::{
    ConversationChannel, ConversationEvent, ConversationHandler,
};
use mentorline_core::event::{Notification, SessionStarted};
use mentorline_core::message::MessageKind;
use mentorline_core::notification::{NotificationHandler, NotificationListener};
use mentorline_core::session::{Role, SessionGate, User};
use mentorline_core::tokio_transport::TokioConnector;

#[derive(Parser)]
#[command(name = "mentorline", about = "Mentorline real-time chat client", version)]
struct Cli {
    /// REST base URL.
    #[arg(
        long,
        env = "MENTORLINE_API_URL",
        default_value = "https://api.mentorline.app"
    )]
    api_url: String,

    /// Messaging socket URL.
    #[arg(
        long,
        env = "MENTORLINE_SOCKET_URL",
        default_value = "wss://api.mentorline.app/socket"
    )]
    socket_url: String,

    /// Session token attached to the socket dial.
    #[arg(long, env = "MENTORLINE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a conversation room and chat from stdin.
    Chat {
        /// Conversation room id.
        #[arg(long)]
        room: String,
        /// Peer user id.
        #[arg(long)]
        peer: String,
        /// Local user id.
        #[arg(long, env = "MENTORLINE_USER_ID")]
        user_id: String,
        /// Local display name.
        #[arg(long, env = "MENTORLINE_USER_NAME", default_value = "me")]
        user_name: String,
    },
    /// Tail server-pushed notifications until Ctrl-C.
    Notifications {
        /// Local user id.
        #[arg(long, env = "MENTORLINE_USER_ID")]
        user_id: String,
    },
    /// Show the current user via the authenticated HTTP path.
    Whoami,
    /// Probe connectivity: dial the messaging server and report the
    /// resulting connection state.
    Status {
        /// Local user id.
        #[arg(long, env = "MENTORLINE_USER_ID", default_value = "probe")]
        user_id: String,
    },
}

/// Entry point called from `main`.
pub fn run_cli() {
    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.api_url.clone(), cli.socket_url.clone());
    if let Some(token) = cli.token.clone() {
        config = config.with_auth(token);
    }

    match cli.command {
        Command::Chat {
            room,
            peer,
            user_id,
            user_name,
        } => handle_chat(config, &room, &peer, &user_id, &user_name),
        Command::Notifications { user_id } => handle_notifications(config, &user_id),
        Command::Whoami => handle_whoami(&cli.api_url),
        Command::Status { user_id } => handle_status(config, &user_id),
    }
}

fn local_user(user_id: &str, user_name: &str) -> User {
    User {
        id: user_id.to_string(),
        display_name: user_name.to_string(),
        role: Role::Mentee,
    }
}

struct PrintMessages;

impl ConversationHandler for PrintMessages {
    fn on_event(&self, event: ConversationEvent) {
        match event {
            ConversationEvent::MessageReceived { message, is_own } => {
                if is_own {
                    println!("(you, elsewhere) {}", message.content);
                } else {
                    println!("{}: {}", message.sender_name, message.content);
                }
            }
            ConversationEvent::MessageSent { .. } => println!("  ✓ delivered"),
            ConversationEvent::MessagesRead { message_ids } => {
                println!("  ✓✓ read ({} messages)", message_ids.len());
            }
        }
    }
}

/// Handle the chat command - connect, join the room, read stdin.
fn handle_chat(config: ClientConfig, room: &str, peer: &str, user_id: &str, user_name: &str) {
    let gate = SessionGate::new();
    gate.set_user(local_user(user_id, user_name));

    println!("Joining {} as {} ({})", room, user_name, user_id);
    println!("Type messages, Ctrl-C to leave.");
    println!();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        let manager = SocketManager::new(config, TokioConnector, gate);
        manager.connect().await;

        let channel = ConversationChannel::new(
            Arc::clone(&manager),
            room,
            local_user(user_id, user_name),
            peer,
        );
        let _handle = channel.attach(Arc::new(PrintMessages));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) if !text.trim().is_empty() => {
                            if let Err(e) = channel.send(text.trim(), MessageKind::Text, None).await {
                                eprintln!("send failed: {}", e);
                            }
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(e) => {
                            eprintln!("stdin error: {}", e);
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\nLeaving {}...", room);
                    break;
                }
            }
        }

        manager.disconnect().await;
    });
}

struct PrintNotifications;

impl NotificationHandler for PrintNotifications {
    fn on_notification(&self, notification: Notification) {
        println!(
            "[{}] {}: {}",
            notification.kind, notification.title, notification.body
        );
    }

    fn on_session_started(&self, session: SessionStarted) {
        println!(
            "session {} started (mentor {}, mentee {})",
            session.session_id, session.mentor_id, session.mentee_id
        );
    }
}

/// Handle the notifications command - print events until Ctrl-C.
fn handle_notifications(config: ClientConfig, user_id: &str) {
    let gate = SessionGate::new();
    gate.set_user(local_user(user_id, user_id));

    println!("Listening for notifications, Ctrl-C to stop.");

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        let manager = SocketManager::new(config, TokioConnector, gate);
        manager.connect().await;

        let _handle = NotificationListener::attach(&manager, Arc::new(PrintNotifications));

        let _ = tokio::signal::ctrl_c().await;
        manager.disconnect().await;
    });
}

fn status_label(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Disconnected => "disconnected".to_string(),
        ConnectionStatus::Connecting => "connecting".to_string(),
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::Reconnecting { attempt } => format!("reconnecting (attempt {})", attempt),
        ConnectionStatus::Unavailable => "unavailable".to_string(),
    }
}

/// Handle the status command - dial and report each state transition.
fn handle_status(config: ClientConfig, user_id: &str) {
    let gate = SessionGate::new();
    gate.set_user(local_user(user_id, user_id));

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        let manager = SocketManager::new(config, TokioConnector, gate);
        let mut status = manager.watch_status();
        manager.connect().await;

        loop {
            let current = status.borrow_and_update().clone();
            println!("{}", status_label(&current));
            match current {
                // Disconnected after connect() means the dial never started.
                ConnectionStatus::Connected
                | ConnectionStatus::Unavailable
                | ConnectionStatus::Disconnected => break,
                _ => {}
            }
            if status.changed().await.is_err() {
                break;
            }
        }

        manager.disconnect().await;
    });
}

/// Handle the whoami command - GET /auth/me through the interceptor.
fn handle_whoami(api_url: &str) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        let dispatcher = match ReqwestDispatcher::new(api_url) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("Failed to build HTTP client: {}", e);
                return;
            }
        };
        let client = ApiClient::new(Arc::new(dispatcher), SessionGate::new());

        match client.me().await {
            Ok(user) => {
                println!("id:    {}", user.id);
                println!("name:  {}", user.display_name);
                println!("role:  {:?}", user.role);
            }
            Err(e) => eprintln!("Not logged in: {}", e),
        }
    });
}
