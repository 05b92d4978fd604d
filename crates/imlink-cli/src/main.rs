// ABOUTME: Entry point for the imlink command-line client.
// ABOUTME: Dispatches to chat, join, leave, room-info and health subcommands.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imlink_cli::{build_session, ConnectOptions};
use imlink_client::{BalancerKind, Callbacks, InboundFrame, MessageType, Session, SessionError};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "imlink")]
#[command(about = "Command-line client for imlink instant messaging")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults to ~/.config/imlink/client.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connect directly to this host:port instead of the configured endpoints
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// User id to connect as
    #[arg(short, long, global = true, env = "IMLINK_USER_ID")]
    user: Option<String>,

    /// Load balancing strategy: round_robin, weighted_round_robin, random, hash
    #[arg(long, global = true)]
    balancer: Option<BalancerKind>,

    /// Log every crate at INFO to stderr (chat still logs to its file)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat: stdin lines are sent, inbound messages are printed
    Chat {
        /// Room to chat in
        #[arg(short, long, default_value = "lobby")]
        room: String,
    },

    /// Join a room
    Join {
        room: String,

        /// Extra key=value metadata sent with the join
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },

    /// Leave a room
    Leave { room: String },

    /// Show room details
    RoomInfo { room: String },

    /// Ask the connected service instance for its serving status
    Health,
}

fn init_stderr_logging(verbose: bool) {
    if verbose {
        imlink_log::init();
    } else {
        imlink_log::init_for("imlink_client");
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut opts = ConnectOptions {
        config_path: cli.config,
        server: cli.server,
        user_id: cli.user,
        room: None,
        balancer: cli.balancer,
    };

    match cli.command {
        Commands::Chat { room } => {
            // Keep the terminal for the conversation.
            imlink_log::init_file("imlink");
            opts.room = Some(room.clone());
            run_chat(&opts, &room).await
        }
        Commands::Join { room, metadata } => {
            init_stderr_logging(cli.verbose);
            let session = connect(&opts).await?;
            let result = session
                .join_room(&room, metadata.into_iter().collect::<HashMap<_, _>>())
                .await;
            session.disconnect().await?;
            let response = result.context("join failed")?;
            println!(
                "{} {}: {}",
                if response.success { "joined" } else { "not joined" },
                room,
                response.message
            );
            Ok(())
        }
        Commands::Leave { room } => {
            init_stderr_logging(cli.verbose);
            let session = connect(&opts).await?;
            let result = session.leave_room(&room).await;
            session.disconnect().await?;
            let response = result.context("leave failed")?;
            println!(
                "{} {}: {}",
                if response.success { "left" } else { "not left" },
                room,
                response.message
            );
            Ok(())
        }
        Commands::RoomInfo { room } => {
            init_stderr_logging(cli.verbose);
            let session = connect(&opts).await?;
            let result = session.get_room_info(&room).await;
            session.disconnect().await?;
            match result.context("room info failed")? {
                Some(info) => {
                    println!("Room:    {} ({})", info.room_id, info.name);
                    println!("Members: {}", info.member_count);
                    for member in &info.member_ids {
                        println!("  - {}", member);
                    }
                }
                None => println!("Room {} not found", room),
            }
            Ok(())
        }
        Commands::Health => {
            init_stderr_logging(cli.verbose);
            let session = connect(&opts).await?;
            let result = session.health_check().await;
            session.disconnect().await?;
            println!("{}", result.context("health check failed")?.as_str_name());
            Ok(())
        }
    }
}

async fn connect(opts: &ConnectOptions) -> Result<Session> {
    let session = build_session(opts, Callbacks::new())?;
    session.connect().await.context("failed to connect")?;
    Ok(session)
}

fn print_frame(frame: &InboundFrame) {
    let time = frame
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    match frame.message_type {
        MessageType::Text => println!(
            "[{}] {}@{}: {}",
            time,
            frame.from_user_id,
            frame.room_id,
            frame.text().unwrap_or("<binary>")
        ),
        other => println!(
            "[{}] {}@{}: <{} message, {} bytes>",
            time,
            frame.from_user_id,
            frame.room_id,
            other.as_str_name(),
            frame.payload.len()
        ),
    }
}

async fn run_chat(opts: &ConnectOptions, room: &str) -> Result<()> {
    let handler = Callbacks::new()
        .with_on_message(print_frame)
        .with_on_connect(|| eprintln!("* connected"))
        .with_on_disconnect(|reason| eprintln!("* connection lost: {}", reason))
        .with_on_error(|err| {
            if let SessionError::ReconnectExhausted { .. } = err {
                eprintln!("* {}; type /reconnect to try again", err);
            }
        });
    let session = build_session(opts, handler)?;
    session.connect().await.context("failed to connect")?;
    eprintln!("* chatting in {} as {} (/quit to exit)", room, session.config().user_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/reconnect" => {
                if let Err(e) = session.connect().await {
                    eprintln!("* reconnect failed: {}", e);
                }
            }
            "/status" => eprintln!(
                "* {} via {}",
                session.state(),
                session
                    .current_endpoint()
                    .map(|e| e.authority())
                    .unwrap_or_else(|| "-".to_string())
            ),
            text => {
                if let Err(e) = session.send_text(room, text).await {
                    eprintln!("* not sent: {}", e);
                }
            }
        }
    }

    session.disconnect().await?;
    Ok(())
}
