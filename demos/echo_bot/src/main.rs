//! Echo Bot Demo
//!
//! Connects to the gateways listed in the configuration file and answers a
//! few commands:
//!
//! ```text
//! /echo <text>  - Echo text
//! /ping         - Pong!
//! /info         - Message info
//! /status       - Gateway brand and login
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --config onebot.yaml
//! ```
//!
//! with an `onebot.yaml` such as:
//!
//! ```yaml
//! logging:
//!   level: debug
//! bots:
//!   - id: main
//!     event_url: ws://127.0.0.1:3001
//!     access_token: change-me
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use onebot11::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(version, about = "Echo bot for OneBot v11 gateways")]
struct Args {
    /// Configuration file (TOML or YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "development".
    #[arg(short, long)]
    profile: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Logs every message.
async fn log_message(event: Arc<Event>) -> Result<()> {
    let Some(msg) = event.as_message() else {
        return Ok(());
    };
    let Some(common) = msg.common() else {
        return Ok(());
    };
    let nickname = common.sender.nickname.as_deref().unwrap_or("Unknown");

    match msg.group_id() {
        Some(group_id) => info!(
            "[Group {}] {} ({}): {}",
            group_id,
            nickname,
            common.user_id,
            msg.plain_text()
        ),
        None => info!("[Private] {} ({}): {}", nickname, common.user_id, msg.plain_text()),
    }
    Ok(())
}

/// Replies in the chat the message came from.
async fn reply(bot: &OneBotBot, msg: &MessageEvent, text: impl Into<Message>) -> Result<()> {
    match msg {
        MessageEvent::Private(p) => {
            bot.send_private_msg(p.user_id, text).await?;
        }
        MessageEvent::Group(g) => {
            bot.send_group_msg(g.group_id, text).await?;
        }
        MessageEvent::Other(_) => {}
    }
    Ok(())
}

/// Answers commands.
async fn handle_command(bot: OneBotBot, event: Arc<Event>) -> Result<()> {
    let Some(msg) = event.as_message() else {
        return Ok(());
    };
    let text = msg.plain_text();
    let text = text.trim();

    if let Some(content) = text.strip_prefix("/echo ") {
        reply(&bot, msg, content).await?;
    } else if text == "/ping" {
        reply(&bot, msg, "Pong!").await?;
    } else if text == "/info" {
        let Some(common) = msg.common() else {
            return Ok(());
        };
        let info_text = format!(
            "Message Info\n\
            • Type: {}\n\
            • From: {}\n\
            • Message ID: {}",
            msg.name(),
            common.user_id,
            common.message_id
        );
        reply(&bot, msg, info_text).await?;
    } else if text == "/status" {
        let status = format!(
            "Gateway: {:?}\nSelf ID: {}",
            bot.brand(),
            bot.self_id()
                .map_or_else(|| "unknown".to_string(), |id| id.to_string())
        );
        reply(&bot, msg, status).await?;
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = OneBotRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build()?;

    // Listeners stay subscribed for the life of the bot; the handles are
    // only needed to unsubscribe early.
    for bot in runtime.bots() {
        let _ = bot.on(EventCategory::Message, log_message);

        let replier = bot.clone();
        let _ = bot.on(EventCategory::Message, move |event: Arc<Event>| {
            let bot = replier.clone();
            async move { handle_command(bot, event).await }
        });

        let mut stages = bot.stages();
        let id = bot.id().to_string();
        tokio::spawn(async move {
            loop {
                match stages.recv().await {
                    Ok(StageEvent::ConnectivityExhausted { attempts }) => {
                        error!(bot = %id, attempts, "Gave up reconnecting");
                    }
                    Ok(stage) => info!(bot = %id, ?stage, "Connection stage"),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    runtime.run().await?;

    Ok(())
}
