//! Conversation probe — mirrors one conversation to the terminal.
//!
//! Usage:
//!   cargo run --example conversation_probe -- \
//!     --origin https://carvoy.example --conversation veh-4821
//!
//! Typed lines are sent as chat messages. Commands:
//!   /typing on|off     send a typing-state change
//!   /read 1,2,3        send a read receipt
//!   /status            print the connection state
//!   /quit              disconnect and exit
//!
//! While the transport is down, input is queued and flushed in order on
//! reconnect; a banner task polls `is_connected()` the way the web UI
//! drives its offline banner.

use anyhow::Result;
use carvoy_chat::{ChatSession, InboundEvent, SessionConfig};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "conversation-probe", about = "Carvoy conversation probe")]
struct Args {
    /// Origin of the marketplace deployment.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    origin: String,
    /// Conversation to join.
    #[arg(long)]
    conversation: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let session = ChatSession::new(SessionConfig { origin: args.origin.clone() });

    let _on_message = session.on_message(|event| match event {
        InboundEvent::Message { sender_name, content, timestamp, .. } => {
            let who = sender_name.as_deref().unwrap_or("?");
            match timestamp {
                Some(ts) => println!("[{ts}] {who}: {content}"),
                None => println!("{who}: {content}"),
            }
        }
        InboundEvent::Typing { user_name, is_typing, .. } => {
            let who = user_name.as_deref().unwrap_or("peer");
            if *is_typing {
                println!("({who} is typing)");
            } else {
                println!("({who} stopped typing)");
            }
        }
        InboundEvent::Read { message_ids, .. } => {
            println!("(read receipt for {message_ids:?})");
        }
        InboundEvent::Status { user_name, status, .. } => {
            let who = user_name.as_deref().unwrap_or("peer");
            println!("({who} is now {status:?})");
        }
        InboundEvent::ConnectionEstablished { conversation_id, .. } => {
            println!("(joined {})", conversation_id.as_deref().unwrap_or("conversation"));
        }
        InboundEvent::Error { message } => {
            println!("!! server error: {message}");
        }
    });
    let _on_connect = session.on_connect(|| println!("-- connected --"));
    let _on_disconnect = session.on_disconnect(|| println!("-- connection lost, retrying --"));

    session.connect(&args.conversation);

    // Offline banner: what the web UI renders from is_connected().
    let banner = session.clone();
    tokio::spawn(async move {
        let mut online = banner.is_connected();
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let now = banner.is_connected();
            if now != online {
                online = now;
                if online {
                    println!("[banner] back online");
                } else {
                    println!("[banner] offline, messages will be queued");
                }
            }
        }
    });

    println!("Probing conversation {} at {}", args.conversation, args.origin);
    println!("Type to chat. Commands: /typing on|off, /read <ids>, /status, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if let Some(rest) = line.strip_prefix("/typing") {
            session.send_typing(rest.trim() == "on");
        } else if let Some(rest) = line.strip_prefix("/read") {
            let ids: Vec<i64> =
                rest.split([',', ' ']).filter_map(|part| part.trim().parse().ok()).collect();
            session.send_read_receipt(&ids);
        } else if line == "/status" {
            println!("connected: {}", session.is_connected());
        } else if line == "/quit" {
            break;
        } else {
            session.send_message(&line);
        }
    }

    session.disconnect();
    Ok(())
}
