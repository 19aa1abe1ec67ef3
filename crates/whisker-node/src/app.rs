//! Minimal line-oriented front-end over the core API: renders the peer
//! list and availability flags, sends messages, and shows per-peer chat
//! history. Messages we send are appended locally after a successful
//! transmit; a failed send evicts the peer and resets chat focus.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use whisker_net::availability::AvailabilityMonitor;
use whisker_net::registry::{PeerRecord, PeerRegistry};
use whisker_shared::constants::APP_NAME;
use whisker_shared::identity::Identity;
use whisker_shared::types::ChatMessage;

pub async fn run(
    name: &str,
    identity: Arc<Identity>,
    registry: Arc<PeerRegistry>,
    monitor: Arc<AvailabilityMonitor>,
) -> Result<()> {
    println!(
        "{APP_NAME} — logged in as {name} ({})",
        identity.peer_id().short()
    );
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "/help" => help(),
            "/peers" => render_peers(&registry),
            "/modes" => {
                let modes = monitor.current().await;
                println!(
                    "BLE: {}  LAN: {}  Internet: {}",
                    mark(modes.ble),
                    mark(modes.lan),
                    mark(modes.internet)
                );
            }
            "/chat" => match select_peer(&registry, rest) {
                Some(record) => render_chat(&record),
                None => println!("no such peer (see /peers)"),
            },
            "/msg" => {
                let (index, text) = match rest.split_once(' ') {
                    Some((index, text)) if !text.trim().is_empty() => (index, text.trim()),
                    _ => {
                        println!("usage: /msg <peer#> <text>");
                        continue;
                    }
                };
                let Some(record) = select_peer(&registry, index) else {
                    println!("no such peer (see /peers)");
                    continue;
                };
                match record.send(identity.private_key(), text).await {
                    Ok(()) => {
                        record.push_message(ChatMessage::now(
                            registry.local_id().clone(),
                            text,
                        ));
                    }
                    Err(e) => {
                        // The peer is unreachable; drop it and let
                        // discovery re-add it if it comes back.
                        warn!(peer = %record.peer_id().short(), error = %e, "send failed, evicting");
                        println!("send failed ({e}), peer removed");
                        registry.delete(record.peer_id());
                    }
                }
            }
            "/quit" | "/exit" => break,
            _ => println!("unknown command, try /help"),
        }
    }
    Ok(())
}

fn help() {
    println!("  /peers            list discovered peers");
    println!("  /modes            show transport availability");
    println!("  /chat <peer#>     show conversation");
    println!("  /msg <peer#> <t>  send a message");
    println!("  /quit             leave");
}

fn render_peers(registry: &PeerRegistry) {
    let peers = registry.list();
    if peers.is_empty() {
        println!("no peers discovered yet");
        return;
    }
    for (index, record) in peers.iter().enumerate() {
        let info = record.info();
        let transports: Vec<String> = info
            .connection_types
            .iter()
            .map(|t| t.to_string())
            .collect();
        let primary = info
            .primary
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{index:>3}  {}  via [{}] primary {}",
            record.peer_id().short(),
            transports.join(", "),
            primary,
        );
    }
}

fn render_chat(record: &PeerRecord) {
    let messages = record.messages();
    if messages.is_empty() {
        println!("no messages with {}", record.peer_id().short());
        return;
    }
    for message in messages {
        println!(
            "[{}] {}: {}",
            message.time.format("%H:%M:%S"),
            message.author.short(),
            message.text,
        );
    }
}

fn select_peer(registry: &PeerRegistry, index: &str) -> Option<Arc<PeerRecord>> {
    let index: usize = index.parse().ok()?;
    registry.list().into_iter().nth(index)
}

fn mark(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
