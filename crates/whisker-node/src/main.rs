//! Whisker node daemon: one process is simultaneously a server (inbound
//! sessions) and a client (dialing discovered peers). No broker, no
//! accounts — the static public key is the identity.

mod app;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use whisker_net::availability::AvailabilityMonitor;
use whisker_net::discovery::ble::{spawn_ble_source, NullBleAdapter};
use whisker_net::discovery::dht::{spawn_dht_source, DhtConfig};
use whisker_net::discovery::lan::spawn_lan_discovery;
use whisker_net::listener::Listener;
use whisker_net::registry::PeerRegistry;
use whisker_net::sweep::spawn_sweeper;
use whisker_shared::constants::DEFAULT_PORT;
use whisker_shared::identity::Identity;

const LOG_FILE: &str = "whisker.log";

/// Peer-to-peer encrypted messenger.
#[derive(Parser, Debug)]
#[command(name = "whisker-node", version, about)]
struct Args {
    /// Display name shown to the local UI (prompted when omitted).
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The log file is the only persisted state; stdout stays free for
    // the front-end.
    let log_file = std::fs::File::options()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .with_context(|| format!("opening {LOG_FILE}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,whisker_net=debug")),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let name = match args.name {
        Some(name) => name,
        None => prompt_name()?,
    };

    let identity = Arc::new(Identity::generate().context("generating identity keypair")?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        peer_id = %identity.peer_id(),
        "starting whisker node"
    );

    let port = DEFAULT_PORT;
    let registry = Arc::new(PeerRegistry::new(identity.peer_id().clone()));
    let cancel = CancellationToken::new();

    // Bind before anything else: a taken port is a fatal init error.
    let listener = Listener::bind(port, identity.clone(), registry.clone())
        .await
        .context("binding listener")?;

    let ble_adapter = Arc::new(NullBleAdapter);
    let monitor = AvailabilityMonitor::new(ble_adapter.clone(), port);

    tokio::spawn(listener.run(cancel.clone()));
    spawn_lan_discovery(identity.clone(), port, registry.clone(), cancel.clone());
    spawn_ble_source(
        ble_adapter,
        identity.clone(),
        port,
        registry.clone(),
        cancel.clone(),
    );
    spawn_dht_source(
        identity.clone(),
        port,
        DhtConfig {
            listen_port: port + 1,
            bootstrap: bootstrap_from_env(),
        },
        registry.clone(),
        cancel.clone(),
    );
    spawn_sweeper(registry.clone(), cancel.clone());
    monitor.spawn(cancel.clone());

    info!(port, name = %name, "node running");

    tokio::select! {
        result = app::run(&name, identity.clone(), registry.clone(), monitor.clone()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
    }

    cancel.cancel();
    info!("node stopped");
    Ok(())
}

fn prompt_name() -> anyhow::Result<String> {
    print!("Please type in your name: ");
    std::io::stdout().flush()?;
    let mut name = String::new();
    std::io::stdin()
        .read_line(&mut name)
        .context("reading display name")?;
    Ok(name.trim().to_string())
}

/// Optional comma-separated bootstrap multiaddrs for the DHT.
fn bootstrap_from_env() -> Vec<libp2p::Multiaddr> {
    let Ok(raw) = std::env::var("WHISKER_BOOTSTRAP") else {
        return Vec::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(addr = %s, error = %e, "skipping invalid bootstrap multiaddr");
                None
            }
        })
        .collect()
}
