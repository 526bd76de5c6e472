//! `vocsdb-server`: the Request Dispatcher's process entry point. Loads
//! layered configuration, wires the Entity Store to the LDAP Import Worker
//! and the Dispatcher, replays the last snapshot if one exists, starts the
//! periodic persistence timers (§4.7), and serves requests as
//! newline-delimited JSON envelopes over stdio — a minimal stand-in for the
//! duplex client gateway, which is out of scope here (§1).

mod config;
mod connection;
mod dispatcher;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use dispatcher::Dispatcher;
use ldap_import_plugin::{LdapImportConfig, Service as LdapImportService};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use uuid::Uuid;
use vocsdb::EntityStore;
use vocsdb_sdk::RequestEnvelope;

#[derive(Debug, Parser)]
#[command(name = "vocsdb-server", about = "Multi-tenant auth/state store for push-to-talk voice")]
struct Args {
    /// Override the config file figment would otherwise read from
    /// `VOCSDB_CONFIG`.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

    let args = Args::parse();
    let config = config::load(args.config.as_deref())?;
    info!(path = %config.vocsdb.path, ldap_enabled = config.ldap_enabled, "configuration loaded");

    let store = Arc::new(EntityStore::new(&config.vocsdb.timeout, config.vocsdb.password));
    let persistence_root = config.vocsdb.path.clone();
    if Path::new(&persistence_root).join("auth.json").exists() {
        match store.load(Path::new(&persistence_root)) {
            Ok(()) => info!("loaded snapshot from {persistence_root}"),
            Err(err) => warn!(%err, "failed to load snapshot, starting empty"),
        }
    }

    // Two independent timers per §4.7, both driving the store's single
    // combined `save` (the auth tree and state plane are serialized to
    // separate files already; nothing is gained by splitting the call).
    spawn_snapshot_timer(
        Arc::clone(&store),
        persistence_root.clone(),
        config.vocsdb.timeout.auth_snapshot_seconds,
    );
    spawn_snapshot_timer(
        Arc::clone(&store),
        persistence_root.clone(),
        config.vocsdb.timeout.state_snapshot_seconds,
    );

    let ldap = Arc::new(LdapImportService::new(LdapImportConfig {
        request_timeout_usec: config.vocsdb.timeout.ldap_request_usec,
    }));
    let dispatcher = Dispatcher::new(Arc::clone(&store), ldap, config);

    serve_stdio(&dispatcher).await
}

/// Spawn the periodic snapshot task for one plane. A `0` interval disables
/// the timer entirely (§4.7): no task is spawned.
fn spawn_snapshot_timer(store: Arc<EntityStore>, root: String, interval_seconds: u64) {
    if interval_seconds == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
        loop {
            ticker.tick().await;
            if let Err(err) = store.save(Path::new(&root)) {
                error!(%err, "periodic snapshot failed");
            }
        }
    });
}

/// Read one `RequestEnvelope` per line from stdin, dispatch it under a
/// single synthetic connection, and write its `ResponseEnvelope` to stdout.
async fn serve_stdio(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    let connection_id = Uuid::new_v4();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RequestEnvelope = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed request envelope, skipping");
                continue;
            }
        };
        let response = dispatcher.handle(connection_id, request).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }
    Ok(())
}
