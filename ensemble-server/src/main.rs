//! The ensemble HTTP service binary.
//!
//! Binds loopback only and prints the full URL on startup. Exit codes:
//! 0 normal, 1 bind failure, 2 argument error (from the parser).

use std::sync::Arc;

use clap::Parser;
use ensemble_core::{AgentNetworkManager, ManagerConfig, NetworkStore, StorageRoot};
use ensemble_server::{router, AppState, NetworkCache};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ensemble-server", about = "Agent network orchestration service")]
struct Args {
    /// Port to listen on; an ephemeral port is chosen when omitted.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if std::env::var("DISABLE_AUTOUPDATER").as_deref() == Ok("1") {
        tracing::info!("auto-update checks disabled by environment");
    }

    let project = std::env::current_dir().expect("current directory is accessible");
    let root = StorageRoot::api_root();
    let store = NetworkStore::new(&root, &project);

    let manager = AgentNetworkManager::new(ManagerConfig::new(&project, store.clone()));
    let cache = Arc::new(NetworkCache::new(store));
    let app = router(AppState::new(manager, cache));

    let addr = ("127.0.0.1", args.port.unwrap_or(0));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}:{}: {e}", addr.0, addr.1);
            std::process::exit(1);
        }
    };
    let local = listener.local_addr().expect("bound listener has an address");
    println!("http://{local}");
    tracing::info!(%local, "ensemble server listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
