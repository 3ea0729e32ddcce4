//! Lobby binary. Listens on `0.0.0.0:<port>` and services one
//! `tokio::spawn`ed task per player connection.

use clap::Parser;
use lobby::{LobbyContext, state::LobbyState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(about = "Player-facing matchmaking and game-session lobby")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 10002)]
    port: u16,

    /// Address of the Catalog Store.
    #[arg(long, default_value = "127.0.0.1:10001")]
    catalog_addr: SocketAddr,

    /// Directory holding one directory per uploaded game package.
    #[arg(long, default_value = "uploaded_games")]
    uploads_dir: PathBuf,

    /// Directory holding merged stdout+stderr logs for spawned game servers.
    #[arg(long, default_value = "game_server_logs")]
    logs_dir: PathBuf,

    /// Hostname advertised to clients for connecting to spawned game
    /// servers. Defaults to loopback; operators should set this to the
    /// host's externally reachable name.
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();

    tokio::fs::create_dir_all(&args.uploads_dir)
        .await
        .unwrap_or_else(|e| panic!("failed to create uploads dir {:?}: {e}", args.uploads_dir));
    tokio::fs::create_dir_all(&args.logs_dir)
        .await
        .unwrap_or_else(|e| panic!("failed to create logs dir {:?}: {e}", args.logs_dir));

    let ctx = Arc::new(LobbyContext {
        client: catalog_client::CatalogClient::new(args.catalog_addr),
        state: LobbyState::new(),
        uploads_dir: args.uploads_dir,
        logs_dir: args.logs_dir,
        advertise_host: args.advertise_host,
    });

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind 0.0.0.0:{}: {e}", args.port));
    tracing::info!(port = args.port, catalog_addr = %args.catalog_addr, "lobby listening");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            running.store(false, Ordering::SeqCst);
        });
    }

    while running.load(Ordering::SeqCst) {
        let accept = tokio::time::timeout(std::time::Duration::from_secs(1), listener.accept()).await;
        let (stream, addr) = match accept {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::warn!(?e, "accept failed");
                continue;
            }
            Err(_) => continue,
        };
        tracing::debug!(%addr, "lobby connection accepted");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            lobby::serve_connection(stream, ctx).await;
        });
    }

    tracing::info!("lobby shutting down");
}
