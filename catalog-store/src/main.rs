//! Catalog Store binary. Listens on `127.0.0.1:<port>` (localhost-bound per
//! §6) and services one `tokio::spawn`ed task per connection.

use catalog_store::Catalog;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(about = "Persistent catalog of users, games, versions and reviews")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 10001)]
    port: u16,

    /// Directory holding one JSON file per collection.
    #[arg(long, default_value = "db_data")]
    data_dir: PathBuf,
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

    let catalog = Arc::new(
        Catalog::load(&args.data_dir)
            .await
            .unwrap_or_else(|e| panic!("failed to load catalog data from {:?}: {e}", args.data_dir)),
    );

    // Localhost-bound: the Catalog is only ever reached by the Gateway and
    // Lobby processes on the same host, never directly by clients.
    let listener = TcpListener::bind(("127.0.0.1", args.port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind 127.0.0.1:{}: {e}", args.port));
    tracing::info!(port = args.port, data_dir = ?args.data_dir, "catalog store listening");

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
            Err(_) => continue, // timed out, re-check `running`
        };
        tracing::debug!(%addr, "catalog connection accepted");
        let catalog = catalog.clone();
        tokio::spawn(async move {
            catalog_store::serve_connection(catalog, stream).await;
        });
    }

    tracing::info!("catalog store shutting down");
}
