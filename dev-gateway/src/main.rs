//! Developer Gateway binary. Listens on `0.0.0.0:<port>` and services one
//! `tokio::spawn`ed task per developer connection, talking to the Catalog
//! Store over a fresh short-lived connection per request.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(about = "Developer-facing game upload, update and removal gateway")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 10003)]
    port: u16,

    /// Address of the Catalog Store.
    #[arg(long, default_value = "127.0.0.1:10001")]
    catalog_addr: SocketAddr,

    /// Directory holding one directory per uploaded game package.
    #[arg(long, default_value = "uploaded_games")]
    uploads_dir: PathBuf,
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
    let uploads_dir = Arc::new(args.uploads_dir);

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind 0.0.0.0:{}: {e}", args.port));
    tracing::info!(port = args.port, catalog_addr = %args.catalog_addr, "developer gateway listening");

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
        tracing::debug!(%addr, "developer connection accepted");
        let catalog_addr = args.catalog_addr;
        let uploads_dir = uploads_dir.clone();
        tokio::spawn(async move {
            dev_gateway::serve_connection(stream, catalog_addr, (*uploads_dir).clone()).await;
        });
    }

    tracing::info!("developer gateway shutting down");
}
