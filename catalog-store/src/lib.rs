//! The Catalog Store: a persistent, mutex-per-collection JSON document
//! store fronted by the length-prefixed wire protocol in the `protocol`
//! crate. See SPEC_FULL.md §4.2.

pub mod error;
pub mod handler;
pub mod store;

pub use error::CatalogError;
pub use store::Catalog;

use std::sync::Arc;
use tokio::net::TcpStream;

/// Services one connection: reads request messages until the peer closes
/// the connection, replying to each in turn. Requests are strictly
/// request-then-response — the protocol has no pipelining — so this is a
/// plain read/process/write loop.
pub async fn serve_connection(catalog: Arc<Catalog>, mut stream: TcpStream) {
    loop {
        let request = match protocol::read_message::<serde_json::Value, _>(&mut stream).await {
            Ok(value) => value,
            Err(protocol::WireError::Closed) => return,
            Err(err) => {
                tracing::warn!(?err, "catalog connection terminated");
                return;
            }
        };

        let response = handler::handle_request(&catalog, request).await;
        if let Err(err) = protocol::write_message(&mut stream, &response).await {
            tracing::warn!(?err, "failed to write catalog response");
            return;
        }
    }
}
