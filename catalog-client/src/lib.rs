//! A thin client for the Catalog Store, used internally by the Developer
//! Gateway and the Lobby. Each request opens a fresh TCP connection, sends
//! one message, reads one response, and closes — the "short-lived TCP to
//! Catalog per request" pattern from SPEC_FULL.md §2.

use serde_json::{Map, Value, json};
use std::net::SocketAddr;

pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] protocol::WireError),

    #[error("connect to catalog at {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed response from catalog")]
    MalformedResponse,

    /// A well-formed `{success: false, ...}` response from the Catalog
    /// itself (`"Not found"` / `"Invalid request"` / `"InternalError"`).
    #[error("{tag}: {message}")]
    Remote { tag: String, message: String },
}

#[derive(Clone)]
pub struct CatalogClient {
    addr: SocketAddr,
}

impl CatalogClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn request(&self, action: &str, collection: &str, data: Value) -> Result<Value, ClientError> {
        let mut stream = tokio::net::TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect { addr: self.addr, source })?;

        let request = json!({"action": action, "collection": collection, "data": data});
        protocol::write_message(&mut stream, &request).await?;
        let response: Value = protocol::read_message(&mut stream).await?;

        match response.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(response),
            Some(false) => {
                let tag = response
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("InternalError")
                    .to_string();
                let message = response
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(&tag)
                    .to_string();
                Err(ClientError::Remote { tag, message })
            }
            None => Err(ClientError::MalformedResponse),
        }
    }

    /// `true` iff the remote error's tag is `"Not found"` — used to
    /// distinguish "no such record" from a genuine transport/internal
    /// failure at the call site.
    pub fn is_not_found(err: &ClientError) -> bool {
        matches!(err, ClientError::Remote { tag, .. } if tag == "Not found")
    }

    pub async fn insert(&self, collection: &str, doc: Document) -> Result<Document, ClientError> {
        let response = self.request("insert", collection, Value::Object(doc)).await?;
        response
            .get("result")
            .and_then(Value::as_object)
            .cloned()
            .ok_or(ClientError::MalformedResponse)
    }

    pub async fn find(&self, collection: &str, query: Document) -> Result<Vec<Document>, ClientError> {
        let response = self
            .request("find", collection, json!({"query": query}))
            .await?;
        let results = response
            .get("results")
            .and_then(Value::as_array)
            .ok_or(ClientError::MalformedResponse)?;
        results
            .iter()
            .map(|v| v.as_object().cloned().ok_or(ClientError::MalformedResponse))
            .collect()
    }

    pub async fn find_one(&self, collection: &str, query: Document) -> Result<Document, ClientError> {
        let response = self
            .request("find_one", collection, json!({"query": query}))
            .await?;
        response
            .get("result")
            .and_then(Value::as_object)
            .cloned()
            .ok_or(ClientError::MalformedResponse)
    }

    pub async fn update(&self, collection: &str, query: Document, update: Document) -> Result<usize, ClientError> {
        let response = self
            .request("update", collection, json!({"query": query, "update": update}))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or(ClientError::MalformedResponse)
    }

    pub async fn delete(&self, collection: &str, query: Document) -> Result<usize, ClientError> {
        let response = self
            .request("delete", collection, json!({"query": query}))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or(ClientError::MalformedResponse)
    }
}
