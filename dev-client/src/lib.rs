//! A typed client for the Developer Gateway's wire protocol: connect,
//! register/login, list/upload/update/remove games, logout. This is a
//! library, not an interactive program — building a developer-facing CLI
//! on top of it is out of scope here.

use game_manifest::GameManifest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum DevClientError {
    #[error(transparent)]
    Transport(#[from] protocol::WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidPackage(#[from] game_manifest::ValidationError),

    #[error("must log in before calling this")]
    NotLoggedIn,

    #[error("malformed response from developer gateway")]
    MalformedResponse,

    /// A well-formed `{success: false, error, message}` response.
    #[error("{tag}: {message}")]
    Remote { tag: String, message: String },
}

/// One entry of `my_games`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub name: String,
    pub description: String,
    pub latest_version: String,
    pub min_players: u32,
    pub max_players: u32,
    pub status: String,
}

/// A connection to a Developer Gateway. Tracks whether `login` has
/// succeeded so `upload_game`/`update_game`/`remove_game`/`my_games` can be
/// rejected locally before a round trip, mirroring the gateway's own
/// `AuthRequired` check.
pub struct DevClient {
    stream: TcpStream,
    logged_in: bool,
}

impl DevClient {
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> Result<Self, DevClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            logged_in: false,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    async fn request(&mut self, request: Value) -> Result<Value, DevClientError> {
        protocol::write_message(&mut self.stream, &request).await?;
        let response: Value = protocol::read_message(&mut self.stream).await?;
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
                Err(DevClientError::Remote { tag, message })
            }
            None => Err(DevClientError::MalformedResponse),
        }
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<String, DevClientError> {
        let response = self
            .request(json!({"action": "register", "username": username, "password": password}))
            .await?;
        Ok(response.get("message").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, DevClientError> {
        let response = self
            .request(json!({"action": "login", "username": username, "password": password}))
            .await?;
        self.logged_in = true;
        Ok(response.get("message").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub async fn my_games(&mut self) -> Result<Vec<GameSummary>, DevClientError> {
        if !self.logged_in {
            return Err(DevClientError::NotLoggedIn);
        }
        let response = self.request(json!({"action": "my_games"})).await?;
        let games = response
            .get("games")
            .cloned()
            .ok_or(DevClientError::MalformedResponse)?;
        serde_json::from_value(games).map_err(|_| DevClientError::MalformedResponse)
    }

    /// Validates `package_dir`, announces the upload, then streams every
    /// file in the package. Mirrors `DeveloperClient.upload_game`: the
    /// package is validated locally before any bytes go over the wire.
    pub async fn upload_game(&mut self, package_dir: &Path) -> Result<String, DevClientError> {
        if !self.logged_in {
            return Err(DevClientError::NotLoggedIn);
        }
        let manifest = game_manifest::validate_package(package_dir)?;

        let ready = self
            .request(json!({"action": "upload_game", "game_name": manifest.name}))
            .await?;
        let _ = ready;

        self.send_package_files(package_dir).await?;

        let response: Value = protocol::read_message(&mut self.stream).await?;
        match response.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(response.get("message").and_then(Value::as_str).unwrap_or_default().to_string()),
            Some(false) => {
                let tag = response.get("error").and_then(Value::as_str).unwrap_or("InternalError").to_string();
                let message = response.get("message").and_then(Value::as_str).unwrap_or(&tag).to_string();
                Err(DevClientError::Remote { tag, message })
            }
            None => Err(DevClientError::MalformedResponse),
        }
    }

    /// Same file-streaming sequence as `upload_game`, but against an
    /// existing game name.
    pub async fn update_game(&mut self, game_name: &str, package_dir: &Path) -> Result<(String, GameManifest), DevClientError> {
        if !self.logged_in {
            return Err(DevClientError::NotLoggedIn);
        }
        let manifest = game_manifest::validate_package(package_dir)?;

        self.request(json!({"action": "update_game", "game_name": game_name})).await?;

        self.send_package_files(package_dir).await?;

        let response: Value = protocol::read_message(&mut self.stream).await?;
        match response.get("success").and_then(Value::as_bool) {
            Some(true) => {
                let message = response.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
                Ok((message, manifest))
            }
            Some(false) => {
                let tag = response.get("error").and_then(Value::as_str).unwrap_or("InternalError").to_string();
                let message = response.get("message").and_then(Value::as_str).unwrap_or(&tag).to_string();
                Err(DevClientError::Remote { tag, message })
            }
            None => Err(DevClientError::MalformedResponse),
        }
    }

    pub async fn remove_game(&mut self, game_name: &str) -> Result<String, DevClientError> {
        if !self.logged_in {
            return Err(DevClientError::NotLoggedIn);
        }
        let response = self.request(json!({"action": "remove_game", "game_name": game_name})).await?;
        Ok(response.get("message").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub async fn logout(&mut self) -> Result<(), DevClientError> {
        self.request(json!({"action": "logout"})).await?;
        self.logged_in = false;
        Ok(())
    }

    async fn send_package_files(&mut self, package_dir: &Path) -> Result<(), DevClientError> {
        let files = game_manifest::list_package_files(package_dir)?;
        protocol::write_message(&mut self.stream, &json!({"file_count": files.len()})).await?;

        for rel_path in files {
            let full_path = package_dir.join(&rel_path);
            let bytes = tokio::fs::read(&full_path).await?;
            let wire_path = rel_path.to_string_lossy().replace('\\', "/");
            protocol::write_message(&mut self.stream, &json!({"path": wire_path, "size": bytes.len()})).await?;
            let mut cursor = &bytes[..];
            protocol::write_file_frame(&mut self.stream, &mut cursor, bytes.len() as u64).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn spawn_catalog() -> std::net::SocketAddr {
        let dir = tempfile::tempdir().unwrap().keep();
        let catalog = Arc::new(catalog_store::Catalog::load(&dir).await.unwrap());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let catalog = catalog.clone();
                tokio::spawn(catalog_store::serve_connection(catalog, stream));
            }
        });
        addr
    }

    async fn spawn_gateway(catalog_addr: std::net::SocketAddr) -> std::net::SocketAddr {
        let uploads_dir = tempfile::tempdir().unwrap().keep();
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(dev_gateway::serve_connection(stream, catalog_addr, uploads_dir.clone()));
            }
        });
        addr
    }

    fn write_sample_package(dir: &Path) {
        std::fs::write(
            dir.join("game_info.json"),
            serde_json::json!({
                "name": "chat",
                "version": "1.0",
                "description": "a chat room",
                "min_players": 2,
                "max_players": 4,
                "server": {"start_command": "python3", "entry_point": "game_server.py", "arguments": []},
                "client": {"start_command": "python3", "entry_point": "game_client.py", "arguments": []},
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.join("game_server.py"), "server").unwrap();
        std::fs::write(dir.join("game_client.py"), "client").unwrap();
    }

    #[tokio::test]
    async fn register_login_upload_and_list() {
        let catalog_addr = spawn_catalog().await;
        let gateway_addr = spawn_gateway(catalog_addr).await;
        let package_dir = tempfile::tempdir().unwrap();
        write_sample_package(package_dir.path());

        let mut client = DevClient::connect(gateway_addr).await.unwrap();
        client.register("ann", "hunter2").await.unwrap();
        client.login("ann", "hunter2").await.unwrap();
        assert!(client.is_logged_in());

        client.upload_game(package_dir.path()).await.unwrap();

        let games = client.my_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "chat");
        assert_eq!(games[0].latest_version, "1.0");
    }

    #[tokio::test]
    async fn upload_before_login_is_rejected_locally() {
        let catalog_addr = spawn_catalog().await;
        let gateway_addr = spawn_gateway(catalog_addr).await;
        let package_dir = tempfile::tempdir().unwrap();
        write_sample_package(package_dir.path());

        let mut client = DevClient::connect(gateway_addr).await.unwrap();
        let err = client.upload_game(package_dir.path()).await.unwrap_err();
        assert!(matches!(err, DevClientError::NotLoggedIn));
    }

    #[tokio::test]
    async fn invalid_package_is_rejected_before_any_network_call() {
        let catalog_addr = spawn_catalog().await;
        let gateway_addr = spawn_gateway(catalog_addr).await;
        let empty_dir = tempfile::tempdir().unwrap();

        let mut client = DevClient::connect(gateway_addr).await.unwrap();
        client.register("bo", "p").await.unwrap();
        client.login("bo", "p").await.unwrap();

        let err = client.upload_game(empty_dir.path()).await.unwrap_err();
        assert!(matches!(err, DevClientError::InvalidPackage(_)));
    }
}
