//! A typed client for the Lobby's wire protocol: register/login, browse and
//! download games, manage rooms, start/poll/end game sessions, submit
//! reviews, logout. This is a library, not an interactive program — the
//! menu-driven terminal that would sit on top of it is out of scope here
//! (see spec §1, "external collaborators").

use game_manifest::GameManifest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum PlayerClientError {
    #[error(transparent)]
    Transport(#[from] protocol::WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("must log in before calling this")]
    NotLoggedIn,

    #[error("malformed response from lobby")]
    MalformedResponse,

    /// A well-formed `{success: false, error, message}` response.
    #[error("{tag}: {message}")]
    Remote { tag: String, message: String },
}

/// One entry of `list_games`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub name: String,
    pub developer_name: String,
    pub description: String,
    pub latest_version: String,
    pub min_players: u32,
    pub max_players: u32,
}

/// One entry of `list_rooms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub game_name: String,
    pub version: String,
    pub host: String,
    pub players: u32,
    pub max_players: u32,
    pub status: String,
}

/// Server address and metadata returned by `start_game`/`check_game_status`
/// once a room's game process is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameServerAddr {
    pub host: String,
    pub port: u16,
}

/// The caller-relevant half of `check_game_status`'s response.
#[derive(Debug, Clone)]
pub struct GameStatus {
    pub game_started: bool,
    pub is_host: bool,
    pub game_server: Option<GameServerAddr>,
}

/// A connection to the Lobby. Tracks whether `login` has succeeded so
/// room/game actions can be rejected locally before a round trip, mirroring
/// the Lobby's own `AuthRequired` check.
pub struct PlayerClient {
    stream: TcpStream,
    logged_in: bool,
}

impl PlayerClient {
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> Result<Self, PlayerClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            logged_in: false,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    async fn request(&mut self, request: Value) -> Result<Value, PlayerClientError> {
        protocol::write_message(&mut self.stream, &request).await?;
        let response: Value = protocol::read_message(&mut self.stream).await?;
        Self::unwrap_response(response)
    }

    fn unwrap_response(response: Value) -> Result<Value, PlayerClientError> {
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
                Err(PlayerClientError::Remote { tag, message })
            }
            None => Err(PlayerClientError::MalformedResponse),
        }
    }

    fn require_logged_in(&self) -> Result<(), PlayerClientError> {
        if self.logged_in {
            Ok(())
        } else {
            Err(PlayerClientError::NotLoggedIn)
        }
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<String, PlayerClientError> {
        let response = self
            .request(json!({"action": "register", "username": username, "password": password}))
            .await?;
        Ok(response.get("message").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, PlayerClientError> {
        let response = self
            .request(json!({"action": "login", "username": username, "password": password}))
            .await?;
        self.logged_in = true;
        Ok(response.get("message").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub async fn logout(&mut self) -> Result<(), PlayerClientError> {
        self.request(json!({"action": "logout"})).await?;
        self.logged_in = false;
        Ok(())
    }

    pub async fn list_games(&mut self) -> Result<Vec<GameSummary>, PlayerClientError> {
        self.require_logged_in()?;
        let response = self.request(json!({"action": "list_games"})).await?;
        let games = response.get("games").cloned().ok_or(PlayerClientError::MalformedResponse)?;
        serde_json::from_value(games).map_err(|_| PlayerClientError::MalformedResponse)
    }

    /// Returns `{game, reviews, avg_rating, review_count}` as a raw JSON
    /// value — the shape is rich enough (nested review objects) that a
    /// narrow typed struct would just re-derive `serde_json::Value` anyway.
    pub async fn game_info(&mut self, game_name: &str) -> Result<Value, PlayerClientError> {
        self.require_logged_in()?;
        self.request(json!({"action": "game_info", "game_name": game_name})).await
    }

    pub async fn list_rooms(&mut self) -> Result<Vec<RoomSummary>, PlayerClientError> {
        self.require_logged_in()?;
        let response = self.request(json!({"action": "list_rooms"})).await?;
        let rooms = response.get("rooms").cloned().ok_or(PlayerClientError::MalformedResponse)?;
        serde_json::from_value(rooms).map_err(|_| PlayerClientError::MalformedResponse)
    }

    pub async fn create_room(&mut self, game_name: &str) -> Result<String, PlayerClientError> {
        self.require_logged_in()?;
        let response = self.request(json!({"action": "create_room", "game_name": game_name})).await?;
        response
            .get("room_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(PlayerClientError::MalformedResponse)
    }

    pub async fn join_room(&mut self, room_id: &str) -> Result<(), PlayerClientError> {
        self.require_logged_in()?;
        self.request(json!({"action": "join_room", "room_id": room_id})).await?;
        Ok(())
    }

    pub async fn leave_room(&mut self) -> Result<(), PlayerClientError> {
        self.require_logged_in()?;
        self.request(json!({"action": "leave_room"})).await?;
        Ok(())
    }

    pub async fn start_game(&mut self) -> Result<GameServerAddr, PlayerClientError> {
        self.require_logged_in()?;
        let response = self.request(json!({"action": "start_game"})).await?;
        let server = response
            .get("game_server")
            .cloned()
            .ok_or(PlayerClientError::MalformedResponse)?;
        serde_json::from_value(server).map_err(|_| PlayerClientError::MalformedResponse)
    }

    pub async fn check_game_status(&mut self) -> Result<GameStatus, PlayerClientError> {
        self.require_logged_in()?;
        let response = self.request(json!({"action": "check_game_status"})).await?;
        let game_started = response.get("game_started").and_then(Value::as_bool).unwrap_or(false);
        let is_host = response.get("is_host").and_then(Value::as_bool).unwrap_or(false);
        let game_server = response
            .get("game_server")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        Ok(GameStatus {
            game_started,
            is_host,
            game_server,
        })
    }

    pub async fn end_game(&mut self) -> Result<(), PlayerClientError> {
        self.require_logged_in()?;
        self.request(json!({"action": "end_game"})).await?;
        Ok(())
    }

    pub async fn submit_review(&mut self, game_name: &str, rating: u8, comment: &str) -> Result<(), PlayerClientError> {
        self.require_logged_in()?;
        self.request(json!({
            "action": "submit_review",
            "game_name": game_name,
            "rating": rating,
            "comment": comment,
        }))
        .await?;
        Ok(())
    }

    /// Downloads `game_name`'s latest version into `dest_dir`, recreating
    /// the package's relative directory structure. Mirrors the inverse of
    /// `dev-client`'s `send_package_files`: the Lobby sends `{success,
    /// version, ...}`, then `{file_count}`, then per file `{path, size}` +
    /// a file frame.
    pub async fn download_game(&mut self, game_name: &str, dest_dir: &Path) -> Result<String, PlayerClientError> {
        self.require_logged_in()?;
        protocol::write_message(&mut self.stream, &json!({"action": "download_game", "game_name": game_name})).await?;

        let header: Value = protocol::read_message(&mut self.stream).await?;
        let header = Self::unwrap_response(header)?;
        let version = header.get("version").and_then(Value::as_str).unwrap_or_default().to_string();

        let count_msg: Value = protocol::read_message(&mut self.stream).await?;
        let file_count = count_msg
            .get("file_count")
            .and_then(Value::as_u64)
            .ok_or(PlayerClientError::MalformedResponse)?;

        tokio::fs::create_dir_all(dest_dir).await?;

        for _ in 0..file_count {
            let file_msg: Value = protocol::read_message(&mut self.stream).await?;
            let rel_path = file_msg
                .get("path")
                .and_then(Value::as_str)
                .ok_or(PlayerClientError::MalformedResponse)?;
            let size = file_msg
                .get("size")
                .and_then(Value::as_u64)
                .ok_or(PlayerClientError::MalformedResponse)?;

            let dest_path = dest_dir.join(rel_path);
            if let Some(parent) = dest_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let bytes = protocol::read_file_frame(&mut self.stream).await?;
            if bytes.len() as u64 != size {
                return Err(PlayerClientError::MalformedResponse);
            }
            tokio::fs::write(&dest_path, &bytes).await?;
        }

        Ok(version)
    }

    /// Convenience used by tests and CLI tooling: downloads into the
    /// conventional `downloads/<player>/<game>_<version>/` layout from
    /// SPEC_FULL.md §6.
    pub async fn download_game_for_player(
        &mut self,
        game_name: &str,
        player_username: &str,
        downloads_root: &Path,
    ) -> Result<PathBuf, PlayerClientError> {
        let staging = downloads_root.join(player_username).join(format!("{game_name}_staging"));
        let version = self.download_game(game_name, &staging).await?;
        let final_dir = downloads_root.join(player_username).join(format!("{game_name}_{version}"));
        if tokio::fs::try_exists(&final_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&final_dir).await?;
        }
        tokio::fs::rename(&staging, &final_dir).await?;
        Ok(final_dir)
    }

    /// Spawns the downloaded package's own game client against an
    /// advertised `(host, port)`, substituting `{HOST}`/`{PORT}`/
    /// `{USERNAME}` into its argument list. Mirrors
    /// `original_source/client_demo_package/lobby_client.py`'s
    /// `launch_game_client`: the platform only advertises the address, the
    /// player's own machine runs the bundled client executable.
    pub fn launch_game_client(
        package_dir: &Path,
        manifest: &GameManifest,
        host: &str,
        port: u16,
        username: &str,
    ) -> std::io::Result<Child> {
        let args = game_manifest::client_arguments(&manifest.client, host, port, username);
        let entry_point = package_dir.join(&manifest.client.entry_point);
        Command::new(&manifest.client.start_command)
            .arg(&entry_point)
            .args(&args)
            .current_dir(package_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_client::CatalogClient;
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

    async fn spawn_gateway(catalog_addr: std::net::SocketAddr) -> (std::net::SocketAddr, PathBuf) {
        let uploads_dir = tempfile::tempdir().unwrap().keep();
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dir = uploads_dir.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(dev_gateway::serve_connection(stream, catalog_addr, dir.clone()));
            }
        });
        (addr, uploads_dir)
    }

    async fn spawn_lobby(catalog_addr: std::net::SocketAddr, uploads_dir: PathBuf) -> std::net::SocketAddr {
        let logs_dir = tempfile::tempdir().unwrap().keep();
        let ctx = Arc::new(lobby::LobbyContext {
            client: CatalogClient::new(catalog_addr),
            state: lobby::state::LobbyState::new(),
            uploads_dir,
            logs_dir,
            advertise_host: "127.0.0.1".to_string(),
        });
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(lobby::serve_connection(stream, ctx.clone()));
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
    async fn register_login_list_and_download() {
        let catalog_addr = spawn_catalog().await;
        let (gateway_addr, uploads_dir) = spawn_gateway(catalog_addr).await;
        let lobby_addr = spawn_lobby(catalog_addr, uploads_dir).await;

        let package_dir = tempfile::tempdir().unwrap();
        write_sample_package(package_dir.path());
        let mut dev = dev_client::DevClient::connect(gateway_addr).await.unwrap();
        dev.register("alice", "p").await.unwrap();
        dev.login("alice", "p").await.unwrap();
        dev.upload_game(package_dir.path()).await.unwrap();

        let mut bob = PlayerClient::connect(lobby_addr).await.unwrap();
        bob.register("bob", "p").await.unwrap();
        bob.login("bob", "p").await.unwrap();
        assert!(bob.is_logged_in());

        let games = bob.list_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "chat");

        let downloads_root = tempfile::tempdir().unwrap();
        let final_dir = bob
            .download_game_for_player("chat", "bob", downloads_root.path())
            .await
            .unwrap();
        assert!(final_dir.join("game_info.json").is_file());
        assert!(final_dir.join("game_server.py").is_file());
        let original = std::fs::read(package_dir.path().join("game_server.py")).unwrap();
        let downloaded = std::fs::read(final_dir.join("game_server.py")).unwrap();
        assert_eq!(original, downloaded);
    }

    #[tokio::test]
    async fn list_games_before_login_is_rejected_locally() {
        let catalog_addr = spawn_catalog().await;
        let (_gateway_addr, uploads_dir) = spawn_gateway(catalog_addr).await;
        let lobby_addr = spawn_lobby(catalog_addr, uploads_dir).await;

        let mut client = PlayerClient::connect(lobby_addr).await.unwrap();
        let err = client.list_games().await.unwrap_err();
        assert!(matches!(err, PlayerClientError::NotLoggedIn));
    }

    #[tokio::test]
    async fn create_and_join_room_then_check_status() {
        let catalog_addr = spawn_catalog().await;
        let (gateway_addr, uploads_dir) = spawn_gateway(catalog_addr).await;
        let lobby_addr = spawn_lobby(catalog_addr, uploads_dir).await;

        let package_dir = tempfile::tempdir().unwrap();
        write_sample_package(package_dir.path());
        let mut dev = dev_client::DevClient::connect(gateway_addr).await.unwrap();
        dev.register("ann", "p").await.unwrap();
        dev.login("ann", "p").await.unwrap();
        dev.upload_game(package_dir.path()).await.unwrap();

        let mut host = PlayerClient::connect(lobby_addr).await.unwrap();
        host.register("host", "p").await.unwrap();
        host.login("host", "p").await.unwrap();
        let room_id = host.create_room("chat").await.unwrap();

        let mut guest = PlayerClient::connect(lobby_addr).await.unwrap();
        guest.register("guest", "p").await.unwrap();
        guest.login("guest", "p").await.unwrap();
        guest.join_room(&room_id).await.unwrap();

        let rooms = host.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].players, 2);

        let status = guest.check_game_status().await.unwrap();
        assert!(!status.is_host);
        assert!(!status.game_started);
    }

    #[test]
    fn launch_game_client_substitutes_address_and_username() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game_client.sh"), "#!/bin/sh\nexit 0\n").unwrap();
        let manifest = GameManifest {
            name: "chat".into(),
            version: "1.0".into(),
            description: "".into(),
            min_players: 1,
            max_players: 4,
            server: game_manifest::ProcessSpec {
                start_command: "true".into(),
                entry_point: "game_server.sh".into(),
                arguments: vec![],
            },
            client: game_manifest::ProcessSpec {
                start_command: "sh".into(),
                entry_point: "game_client.sh".into(),
                arguments: vec!["{HOST}".into(), "{PORT}".into(), "{USERNAME}".into()],
            },
        };

        let mut child = PlayerClient::launch_game_client(dir.path(), &manifest, "127.0.0.1", 5001, "bob").unwrap();
        let status = child.wait().unwrap();
        assert!(status.success());
    }
}
