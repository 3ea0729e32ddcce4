//! Per-connection request dispatch. A developer connection is a sequence of
//! independent requests; `upload_game` and `update_game` are the two actions
//! that keep reading off the same socket mid-request (a file count, then
//! that many `{path, size}` + file-frame pairs) before a response goes back.

use crate::error::GatewayError;
use crate::{auth, package};
use catalog_client::{CatalogClient, Document};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::net::TcpStream;

/// Per-connection session state. `None` until `login` succeeds.
#[derive(Default)]
struct Session {
    developer: Option<Document>,
}

impl Session {
    fn require_logged_in(&self) -> Result<&Document, GatewayError> {
        self.developer.as_ref().ok_or(GatewayError::AuthRequired)
    }

    fn user_id(&self) -> Result<String, GatewayError> {
        Ok(self
            .require_logged_in()?
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    fn username(&self) -> Result<String, GatewayError> {
        Ok(self
            .require_logged_in()?
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

fn str_field(request: &Value, field: &str) -> String {
    request
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn ok_message(message: impl Into<String>) -> Value {
    json!({"success": true, "message": message.into()})
}

fn err_response(tag: &str, message: impl Into<String>) -> Value {
    json!({"success": false, "error": tag, "message": message.into()})
}

fn to_response(result: Result<Value, GatewayError>) -> Value {
    match result {
        Ok(value) => value,
        Err(err) => err_response(err.tag(), err.to_string()),
    }
}

/// Serves one developer connection end to end, dispatching requests until
/// the peer disconnects.
pub async fn serve_connection(
    mut stream: TcpStream,
    catalog_addr: std::net::SocketAddr,
    uploads_dir: PathBuf,
) {
    let client = CatalogClient::new(catalog_addr);
    let mut session = Session::default();

    loop {
        let request: Value = match protocol::read_message(&mut stream).await {
            Ok(request) => request,
            Err(protocol::WireError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "developer connection closed on transport error");
                break;
            }
        };

        let action = request.get("action").and_then(Value::as_str).unwrap_or_default();

        let response = match action {
            "register" => to_response(handle_register(&client, &request).await),
            "login" => to_response(handle_login(&client, &mut session, &request).await),
            "my_games" => to_response(handle_my_games(&client, &session).await),
            "upload_game" => {
                match handle_upload(&mut stream, &client, &session, &request, &uploads_dir).await {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(err) => err_response(err.tag(), err.to_string()),
                }
            }
            "update_game" => {
                match handle_update(&mut stream, &client, &session, &request, &uploads_dir).await {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(err) => err_response(err.tag(), err.to_string()),
                }
            }
            "remove_game" => to_response(handle_remove(&client, &session, &request).await),
            "logout" => {
                session.developer = None;
                json!({"success": true})
            }
            other => err_response("InvalidRequest", format!("unknown action {other:?}")),
        };

        if let Err(e) = protocol::write_message(&mut stream, &response).await {
            tracing::warn!(error = %e, "failed to write developer response");
            break;
        }
    }
}

async fn handle_register(client: &CatalogClient, request: &Value) -> Result<Value, GatewayError> {
    let username = str_field(request, "username");
    let password = str_field(request, "password");
    if username.is_empty() || password.is_empty() {
        return Err(GatewayError::InvalidPackage("username and password required".into()));
    }
    auth::register(client, &username, &password).await?;
    Ok(ok_message("developer account created"))
}

async fn handle_login(client: &CatalogClient, session: &mut Session, request: &Value) -> Result<Value, GatewayError> {
    let username = str_field(request, "username");
    let password = str_field(request, "password");
    let user = auth::login(client, &username, &password).await?;
    let welcome = format!("welcome {username}!");
    session.developer = Some(user);
    Ok(ok_message(welcome))
}

async fn handle_my_games(client: &CatalogClient, session: &Session) -> Result<Value, GatewayError> {
    let user_id = session.user_id()?;
    let mut query = Document::new();
    query.insert("developer_id".into(), json!(user_id));
    let games = client.find("Game", query).await?;
    Ok(json!({"success": true, "games": games}))
}

/// Shared receive-validate-promote body for `upload_game` and `update_game`.
/// Returns the validated manifest and the final package directory name.
async fn receive_and_promote(
    stream: &mut TcpStream,
    uploads_dir: &Path,
    game_name: &str,
) -> Result<(game_manifest::GameManifest, String), GatewayError> {
    let file_msg: Value = protocol::read_message(stream).await?;
    let file_count = file_msg.get("file_count").and_then(Value::as_u64).unwrap_or(0);

    let staging_dir = package::new_staging_dir(uploads_dir)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let result: Result<(game_manifest::GameManifest, String), GatewayError> = async {
        package::receive_files(stream, &staging_dir, file_count).await?;

        let manifest = game_manifest::validate_package(&staging_dir)
            .map_err(|e| GatewayError::InvalidPackage(e.to_string()))?;

        let final_dir_name = format!("{game_name}_{}", manifest.version);
        let final_dir = uploads_dir.join(&final_dir_name);
        package::promote(&staging_dir, &final_dir)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        Ok((manifest, final_dir_name))
    }
    .await;

    if result.is_err() {
        package::purge(&staging_dir).await;
    }
    result
}

async fn handle_upload(
    stream: &mut TcpStream,
    client: &CatalogClient,
    session: &Session,
    request: &Value,
    uploads_dir: &Path,
) -> Result<Option<Value>, GatewayError> {
    session.require_logged_in()?;
    let game_name = str_field(request, "game_name");
    if game_name.is_empty() {
        return Err(GatewayError::InvalidPackage("game name required".into()));
    }

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    match client.find_one("Game", query).await {
        Ok(_) => return Err(GatewayError::DuplicateName),
        Err(e) if CatalogClient::is_not_found(&e) => {}
        Err(e) => return Err(e.into()),
    }

    protocol::write_message(stream, &ok_message("ready to receive files")).await?;

    let (manifest, final_dir_name) = receive_and_promote(stream, uploads_dir, &game_name).await?;

    let mut game_doc = Document::new();
    game_doc.insert("name".into(), json!(game_name));
    game_doc.insert("developer_id".into(), json!(session.user_id()?));
    game_doc.insert("developer_name".into(), json!(session.username()?));
    game_doc.insert("latest_version".into(), json!(manifest.version));
    game_doc.insert("description".into(), json!(manifest.description));
    game_doc.insert("min_players".into(), json!(manifest.min_players));
    game_doc.insert("max_players".into(), json!(manifest.max_players));
    game_doc.insert("status".into(), json!("active"));
    let game = client.insert("Game", game_doc).await?;
    let game_id = game.get("id").and_then(Value::as_str).unwrap_or_default();

    let mut version_doc = Document::new();
    version_doc.insert("game_id".into(), json!(game_id));
    version_doc.insert("version".into(), json!(manifest.version));
    version_doc.insert("file_path".into(), json!(final_dir_name));
    client.insert("Version", version_doc).await?;

    Ok(Some(ok_message(format!(
        "game {game_name:?} v{} uploaded successfully",
        manifest.version
    ))))
}

async fn handle_update(
    stream: &mut TcpStream,
    client: &CatalogClient,
    session: &Session,
    request: &Value,
    uploads_dir: &Path,
) -> Result<Option<Value>, GatewayError> {
    session.require_logged_in()?;
    let game_name = str_field(request, "game_name");
    if game_name.is_empty() {
        return Err(GatewayError::InvalidPackage("game name required".into()));
    }

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    query.insert("developer_id".into(), json!(session.user_id()?));
    let game = match client.find_one("Game", query).await {
        Ok(game) => game,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(GatewayError::NotOwner),
        Err(e) => return Err(e.into()),
    };
    let game_id = game.get("id").and_then(Value::as_str).unwrap_or_default().to_string();

    protocol::write_message(stream, &ok_message("ready to receive files")).await?;

    let (manifest, final_dir_name) = receive_and_promote(stream, uploads_dir, &game_name).await?;

    let mut find_query = Document::new();
    find_query.insert("id".into(), json!(game_id));
    let mut update = Document::new();
    update.insert("latest_version".into(), json!(manifest.version));
    update.insert("min_players".into(), json!(manifest.min_players));
    update.insert("max_players".into(), json!(manifest.max_players));
    update.insert("description".into(), json!(manifest.description));
    client.update("Game", find_query, update).await?;

    let mut version_doc = Document::new();
    version_doc.insert("game_id".into(), json!(game_id));
    version_doc.insert("version".into(), json!(manifest.version));
    version_doc.insert("file_path".into(), json!(final_dir_name));
    client.insert("Version", version_doc).await?;

    Ok(Some(ok_message(format!(
        "game {game_name:?} updated to v{}",
        manifest.version
    ))))
}

async fn handle_remove(client: &CatalogClient, session: &Session, request: &Value) -> Result<Value, GatewayError> {
    session.require_logged_in()?;
    let game_name = str_field(request, "game_name");
    if game_name.is_empty() {
        return Err(GatewayError::InvalidPackage("game name required".into()));
    }

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    query.insert("developer_id".into(), json!(session.user_id()?));
    match client.find_one("Game", query.clone()).await {
        Ok(_) => {}
        Err(e) if CatalogClient::is_not_found(&e) => return Err(GatewayError::NotOwner),
        Err(e) => return Err(e.into()),
    }

    let mut update = Document::new();
    update.insert("status".into(), json!("removed"));
    client.update("Game", query, update).await?;

    Ok(ok_message(format!("game {game_name:?} removed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::Catalog;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    async fn spawn_catalog() -> std::net::SocketAddr {
        let dir = tempfile::tempdir().unwrap().keep();
        let catalog = Arc::new(Catalog::load(&dir).await.unwrap());
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
                tokio::spawn(serve_connection(stream, catalog_addr, dir.clone()));
            }
        });
        (addr, uploads_dir)
    }

    fn sample_manifest() -> String {
        json!({
            "name": "chat",
            "version": "1.0",
            "description": "a chat room",
            "min_players": 2,
            "max_players": 4,
            "server": {"start_command": "python3", "entry_point": "game_server.py", "arguments": []},
            "client": {"start_command": "python3", "entry_point": "game_client.py", "arguments": []},
        })
        .to_string()
    }

    async fn send_file(stream: &mut TcpStream, rel_path: &str, content: &[u8]) {
        protocol::write_message(stream, &json!({"path": rel_path, "size": content.len()}))
            .await
            .unwrap();
        let mut src = content;
        protocol::write_file_frame(stream, &mut src, content.len() as u64)
            .await
            .unwrap();
    }

    async fn upload_sample_package(stream: &mut TcpStream, game_name: &str) -> Value {
        protocol::write_message(stream, &json!({"action": "upload_game", "game_name": game_name}))
            .await
            .unwrap();
        let ready: Value = protocol::read_message(stream).await.unwrap();
        assert_eq!(ready.get("success"), Some(&json!(true)));

        protocol::write_message(stream, &json!({"file_count": 3})).await.unwrap();
        send_file(stream, "game_info.json", sample_manifest().as_bytes()).await;
        send_file(stream, "game_server.py", b"server").await;
        send_file(stream, "game_client.py", b"client").await;

        protocol::read_message(stream).await.unwrap()
    }

    #[tokio::test]
    async fn register_login_upload_round_trip() {
        let catalog_addr = spawn_catalog().await;
        let (gateway_addr, uploads_dir) = spawn_gateway(catalog_addr).await;
        let mut stream = TcpStream::connect(gateway_addr).await.unwrap();

        protocol::write_message(&mut stream, &json!({"action": "register", "username": "ann", "password": "hunter2"}))
            .await
            .unwrap();
        let register_resp: Value = protocol::read_message(&mut stream).await.unwrap();
        assert_eq!(register_resp.get("success"), Some(&json!(true)));

        protocol::write_message(&mut stream, &json!({"action": "login", "username": "ann", "password": "hunter2"}))
            .await
            .unwrap();
        let login_resp: Value = protocol::read_message(&mut stream).await.unwrap();
        assert_eq!(login_resp.get("success"), Some(&json!(true)));

        let upload_resp = upload_sample_package(&mut stream, "chat").await;
        assert_eq!(upload_resp.get("success"), Some(&json!(true)));
        assert!(tokio::fs::try_exists(uploads_dir.join("chat_1.0").join("game_info.json")).await.unwrap());

        protocol::write_message(&mut stream, &json!({"action": "my_games"})).await.unwrap();
        let games_resp: Value = protocol::read_message(&mut stream).await.unwrap();
        let games = games_resp.get("games").unwrap().as_array().unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].get("name"), Some(&json!("chat")));
    }

    #[tokio::test]
    async fn upload_without_login_is_auth_required() {
        let catalog_addr = spawn_catalog().await;
        let (gateway_addr, _uploads_dir) = spawn_gateway(catalog_addr).await;
        let mut stream = TcpStream::connect(gateway_addr).await.unwrap();

        protocol::write_message(&mut stream, &json!({"action": "upload_game", "game_name": "chat"}))
            .await
            .unwrap();
        let resp: Value = protocol::read_message(&mut stream).await.unwrap();
        assert_eq!(resp.get("success"), Some(&json!(false)));
        assert_eq!(resp.get("error"), Some(&json!("AuthRequired")));
    }

    #[tokio::test]
    async fn duplicate_game_name_is_rejected() {
        let catalog_addr = spawn_catalog().await;
        let (gateway_addr, _uploads_dir) = spawn_gateway(catalog_addr).await;
        let mut stream = TcpStream::connect(gateway_addr).await.unwrap();

        protocol::write_message(&mut stream, &json!({"action": "register", "username": "bo", "password": "p"}))
            .await
            .unwrap();
        let _: Value = protocol::read_message(&mut stream).await.unwrap();
        protocol::write_message(&mut stream, &json!({"action": "login", "username": "bo", "password": "p"}))
            .await
            .unwrap();
        let _: Value = protocol::read_message(&mut stream).await.unwrap();

        let first = upload_sample_package(&mut stream, "chat").await;
        assert_eq!(first.get("success"), Some(&json!(true)));

        protocol::write_message(&mut stream, &json!({"action": "upload_game", "game_name": "chat"}))
            .await
            .unwrap();
        let second: Value = protocol::read_message(&mut stream).await.unwrap();
        assert_eq!(second.get("success"), Some(&json!(false)));
        assert_eq!(second.get("error"), Some(&json!("DuplicateName")));
    }

    #[tokio::test]
    async fn remove_game_marks_status_removed() {
        let catalog_addr = spawn_catalog().await;
        let (gateway_addr, _uploads_dir) = spawn_gateway(catalog_addr).await;
        let mut stream = TcpStream::connect(gateway_addr).await.unwrap();

        protocol::write_message(&mut stream, &json!({"action": "register", "username": "cy", "password": "p"}))
            .await
            .unwrap();
        let _: Value = protocol::read_message(&mut stream).await.unwrap();
        protocol::write_message(&mut stream, &json!({"action": "login", "username": "cy", "password": "p"}))
            .await
            .unwrap();
        let _: Value = protocol::read_message(&mut stream).await.unwrap();
        upload_sample_package(&mut stream, "chat").await;

        protocol::write_message(&mut stream, &json!({"action": "remove_game", "game_name": "chat"}))
            .await
            .unwrap();
        let resp: Value = protocol::read_message(&mut stream).await.unwrap();
        assert_eq!(resp.get("success"), Some(&json!(true)));

        let catalog_client = CatalogClient::new(catalog_addr);
        let mut query = Document::new();
        query.insert("name".into(), json!("chat"));
        let game = catalog_client.find_one("Game", query).await.unwrap();
        assert_eq!(game.get("status"), Some(&json!("removed")));

        stream.shutdown().await.unwrap();
    }
}
