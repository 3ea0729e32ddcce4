//! Per-connection request dispatch for the Lobby: the eleven authenticated
//! request types plus `register`/`login`/`logout`, built directly on
//! `original_source/server/lobby_server.py`'s `_process_request` dispatch
//! table and the per-action handlers beneath it.

use crate::auth;
use crate::error::LobbyError;
use crate::process;
use crate::state::{LobbyState, Room, RoomStatus};
use catalog_client::{CatalogClient, Document};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

pub struct LobbyContext {
    pub client: CatalogClient,
    pub state: LobbyState,
    pub uploads_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub advertise_host: String,
}

#[derive(Default)]
struct Session {
    user_id: Option<String>,
    username: Option<String>,
}

impl Session {
    fn require_logged_in(&self) -> Result<&str, LobbyError> {
        self.user_id.as_deref().ok_or(LobbyError::AuthRequired)
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

fn to_response(result: Result<Value, LobbyError>) -> Value {
    match result {
        Ok(value) => value,
        Err(err) => err_response(err.tag(), err.to_string()),
    }
}

pub async fn serve_connection(mut stream: TcpStream, ctx: Arc<LobbyContext>) {
    let mut session = Session::default();

    loop {
        let request: Value = match protocol::read_message(&mut stream).await {
            Ok(request) => request,
            Err(protocol::WireError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "lobby connection closed on transport error");
                break;
            }
        };

        let action = request.get("action").and_then(Value::as_str).unwrap_or_default();

        let response = match action {
            "register" => to_response(handle_register(&ctx, &request).await),
            "login" => to_response(handle_login(&ctx, &mut session, &request).await),
            "list_games" => to_response(handle_list_games(&ctx).await),
            "game_info" => to_response(handle_game_info(&ctx, &request).await),
            "download_game" => match handle_download_game(&mut stream, &ctx, &request).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => err_response(err.tag(), err.to_string()),
            },
            "list_rooms" => to_response(handle_list_rooms(&ctx).await),
            "create_room" => to_response(handle_create_room(&ctx, &session, &request).await),
            "join_room" => to_response(handle_join_room(&ctx, &session, &request).await),
            "leave_room" => to_response(handle_leave_room(&ctx, &session).await),
            "start_game" => to_response(handle_start_game(&ctx, &session).await),
            "check_game_status" => to_response(handle_check_game_status(&ctx, &session).await),
            "end_game" => to_response(handle_end_game(&ctx, &session).await),
            "submit_review" => to_response(handle_submit_review(&ctx, &session, &request).await),
            "logout" => {
                if let Some(user_id) = &session.user_id {
                    auth::cleanup_session(&ctx.state, user_id);
                }
                session = Session::default();
                json!({"success": true})
            }
            other => err_response("InvalidRequest", format!("unknown action {other:?}")),
        };

        if let Err(e) = protocol::write_message(&mut stream, &response).await {
            tracing::warn!(error = %e, "failed to write lobby response");
            break;
        }
    }

    if let Some(user_id) = &session.user_id {
        auth::cleanup_session(&ctx.state, user_id);
    }
}

async fn handle_register(ctx: &LobbyContext, request: &Value) -> Result<Value, LobbyError> {
    let username = str_field(request, "username");
    let password = str_field(request, "password");
    if username.is_empty() || password.is_empty() {
        return Ok(err_response("InvalidRequest", "username and password required"));
    }
    auth::register(&ctx.client, &username, &password).await?;
    Ok(ok_message("player account created"))
}

async fn handle_login(ctx: &LobbyContext, session: &mut Session, request: &Value) -> Result<Value, LobbyError> {
    let username = str_field(request, "username");
    let password = str_field(request, "password");
    if username.is_empty() || password.is_empty() {
        return Ok(err_response("InvalidRequest", "username and password required"));
    }
    let user = auth::login(&ctx.client, &ctx.state, &username, &password).await?;
    session.user_id = user.get("id").and_then(Value::as_str).map(str::to_string);
    session.username = Some(username.clone());
    Ok(ok_message(format!("welcome {username}!")))
}

async fn handle_list_games(ctx: &LobbyContext) -> Result<Value, LobbyError> {
    let mut query = Document::new();
    query.insert("status".into(), json!("active"));
    let games = ctx.client.find("Game", query).await?;
    Ok(json!({"success": true, "games": games}))
}

async fn handle_game_info(ctx: &LobbyContext, request: &Value) -> Result<Value, LobbyError> {
    let game_name = str_field(request, "game_name");
    if game_name.is_empty() {
        return Ok(err_response("InvalidRequest", "game name required"));
    }

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    query.insert("status".into(), json!("active"));
    let game = match ctx.client.find_one("Game", query).await {
        Ok(game) => game,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let game_id = game.get("id").and_then(Value::as_str).unwrap_or_default();

    let mut review_query = Document::new();
    review_query.insert("game_id".into(), json!(game_id));
    let reviews = ctx.client.find("Review", review_query).await?;

    // Empty-reviews case mirrors the original's `round(0, 1)`, which yields
    // the integer `0` rather than a float, so the wire value matches byte
    // for byte.
    let avg_rating = if reviews.is_empty() {
        json!(0)
    } else {
        let sum: f64 = reviews.iter().filter_map(|r| r.get("rating").and_then(Value::as_f64)).sum();
        json!((sum / reviews.len() as f64 * 10.0).round() / 10.0)
    };

    Ok(json!({
        "success": true,
        "game": game,
        "reviews": reviews.iter().take(10).collect::<Vec<_>>(),
        "avg_rating": avg_rating,
        "review_count": reviews.len(),
    }))
}

/// Streams a package directory to the client: `{success, version, message}`,
/// then `{file_count}`, then per file `{path, size}` + a file frame.
/// Returns `Ok(None)` because the response has already been written.
async fn handle_download_game(
    stream: &mut TcpStream,
    ctx: &LobbyContext,
    request: &Value,
) -> Result<Option<Value>, LobbyError> {
    let game_name = str_field(request, "game_name");
    if game_name.is_empty() {
        return Ok(Some(err_response("InvalidRequest", "game name required")));
    }

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    query.insert("status".into(), json!("active"));
    let game = match ctx.client.find_one("Game", query).await {
        Ok(game) => game,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let version = game.get("latest_version").and_then(Value::as_str).unwrap_or_default().to_string();
    let game_id = game.get("id").and_then(Value::as_str).unwrap_or_default();

    let mut version_query = Document::new();
    version_query.insert("game_id".into(), json!(game_id));
    version_query.insert("version".into(), json!(version));
    let version_doc = match ctx.client.find_one("Version", version_query).await {
        Ok(doc) => doc,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let file_path = version_doc.get("file_path").and_then(Value::as_str).unwrap_or_default();
    let game_dir = ctx.uploads_dir.join(file_path);

    if !tokio::fs::try_exists(&game_dir).await.unwrap_or(false) {
        return Err(LobbyError::NotFound);
    }

    let files = game_manifest::list_package_files(&game_dir).map_err(|e| LobbyError::Internal(e.to_string()))?;

    protocol::write_message(
        stream,
        &json!({"success": true, "version": version, "message": format!("sending {} files...", files.len())}),
    )
    .await?;
    protocol::write_message(stream, &json!({"file_count": files.len()})).await?;

    for rel_path in &files {
        let full_path = game_dir.join(rel_path);
        let bytes = tokio::fs::read(&full_path).await?;
        let wire_path = rel_path.to_string_lossy().replace('\\', "/");
        protocol::write_message(stream, &json!({"path": wire_path, "size": bytes.len()})).await?;
        let mut cursor = &bytes[..];
        protocol::write_file_frame(stream, &mut cursor, bytes.len() as u64).await?;
    }

    Ok(None)
}

async fn handle_list_rooms(ctx: &LobbyContext) -> Result<Value, LobbyError> {
    let rooms = ctx.state.with_data(|data| {
        data.rooms
            .values()
            .map(|room| {
                json!({
                    "room_id": room.room_id,
                    "game_name": room.game_name,
                    "version": room.version,
                    "host": room.host_name,
                    "players": room.players.len(),
                    "max_players": room.max_players,
                    "status": match room.status { RoomStatus::Waiting => "waiting", RoomStatus::InGame => "in_game" },
                })
            })
            .collect::<Vec<_>>()
    });
    Ok(json!({"success": true, "rooms": rooms}))
}

async fn handle_create_room(ctx: &LobbyContext, session: &Session, request: &Value) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();
    let game_name = str_field(request, "game_name");
    if game_name.is_empty() {
        return Ok(err_response("InvalidRequest", "game name required"));
    }

    ctx.state.with_data(|data| data.remove_user_from_all_rooms(&user_id));

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    query.insert("status".into(), json!("active"));
    let game = match ctx.client.find_one("Game", query).await {
        Ok(game) => game,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let room_uuid = uuid::Uuid::new_v4().simple().to_string();
    let room_id = room_uuid[..8].to_string();
    let username = session.username.clone().unwrap_or_default();
    let room = Room {
        room_id: room_id.clone(),
        game_name: game_name.clone(),
        game_id: game.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        version: game.get("latest_version").and_then(Value::as_str).unwrap_or_default().to_string(),
        host_id: user_id.clone(),
        host_name: username,
        players: vec![user_id],
        max_players: game.get("max_players").and_then(Value::as_u64).unwrap_or(2) as u32,
        status: RoomStatus::Waiting,
        process: None,
    };
    ctx.state.with_data(|data| {
        data.rooms.insert(room_id.clone(), room);
    });

    Ok(json!({"success": true, "room_id": room_id, "message": format!("room created for {game_name}"), "is_host": true}))
}

async fn handle_join_room(ctx: &LobbyContext, session: &Session, request: &Value) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();
    let room_id = str_field(request, "room_id");
    if room_id.is_empty() {
        return Ok(err_response("InvalidRequest", "room id required"));
    }

    ctx.state.with_data(|data| {
        data.remove_user_from_all_rooms(&user_id);

        let room = data.rooms.get_mut(&room_id).ok_or(LobbyError::RoomNotFound)?;
        if room.status != RoomStatus::Waiting {
            return Err(LobbyError::RoomBusy);
        }
        if room.players.len() as u32 >= room.max_players {
            return Err(LobbyError::RoomFull);
        }
        room.players.push(user_id);
        Ok(json!({"success": true, "room_id": room_id, "game_name": room.game_name, "is_host": false}))
    })
}

async fn handle_leave_room(ctx: &LobbyContext, session: &Session) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();
    let left = ctx.state.with_data(|data| {
        let room_id = data.room_containing(&user_id).map(str::to_string);
        let Some(room_id) = room_id else {
            return false;
        };
        data.remove_user_from_all_rooms(&user_id);
        // Unlike the other `remove_user_from_all_rooms` call sites, leaving
        // also polls a still-`in_game` room: the departing player may have
        // been the host of a finished game, and the promoted host must not
        // be left stuck behind a stale `RoomBusy`.
        if let Some(room) = data.rooms.get_mut(&room_id) {
            room.reset_if_process_exited();
        }
        true
    });
    if left {
        Ok(ok_message("left room"))
    } else {
        Err(LobbyError::NotInRoom)
    }
}

async fn handle_start_game(ctx: &LobbyContext, session: &Session) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();

    let (room_id, game_id) = ctx.state.with_data(|data| {
        let room_id = data.room_containing(&user_id).map(str::to_string).ok_or(LobbyError::NotInRoom)?;
        let room = data.rooms.get_mut(&room_id).unwrap();
        if room.host_id != user_id {
            return Err(LobbyError::NotHost);
        }
        if room.status == RoomStatus::InGame {
            for _ in 0..10 {
                if room.reset_if_process_exited() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(200));
            }
            if room.status == RoomStatus::InGame {
                return Err(LobbyError::AlreadyStarted);
            }
        }
        Ok((room_id, room.game_id.clone()))
    })?;

    let mut game_query = Document::new();
    game_query.insert("id".into(), json!(game_id));
    game_query.insert("status".into(), json!("active"));
    let game = match ctx.client.find_one("Game", game_query).await {
        Ok(game) => game,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let latest_version = game.get("latest_version").and_then(Value::as_str).unwrap_or_default().to_string();

    let mut version_query = Document::new();
    version_query.insert("game_id".into(), json!(game_id));
    version_query.insert("version".into(), json!(latest_version));
    let version_doc = match ctx.client.find_one("Version", version_query).await {
        Ok(doc) => doc,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let file_path = version_doc.get("file_path").and_then(Value::as_str).unwrap_or_default().to_string();
    let package_dir = ctx.uploads_dir.join(&file_path);
    let manifest = game_manifest::read_manifest(&package_dir).map_err(|e| LobbyError::Internal(e.to_string()))?;

    // Float `room.version` to the just-refetched `latest_version` here,
    // before the spawn attempt, so a `GameServerCrashed` reset below leaves
    // the room pointing at the current version rather than the stale one.
    let num_players = ctx.state.with_data(|data| {
        if let Some(room) = data.rooms.get_mut(&room_id) {
            room.version = latest_version.clone();
        }
        data.rooms.get(&room_id).map(|room| room.players.len() as u32).unwrap_or(1)
    });

    let port = ctx
        .state
        .with_data(|data| crate::ports::find_available_port(&mut data.next_game_port))
        .ok_or(LobbyError::NoPortsAvailable)?;

    let logs_dir = ctx.logs_dir.clone();
    let room_id_for_log = room_id.clone();
    let manifest_for_spawn = manifest.clone();
    let spawn_result = tokio::task::spawn_blocking(move || {
        let log_file_path = process::log_path(&logs_dir, port, &room_id_for_log);
        process::spawn_game_server(&package_dir, &manifest_for_spawn, port, num_players, &log_file_path)
    })
    .await
    .map_err(|e| LobbyError::Internal(e.to_string()))?;

    let process = match spawn_result {
        Ok(process) => process,
        Err(err) => {
            ctx.state.with_data(|data| {
                if let Some(room) = data.rooms.get_mut(&room_id) {
                    room.status = RoomStatus::Waiting;
                    room.process = None;
                }
            });
            return Err(err);
        }
    };

    let response = ctx.state.with_data(|data| {
        if let Some(room) = data.rooms.get_mut(&room_id) {
            room.status = RoomStatus::InGame;
            room.process = Some(process);
            json!({
                "success": true,
                "game_server": {"host": ctx.advertise_host, "port": port},
                "game_name": room.game_name,
                "version": room.version,
            })
        } else {
            json!({"success": false, "error": "RoomNotFound", "message": "room vanished while starting"})
        }
    });
    Ok(response)
}

async fn handle_check_game_status(ctx: &LobbyContext, session: &Session) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();

    let response = ctx.state.with_data(|data| {
        let room_id = match data.room_containing(&user_id) {
            Some(id) => id.to_string(),
            None => return json!({"success": true, "game_started": false}),
        };
        let room = data.rooms.get_mut(&room_id).unwrap();
        let is_host = room.host_id == user_id;

        if room.status == RoomStatus::InGame {
            let exited = room.reset_if_process_exited();
            if exited {
                return json!({"success": true, "game_started": false});
            }
            let port = room.process.as_ref().map(|p| p.port).unwrap_or_default();
            return json!({
                "success": true,
                "game_started": true,
                "game_server": {"host": ctx.advertise_host, "port": port},
                "game_name": room.game_name,
                "version": room.version,
                "room_id": room.room_id,
                "host_id": room.host_id,
                "host_name": room.host_name,
                "is_host": is_host,
                "status": "in_game",
            });
        }

        json!({
            "success": true,
            "game_started": false,
            "room_id": room.room_id,
            "host_id": room.host_id,
            "host_name": room.host_name,
            "is_host": is_host,
            "status": "waiting",
        })
    });
    Ok(response)
}

async fn handle_end_game(ctx: &LobbyContext, session: &Session) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();

    let message = ctx.state.with_data(|data| {
        let room_id = match data.room_containing(&user_id) {
            Some(id) => id.to_string(),
            None => return "not in any room".to_string(),
        };
        let room = data.rooms.get_mut(&room_id).unwrap();
        if room.status != RoomStatus::InGame {
            return "game not in progress".to_string();
        }
        if let Some(process) = room.process.as_mut() {
            process.terminate();
        }
        room.status = RoomStatus::Waiting;
        room.process = None;
        "game ended, room reset to waiting".to_string()
    });
    Ok(ok_message(message))
}

async fn handle_submit_review(ctx: &LobbyContext, session: &Session, request: &Value) -> Result<Value, LobbyError> {
    let user_id = session.require_logged_in()?.to_string();
    let username = session.username.clone().unwrap_or_default();

    let game_name = str_field(request, "game_name");
    let rating = request.get("rating").and_then(Value::as_i64);
    let comment = str_field(request, "comment");

    let (game_name, rating) = match (game_name.is_empty(), rating) {
        (false, Some(rating)) => (game_name, rating),
        _ => return Ok(err_response("InvalidRequest", "game name and rating required")),
    };
    if !(1..=5).contains(&rating) {
        return Ok(err_response("InvalidRequest", "rating must be 1-5"));
    }

    let mut query = Document::new();
    query.insert("name".into(), json!(game_name));
    let game = match ctx.client.find_one("Game", query).await {
        Ok(game) => game,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let game_id = game.get("id").and_then(Value::as_str).unwrap_or_default();

    let mut review = Document::new();
    review.insert("game_id".into(), json!(game_id));
    review.insert("player_id".into(), json!(user_id));
    review.insert("player_name".into(), json!(username));
    review.insert("rating".into(), json!(rating));
    review.insert("comment".into(), json!(comment));
    ctx.client.insert("Review", review).await?;

    Ok(ok_message("review submitted"))
}
