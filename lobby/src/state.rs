//! Global in-memory state: logged-in sessions and active rooms, guarded by
//! one `std::sync::Mutex` (§4.4.7: "one global mutex serializes every
//! mutation of sessions and rooms"). A `std::sync::Mutex` rather than a
//! tokio one because every critical section here is synchronous — a pure
//! state transition plus at most a non-blocking subprocess poll — so it is
//! always unlocked before the caller's next `.await`.

use std::collections::HashMap;
use std::process::Child;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Waiting,
    InGame,
}

/// A live game-server subprocess owned by a room. Dropping this kills
/// nothing by itself — callers terminate explicitly before discarding it.
pub struct GameProcess {
    pub child: Child,
    pub port: u16,
}

impl GameProcess {
    /// Non-blocking: `Some(exit_status)` if the process has already exited.
    pub fn poll_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    pub fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct Room {
    pub room_id: String,
    pub game_name: String,
    pub game_id: String,
    pub version: String,
    pub host_id: String,
    pub host_name: String,
    pub players: Vec<String>,
    pub max_players: u32,
    pub status: RoomStatus,
    pub process: Option<GameProcess>,
}

impl Room {
    /// If the room is `in_game` but its process has already exited, reset
    /// it to `waiting`. Mirrors the lazy-poll resets the original performs
    /// in `leave_room`, `start_game`, and `check_game_status`.
    pub fn reset_if_process_exited(&mut self) -> bool {
        if self.status != RoomStatus::InGame {
            return false;
        }
        let exited = match &mut self.process {
            Some(process) => process.poll_exited(),
            None => true,
        };
        if exited {
            self.status = RoomStatus::Waiting;
            self.process = None;
        }
        exited
    }
}

#[derive(Default)]
pub struct LobbyData {
    /// user_id -> username, for the "already logged in" check and for
    /// resolving a promoted host's display name.
    pub sessions: HashMap<String, String>,
    pub rooms: HashMap<String, Room>,
    pub next_game_port: u16,
}

impl LobbyData {
    fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            next_game_port: 5000,
        }
    }

    /// Removes `user_id` from whatever room it occupies. If the room is now
    /// empty, the room (and its subprocess) is torn down; if the departing
    /// user was host, the next remaining player is promoted.
    pub fn remove_user_from_all_rooms(&mut self, user_id: &str) {
        let mut emptied = Vec::new();
        for (room_id, room) in self.rooms.iter_mut() {
            if let Some(pos) = room.players.iter().position(|p| p == user_id) {
                room.players.remove(pos);
                if room.players.is_empty() {
                    emptied.push(room_id.clone());
                } else if room.host_id == user_id {
                    room.host_id = room.players[0].clone();
                    room.host_name = self
                        .sessions
                        .get(&room.players[0])
                        .cloned()
                        .unwrap_or_default();
                }
            }
        }
        for room_id in emptied {
            if let Some(mut room) = self.rooms.remove(&room_id) {
                if let Some(process) = room.process.as_mut() {
                    process.terminate();
                }
            }
        }
    }

    pub fn room_containing(&self, user_id: &str) -> Option<&str> {
        self.rooms
            .values()
            .find(|room| room.players.iter().any(|p| p == user_id))
            .map(|room| room.room_id.as_str())
    }
}

pub struct LobbyState(Mutex<LobbyData>);

impl Default for LobbyState {
    fn default() -> Self {
        Self(Mutex::new(LobbyData::new()))
    }
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&mut LobbyData) -> R) -> R {
        let mut data = self.0.lock().unwrap_or_else(|poison| poison.into_inner());
        f(&mut data)
    }
}
