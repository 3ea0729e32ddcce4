//! The Lobby's error taxonomy, the largest slice of the platform-wide tag
//! list since it owns session, room, and subprocess lifecycle.

#[derive(Debug, Clone, thiserror::Error)]
pub enum LobbyError {
    #[error("must log in first")]
    AuthRequired,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("a player with that username already exists")]
    DuplicateUser,
    #[error("this account is already logged in from another connection")]
    AlreadyLoggedIn,
    #[error("game not found")]
    NotFound,
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("room is not accepting players")]
    RoomBusy,
    #[error("you are not in any room")]
    NotInRoom,
    #[error("only the host can do that")]
    NotHost,
    #[error("game already started")]
    AlreadyStarted,
    #[error("no available ports in range 5000-5099")]
    NoPortsAvailable,
    #[error("game server crashed on startup: {0}")]
    GameServerCrashed(String),
    #[error("failed to spawn game server: {0}")]
    SpawnFailed(String),
    #[error(transparent)]
    Transport(#[from] protocol::WireError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl LobbyError {
    pub fn tag(&self) -> &'static str {
        match self {
            LobbyError::AuthRequired => "AuthRequired",
            LobbyError::InvalidCredentials => "InvalidCredentials",
            LobbyError::DuplicateUser => "DuplicateUser",
            LobbyError::AlreadyLoggedIn => "AlreadyLoggedIn",
            LobbyError::NotFound => "NotFound",
            LobbyError::RoomNotFound => "RoomNotFound",
            LobbyError::RoomFull => "RoomFull",
            LobbyError::RoomBusy => "RoomBusy",
            LobbyError::NotInRoom => "NotInRoom",
            LobbyError::NotHost => "NotHost",
            LobbyError::AlreadyStarted => "AlreadyStarted",
            LobbyError::NoPortsAvailable => "NoPortsAvailable",
            LobbyError::GameServerCrashed(_) => "GameServerCrashed",
            LobbyError::SpawnFailed(_) => "SpawnFailed",
            LobbyError::Transport(_) => "TransportError",
            LobbyError::Internal(_) => "InternalError",
        }
    }
}

impl From<catalog_client::ClientError> for LobbyError {
    fn from(err: catalog_client::ClientError) -> Self {
        LobbyError::Internal(err.to_string())
    }
}
