//! The Gateway's error taxonomy, a subset of the platform-wide tags in
//! SPEC_FULL.md §7 relevant to developer auth and package management.

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("must log in first")]
    AuthRequired,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("a developer with that username already exists")]
    DuplicateUser,
    #[error("you do not own this game")]
    NotOwner,
    #[error("a game with that name already exists")]
    DuplicateName,
    #[error("game not found")]
    NotFound,
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error(transparent)]
    Transport(#[from] protocol::WireError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn tag(&self) -> &'static str {
        match self {
            GatewayError::AuthRequired => "AuthRequired",
            GatewayError::InvalidCredentials => "InvalidCredentials",
            GatewayError::DuplicateUser => "DuplicateUser",
            GatewayError::NotOwner => "NotOwner",
            GatewayError::DuplicateName => "DuplicateName",
            GatewayError::NotFound => "NotFound",
            GatewayError::InvalidPackage(_) => "InvalidPackage",
            GatewayError::Transport(_) => "TransportError",
            GatewayError::Internal(_) => "InternalError",
        }
    }
}

impl From<catalog_client::ClientError> for GatewayError {
    fn from(err: catalog_client::ClientError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
