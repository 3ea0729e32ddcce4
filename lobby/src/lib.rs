//! The Lobby / Matchmaker: player session lifecycle, room state machine,
//! and game server subprocess supervision, backed by the Catalog Store
//! over `catalog-client`.

pub mod auth;
pub mod error;
pub mod handler;
pub mod ports;
pub mod process;
pub mod state;

pub use error::LobbyError;
pub use handler::{LobbyContext, serve_connection};
