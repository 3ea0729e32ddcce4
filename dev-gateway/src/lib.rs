//! The Developer Gateway: developer registration/login and game package
//! upload, update, and removal, backed by the Catalog Store over
//! `catalog-client`.

pub mod auth;
pub mod error;
pub mod handler;
pub mod package;

pub use error::GatewayError;
pub use handler::serve_connection;
