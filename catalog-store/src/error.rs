//! Error tags returned by the Catalog Store. These are the literal strings
//! the spec requires (`"Not found"`, `"Invalid request"`), not the
//! `UpperCamelCase` taxonomy used by the Gateway and Lobby — the Catalog is
//! the lowest layer and the higher tiers translate its failures into their
//! own tags (typically `InternalError`) before they reach a client.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// `find_one` matched nothing.
    NotFound,
    /// The request named a collection the store doesn't know about, or was
    /// otherwise structurally malformed (missing `query`/`update`/`data`).
    InvalidRequest,
    /// The in-memory mutation was rolled back because the durable write
    /// failed.
    Internal(String),
}

impl CatalogError {
    pub fn tag(&self) -> &'static str {
        match self {
            CatalogError::NotFound => "Not found",
            CatalogError::InvalidRequest => "Invalid request",
            CatalogError::Internal(_) => "InternalError",
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::NotFound => write!(f, "Not found"),
            CatalogError::InvalidRequest => write!(f, "Invalid request"),
            CatalogError::Internal(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

impl std::error::Error for CatalogError {}
