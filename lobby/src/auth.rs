//! Player credential handling and session admission. Mirrors
//! `dev-gateway`'s `auth.rs` but keyed on `account_type = "player"`, and
//! additionally enforces the Lobby's single-session-per-account rule.

use crate::error::LobbyError;
use crate::state::LobbyState;
use catalog_client::{CatalogClient, Document};
use serde_json::json;
use sha2::{Digest, Sha256};

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub async fn register(client: &CatalogClient, username: &str, password: &str) -> Result<(), LobbyError> {
    let mut query = Document::new();
    query.insert("username".into(), json!(username));
    query.insert("account_type".into(), json!("player"));

    match client.find_one("User", query).await {
        Ok(_) => return Err(LobbyError::DuplicateUser),
        Err(e) if CatalogClient::is_not_found(&e) => {}
        Err(e) => return Err(e.into()),
    }

    let mut doc = Document::new();
    doc.insert("username".into(), json!(username));
    doc.insert("password_hash".into(), json!(hash_password(password)));
    doc.insert("account_type".into(), json!("player"));
    client.insert("User", doc).await?;
    Ok(())
}

/// Verifies credentials, then atomically admits the session: fails with
/// `AlreadyLoggedIn` if this user_id already has a live connection.
/// Credential lookup and the admission check happen in that order, so a
/// failed-password attempt never disturbs an existing session.
pub async fn login(client: &CatalogClient, state: &LobbyState, username: &str, password: &str) -> Result<Document, LobbyError> {
    let mut query = Document::new();
    query.insert("username".into(), json!(username));
    query.insert("account_type".into(), json!("player"));

    let user = match client.find_one("User", query).await {
        Ok(user) => user,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(LobbyError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };

    let expected = user.get("password_hash").and_then(|v| v.as_str()).unwrap_or("");
    if expected != hash_password(password) {
        return Err(LobbyError::InvalidCredentials);
    }

    let user_id = user.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    state.with_data(|data| {
        if data.sessions.contains_key(&user_id) {
            return Err(LobbyError::AlreadyLoggedIn);
        }
        data.sessions.insert(user_id.clone(), username.to_string());
        Ok(())
    })?;

    Ok(user)
}

/// Removes the session and evicts the user from any room it occupies.
pub fn cleanup_session(state: &LobbyState, user_id: &str) {
    state.with_data(|data| {
        data.sessions.remove(user_id);
        data.remove_user_from_all_rooms(user_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_lower_hex() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
