//! Credential handling: SHA-256 hex digest of the plaintext password (§9
//! acknowledges this is weak and keeps it anyway, for wire compatibility).

use crate::error::GatewayError;
use catalog_client::{CatalogClient, Document};
use serde_json::json;
use sha2::{Digest, Sha256};

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Registers a new developer. Fails with `DuplicateUser` if a developer
/// with this username already exists — `(username, account_type)` is the
/// uniqueness key, so a player with the same username is unaffected.
pub async fn register(client: &CatalogClient, username: &str, password: &str) -> Result<Document, GatewayError> {
    let mut query = Document::new();
    query.insert("username".into(), json!(username));
    query.insert("account_type".into(), json!("developer"));

    match client.find_one("User", query).await {
        Ok(_) => return Err(GatewayError::DuplicateUser),
        Err(e) if CatalogClient::is_not_found(&e) => {}
        Err(e) => return Err(e.into()),
    }

    let mut doc = Document::new();
    doc.insert("username".into(), json!(username));
    doc.insert("password_hash".into(), json!(hash_password(password)));
    doc.insert("account_type".into(), json!("developer"));
    Ok(client.insert("User", doc).await?)
}

/// Verifies credentials and returns the matching `User` document.
pub async fn login(client: &CatalogClient, username: &str, password: &str) -> Result<Document, GatewayError> {
    let mut query = Document::new();
    query.insert("username".into(), json!(username));
    query.insert("account_type".into(), json!("developer"));

    let user = match client.find_one("User", query).await {
        Ok(user) => user,
        Err(e) if CatalogClient::is_not_found(&e) => return Err(GatewayError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };

    let expected = user.get("password_hash").and_then(|v| v.as_str()).unwrap_or("");
    if expected != hash_password(password) {
        return Err(GatewayError::InvalidCredentials);
    }
    Ok(user)
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
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_passwords_hash_differently() {
        assert_ne!(hash_password("a"), hash_password("b"));
    }
}
