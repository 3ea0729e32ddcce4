//! The package manifest contract (`game_info.json`) and package validation.
//!
//! A package directory is valid iff it contains a `game_info.json` parseable
//! with the required fields, and both `server.entry_point` and
//! `client.entry_point` name files that exist inside the package directory.
//! The bundled game executables themselves are opaque to this crate; we only
//! ever look at the manifest and check that the paths it promises are real.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = "game_info.json";

/// One side (server or client) of the manifest's launch instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub start_command: String,
    pub entry_point: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// The full contents of `game_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub min_players: u32,
    pub max_players: u32,
    pub server: ProcessSpec,
    pub client: ProcessSpec,
}

/// The first validation failure encountered, as a human-readable string (the
/// spec requires the *first* violation, not an exhaustive list).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing {MANIFEST_FILE_NAME}")]
    ManifestMissing,
    #[error("{MANIFEST_FILE_NAME} is not valid JSON: {0}")]
    ManifestNotJson(String),
    #[error("server.entry_point {0:?} does not exist in the package")]
    ServerEntryPointMissing(String),
    #[error("client.entry_point {0:?} does not exist in the package")]
    ClientEntryPointMissing(String),
    #[error("min_players must be at least 1")]
    MinPlayersTooLow,
    #[error("max_players ({max_players}) must be >= min_players ({min_players})")]
    MaxPlayersBelowMin { min_players: u32, max_players: u32 },
}

/// Reads and parses `game_info.json` from `package_dir`, without checking
/// entry points. Useful when only the manifest's fields are needed (e.g.
/// Lobby reading a Version's manifest to float `version` or build the
/// subprocess command line).
pub fn read_manifest(package_dir: &Path) -> Result<GameManifest, ValidationError> {
    let manifest_path = package_dir.join(MANIFEST_FILE_NAME);
    let raw = std::fs::read_to_string(&manifest_path).map_err(|_| ValidationError::ManifestMissing)?;
    serde_json::from_str(&raw).map_err(|e| ValidationError::ManifestNotJson(e.to_string()))
}

/// Validates a staged package directory per §4.6, returning the first
/// violation encountered. Order matches the spec: manifest presence and
/// parseability, then server entry point, then client entry point, then the
/// player-count sanity checks carried over from the original implementation.
pub fn validate_package(package_dir: &Path) -> Result<GameManifest, ValidationError> {
    let manifest = read_manifest(package_dir)?;

    let server_entry = package_dir.join(&manifest.server.entry_point);
    if !server_entry.is_file() {
        return Err(ValidationError::ServerEntryPointMissing(
            manifest.server.entry_point.clone(),
        ));
    }

    let client_entry = package_dir.join(&manifest.client.entry_point);
    if !client_entry.is_file() {
        return Err(ValidationError::ClientEntryPointMissing(
            manifest.client.entry_point.clone(),
        ));
    }

    if manifest.min_players < 1 {
        return Err(ValidationError::MinPlayersTooLow);
    }
    if manifest.max_players < manifest.min_players {
        return Err(ValidationError::MaxPlayersBelowMin {
            min_players: manifest.min_players,
            max_players: manifest.max_players,
        });
    }

    Ok(manifest)
}

/// Substitutes `{PORT}` and `{NUM_PLAYERS}` in a server's argument list.
pub fn server_arguments(spec: &ProcessSpec, port: u16, num_players: u32) -> Vec<String> {
    spec.arguments
        .iter()
        .map(|arg| {
            arg.replace("{PORT}", &port.to_string())
                .replace("{NUM_PLAYERS}", &num_players.to_string())
        })
        .collect()
}

/// Substitutes `{HOST}`, `{PORT}` and `{USERNAME}` in a client's argument
/// list. The platform never spawns the client itself (clients run on the
/// player's machine); this exists so client-side tooling built against this
/// crate can reuse the same substitution rules.
pub fn client_arguments(spec: &ProcessSpec, host: &str, port: u16, username: &str) -> Vec<String> {
    spec.arguments
        .iter()
        .map(|arg| {
            arg.replace("{HOST}", host)
                .replace("{PORT}", &port.to_string())
                .replace("{USERNAME}", username)
        })
        .collect()
}

/// The absolute path to a package's entry point, joined against the package
/// directory. Used by the subprocess supervisor to build the `Command`.
pub fn server_entry_point(package_dir: &Path, manifest: &GameManifest) -> PathBuf {
    package_dir.join(&manifest.server.entry_point)
}

/// Every file under `package_dir`, as paths relative to it, in depth-first
/// walk order. Used to build the `file_count` + per-file upload sequence.
pub fn list_package_files(package_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(package_dir, package_dir, &mut files)?;
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else {
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, json: &str) {
        fs::write(dir.join(MANIFEST_FILE_NAME), json).unwrap();
    }

    fn valid_manifest_json() -> String {
        serde_json::json!({
            "name": "chat",
            "version": "1.0",
            "description": "a chat room",
            "min_players": 2,
            "max_players": 4,
            "server": {"start_command": "python3", "entry_point": "game_server.py", "arguments": ["{PORT}", "{NUM_PLAYERS}"]},
            "client": {"start_command": "python3", "entry_point": "game_client.py", "arguments": ["{HOST}", "{PORT}", "{USERNAME}"]},
        })
        .to_string()
    }

    #[test]
    fn missing_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_package(dir.path()).unwrap_err();
        assert_eq!(err, ValidationError::ManifestMissing);
    }

    #[test]
    fn missing_server_entry_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &valid_manifest_json());
        fs::write(dir.path().join("game_client.py"), "client").unwrap();
        let err = validate_package(dir.path()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ServerEntryPointMissing("game_server.py".into())
        );
    }

    #[test]
    fn missing_client_entry_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &valid_manifest_json());
        fs::write(dir.path().join("game_server.py"), "server").unwrap();
        let err = validate_package(dir.path()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ClientEntryPointMissing("game_client.py".into())
        );
    }

    #[test]
    fn fully_valid_package_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &valid_manifest_json());
        fs::write(dir.path().join("game_server.py"), "server").unwrap();
        fs::write(dir.path().join("game_client.py"), "client").unwrap();
        let manifest = validate_package(dir.path()).unwrap();
        assert_eq!(manifest.name, "chat");
    }

    #[test]
    fn max_below_min_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::json!({
            "name": "chat", "version": "1.0", "description": "d",
            "min_players": 4, "max_players": 2,
            "server": {"start_command": "python3", "entry_point": "s.py", "arguments": []},
            "client": {"start_command": "python3", "entry_point": "c.py", "arguments": []},
        })
        .to_string();
        write_manifest(dir.path(), &json);
        fs::write(dir.path().join("s.py"), "").unwrap();
        fs::write(dir.path().join("c.py"), "").unwrap();
        let err = validate_package(dir.path()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MaxPlayersBelowMin {
                min_players: 4,
                max_players: 2
            }
        );
    }

    #[test]
    fn list_package_files_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &valid_manifest_json());
        fs::write(dir.path().join("game_server.py"), "server").unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/sound.wav"), "x").unwrap();

        let files = list_package_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.contains(&PathBuf::from("assets/sound.wav")));
    }

    #[test]
    fn argument_substitution_fills_placeholders() {
        let spec = ProcessSpec {
            start_command: "python3".into(),
            entry_point: "s.py".into(),
            arguments: vec!["{PORT}".into(), "--players={NUM_PLAYERS}".into()],
        };
        let args = server_arguments(&spec, 5001, 3);
        assert_eq!(args, vec!["5001", "--players=3"]);
    }
}
