//! Game server subprocess supervision (§4.4.4): spawn from the manifest's
//! `server` spec with substituted arguments, working directory set to the
//! package directory, stdin closed, stdout+stderr merged into a log file,
//! then a 300 ms early-crash window before declaring success.
//!
//! Entirely synchronous — callers run this inside `spawn_blocking` so the
//! 300 ms sleep never stalls the async runtime, and the Lobby's
//! `std::sync::Mutex` is never held while this runs.

use crate::error::LobbyError;
use crate::state::GameProcess;
use game_manifest::GameManifest;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

pub fn log_path(logs_dir: &Path, port: u16, room_id: &str) -> PathBuf {
    logs_dir.join(format!("game_{port}_{room_id}.log"))
}

/// Spawns the server process and blocks for the early-crash window.
/// Returns `GameServerCrashed` if the process has already exited by the
/// time the window elapses.
pub fn spawn_game_server(
    package_dir: &Path,
    manifest: &GameManifest,
    port: u16,
    num_players: u32,
    log_file_path: &Path,
) -> Result<GameProcess, LobbyError> {
    let args = game_manifest::server_arguments(&manifest.server, port, num_players);
    let server_entry = game_manifest::server_entry_point(package_dir, manifest);

    let log_file = std::fs::File::create(log_file_path)
        .map_err(|e| LobbyError::SpawnFailed(format!("could not create log file: {e}")))?;
    let log_file_for_stderr = log_file
        .try_clone()
        .map_err(|e| LobbyError::SpawnFailed(format!("could not duplicate log handle: {e}")))?;

    let child = Command::new(&manifest.server.start_command)
        .arg(&server_entry)
        .args(&args)
        .current_dir(package_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_for_stderr))
        .spawn()
        .map_err(|e| LobbyError::SpawnFailed(e.to_string()))?;

    let mut process = GameProcess { child, port };

    std::thread::sleep(Duration::from_millis(300));
    if process.poll_exited() {
        return Err(LobbyError::GameServerCrashed(format!(
            "game server exited during the {}ms startup window",
            300
        )));
    }

    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_manifest::ProcessSpec;

    fn manifest_with_command(command: &str) -> GameManifest {
        GameManifest {
            name: "probe".into(),
            version: "1.0".into(),
            description: "".into(),
            min_players: 1,
            max_players: 1,
            server: ProcessSpec {
                start_command: command.into(),
                entry_point: "noop".into(),
                arguments: vec![],
            },
            client: ProcessSpec {
                start_command: command.into(),
                entry_point: "noop".into(),
                arguments: vec![],
            },
        }
    }

    #[test]
    fn crashing_process_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("noop"), "").unwrap();
        let manifest = manifest_with_command("false");
        let log_path = dir.path().join("log.txt");

        let err = spawn_game_server(dir.path(), &manifest, 5000, 1, &log_path).unwrap_err();
        assert!(matches!(err, LobbyError::GameServerCrashed(_)));
    }

    #[test]
    fn long_running_process_survives_the_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("noop"), "").unwrap();
        let manifest = manifest_with_command("sleep");
        let mut spec = manifest.clone();
        spec.server.arguments = vec!["5".into()];
        let log_path = dir.path().join("log.txt");

        let mut process = spawn_game_server(dir.path(), &spec, 5000, 1, &log_path).unwrap();
        assert!(!process.poll_exited());
        process.terminate();
    }
}
