//! Transactional file staging for `upload_game` / `update_game`: files land
//! in a fresh temporary directory first and are only promoted to their
//! final `uploads/<name>_<version>/` location after the package validates.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Creates `uploads_dir/temp_<short-uuid>/` and returns its path.
pub async fn new_staging_dir(uploads_dir: &Path) -> std::io::Result<PathBuf> {
    let short_id = uuid::Uuid::new_v4().simple().to_string();
    let dir = uploads_dir.join(format!("temp_{}", &short_id[..8]));
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Reads `file_count` `{path, size}` + file-frame pairs off `stream` and
/// writes each one under `staging_dir`, preserving the relative path the
/// client sent. Paths are POSIX-style per §4.6; components are sanitized so
/// a malicious `path` can't escape the staging directory.
pub async fn receive_files(
    stream: &mut TcpStream,
    staging_dir: &Path,
    file_count: u64,
) -> Result<(), protocol::WireError> {
    for _ in 0..file_count {
        let file_info: serde_json::Value = protocol::read_message(stream).await?;
        let rel_path = file_info
            .get("path")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        let safe_path = sanitize_relative_path(rel_path);
        let dest = staging_dir.join(&safe_path);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let len = protocol::read_file_len(stream).await?;
        let mut file = tokio::fs::File::create(&dest).await?;
        protocol::copy_file_payload(stream, &mut file, len).await?;
        file.flush().await?;
    }
    Ok(())
}

/// Strips any `..` or absolute-path components so the sender can never
/// write outside of `staging_dir`.
fn sanitize_relative_path(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        if let std::path::Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

/// Moves a validated staging directory into its final `<name>_<version>/`
/// home, replacing any stale directory of the same name.
pub async fn promote(staging_dir: &Path, final_dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(final_dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(final_dir).await?;
    }
    tokio::fs::rename(staging_dir, final_dir).await
}

/// Best-effort cleanup of a staging directory after a failed upload.
pub async fn purge(staging_dir: &Path) {
    let _ = tokio::fs::remove_dir_all(staging_dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_relative_path("../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(sanitize_relative_path("/abs/path"), PathBuf::from("abs/path"));
        assert_eq!(sanitize_relative_path("a/b/c.txt"), PathBuf::from("a/b/c.txt"));
    }

    #[tokio::test]
    async fn promote_replaces_stale_directory() {
        let base = tempfile::tempdir().unwrap();
        let staging = base.path().join("temp_1");
        let final_dir = base.path().join("chat_1.0");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        tokio::fs::write(staging.join("new.txt"), b"new").await.unwrap();
        tokio::fs::create_dir_all(&final_dir).await.unwrap();
        tokio::fs::write(final_dir.join("old.txt"), b"old").await.unwrap();

        promote(&staging, &final_dir).await.unwrap();

        assert!(tokio::fs::try_exists(final_dir.join("new.txt")).await.unwrap());
        assert!(!tokio::fs::try_exists(final_dir.join("old.txt")).await.unwrap());
    }
}
