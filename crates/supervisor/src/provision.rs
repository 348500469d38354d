//! Directory provisioning and placeholder output seeding.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, access};
use tracing::{debug, info, warn};

use crate::error::{SupervisorError, SupervisorResult};

/// Mode applied once when an existing directory is not writable.
const REPAIR_MODE: u32 = 0o755;

const PLACEHOLDER_M3U: &str = "#EXTM3U\n\
#EXTINF:-1 tvg-id=\"default\" tvg-name=\"Refreshing\" group-title=\"System\",Refreshing\n\
# Source refresh in progress, reload later.\n\
https://example.com/default\n";

const PLACEHOLDER_TXT: &str = "# Source refresh in progress, reload later.\n\
Refreshing,https://example.com/default\n";

/// A directory the container needs, labelled for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectorySpec {
    pub path: PathBuf,
    pub purpose: String,
}

impl DirectorySpec {
    pub fn new(path: PathBuf, purpose: &str) -> Self {
        Self {
            path,
            purpose: purpose.to_string(),
        }
    }

    fn error(&self, detail: impl Into<String>) -> SupervisorError {
        SupervisorError::Provisioning {
            path: self.path.clone(),
            purpose: self.purpose.clone(),
            detail: detail.into(),
        }
    }
}

/// Make sure every directory exists and is writable.
///
/// Missing directories are created with their parents. An existing directory
/// that is not writable gets one permission repair before failing.
pub async fn ensure_directories(specs: &[DirectorySpec]) -> SupervisorResult<()> {
    for spec in specs {
        ensure_directory(spec).await?;
    }
    Ok(())
}

async fn ensure_directory(spec: &DirectorySpec) -> SupervisorResult<()> {
    match tokio::fs::metadata(&spec.path).await {
        Ok(meta) if !meta.is_dir() => return Err(spec.error("exists but is not a directory")),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(&spec.path)
                .await
                .map_err(|e| spec.error(format!("create: {e}")))?;
            info!(path = %spec.path.display(), purpose = %spec.purpose, "created directory");
        }
        Err(e) => return Err(spec.error(format!("stat: {e}"))),
    }

    if is_writable(&spec.path) {
        debug!(path = %spec.path.display(), "directory ok");
        return Ok(());
    }

    warn!(path = %spec.path.display(), "directory not writable, repairing permissions");
    tokio::fs::set_permissions(&spec.path, std::fs::Permissions::from_mode(REPAIR_MODE))
        .await
        .map_err(|e| spec.error(format!("not writable and chmod failed: {e}")))?;

    if is_writable(&spec.path) {
        info!(path = %spec.path.display(), "directory permissions repaired");
        Ok(())
    } else {
        Err(spec.error("not writable"))
    }
}

fn is_writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK | AccessFlags::X_OK).is_ok()
}

/// Write placeholder playlist files into `output_dir` if they are absent, so
/// the static server has something to hand out before the first refresh.
///
/// Returns the files that were created. Existing files are left alone.
pub async fn seed_placeholder_outputs(
    output_dir: &Path,
    basename: &str,
) -> SupervisorResult<Vec<PathBuf>> {
    let mut created = Vec::new();
    for (name, content) in [
        (format!("{basename}.m3u"), PLACEHOLDER_M3U),
        (format!("{basename}.txt"), PLACEHOLDER_TXT),
    ] {
        let path = output_dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            continue;
        }
        tokio::fs::write(&path, content).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        info!(path = %path.display(), "created placeholder output");
        created.push(path);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(root: &Path) -> Vec<DirectorySpec> {
        vec![
            DirectorySpec::new(root.join("config"), "config"),
            DirectorySpec::new(root.join("config/online"), "online sources"),
            DirectorySpec::new(root.join("www/output"), "output"),
        ]
    }

    fn snapshot(root: &Path) -> Vec<(PathBuf, u32)> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let entry = entry.unwrap();
                let meta = entry.metadata().unwrap();
                out.push((entry.path(), meta.permissions().mode()));
                if meta.is_dir() {
                    stack.push(entry.path());
                }
            }
        }
        out.sort();
        out
    }

    #[tokio::test]
    async fn creates_missing_directories_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        ensure_directories(&specs(dir.path())).await.unwrap();

        assert!(dir.path().join("config/online").is_dir());
        assert!(dir.path().join("www/output").is_dir());
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let specs = specs(dir.path());

        ensure_directories(&specs).await.unwrap();
        let before = snapshot(dir.path());
        ensure_directories(&specs).await.unwrap();
        assert_eq!(before, snapshot(dir.path()));
    }

    #[tokio::test]
    async fn file_in_the_way_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, b"not a dir").unwrap();

        let err = ensure_directories(&[DirectorySpec::new(path.clone(), "log")])
            .await
            .unwrap_err();
        match err {
            SupervisorError::Provisioning {
                path: p, purpose, ..
            } => {
                assert_eq!(p, path);
                assert_eq!(purpose, "log");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn uncreatable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let spec = DirectorySpec::new(blocker.join("child"), "data");
        let err = ensure_directories(&[spec]).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Provisioning { .. }));
    }

    #[tokio::test]
    async fn read_only_directory_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::create_dir(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o555)).unwrap();

        ensure_directories(&[DirectorySpec::new(path.clone(), "output")])
            .await
            .unwrap();
        assert!(is_writable(&path));
    }

    #[tokio::test]
    async fn placeholders_created_once_and_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();

        let created = seed_placeholder_outputs(dir.path(), "live").await.unwrap();
        assert_eq!(created.len(), 2);
        let m3u = std::fs::read_to_string(dir.path().join("live.m3u")).unwrap();
        assert!(m3u.starts_with("#EXTM3U"));

        std::fs::write(dir.path().join("live.m3u"), "#EXTM3U\nreal content\n").unwrap();
        let created = seed_placeholder_outputs(dir.path(), "live").await.unwrap();
        assert!(created.is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("live.m3u")).unwrap(),
            "#EXTM3U\nreal content\n"
        );
    }
}
