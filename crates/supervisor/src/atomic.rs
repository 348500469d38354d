use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` through a sibling temp file and a rename.
///
/// Readers see either the old or the new content. An existing file's
/// permissions carry over to the replacement.
pub async fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = sibling_tmp(path);
    tokio::fs::write(&tmp, contents).await?;
    if let Ok(meta) = tokio::fs::metadata(path).await {
        tokio::fs::set_permissions(&tmp, meta.permissions()).await?;
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("unnamed"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[tokio::test]
    async fn replaces_content_and_keeps_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nginx.conf");
        std::fs::write(&path, "listen 80;\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        write_file(&path, b"listen 12345;\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "listen 12345;\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!dir.path().join("nginx.conf.tmp").exists());
    }

    #[tokio::test]
    async fn missing_parent_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_file(&dir.path().join("absent/file"), b"x").await.is_err());
    }
}
