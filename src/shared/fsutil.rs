use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `content` to `path` through a temp file in the same directory so a
/// crash never leaves a half-written file behind.
pub fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(content.as_bytes())?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e.error))?;
    Ok(())
}

/// Copy `path` to `path` + `suffix` if it exists. Returns the backup path.
pub fn backup_file(path: &Path, suffix: &str) -> anyhow::Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    let backup = PathBuf::from(name);
    std::fs::copy(path, &backup)?;
    Ok(Some(backup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("environments").join("dev.tfvars");
        write_atomic(&path, "location = \"eastus\"\n").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "location = \"eastus\"\n"
        );
    }

    #[test]
    fn test_backup_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        assert_eq!(backup_file(&path, ".backup").unwrap(), None);

        std::fs::write(&path, "A=1\n").unwrap();
        let backup = backup_file(&path, ".backup").unwrap().unwrap();
        assert_eq!(backup, dir.path().join(".env.backup"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "A=1\n");
    }
}
