//! File-backed medium: one file per key.

use crate::{DurableMedium, StorageError, StorageResult};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stores each key as `<dir>/<key>.json`, replacing files atomically.
#[derive(Debug, Clone)]
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    /// Use `dir` as the backing directory. Nothing touches the disk until the
    /// first operation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl DurableMedium for FileMedium {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        write_atomic(&self.dir, &path, value.as_bytes())?;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Write through a sibling temp file and rename over the target, so readers
/// see either the old or the new snapshot.
fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(
        ".{}.{}.{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        std::process::id(),
        nanos
    ));

    let result = (|| -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = fs::File::open(dir) {
            let _ = parent_dir.sync_all();
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let medium = FileMedium::new(dir.path().join("queue"));

        assert!(medium.get("pending_messages_queue").unwrap().is_none());
        medium.set("pending_messages_queue", "[]").unwrap();
        assert_eq!(
            medium.get("pending_messages_queue").unwrap().as_deref(),
            Some("[]")
        );
        assert!(medium.delete("pending_messages_queue").unwrap());
        assert!(!medium.delete("pending_messages_queue").unwrap());
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let medium = FileMedium::new(dir.path());
        medium.set("k", "one").unwrap();
        medium.set("k", "two").unwrap();

        assert_eq!(medium.get("k").unwrap().as_deref(), Some("two"));
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k.json".to_string()]);
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let medium = FileMedium::new(dir.path());
        assert!(matches!(
            medium.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(medium.get(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn unusable_directory_fails_writes() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file in the way").unwrap();

        let medium = FileMedium::new(&blocker);
        assert!(matches!(medium.set("k", "v"), Err(StorageError::Io(_))));
    }
}
