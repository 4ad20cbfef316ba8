use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_stored_name(name) {
            return Err(StorageError::InvalidName);
        }
        Ok(self.root.join(name))
    }

    pub async fn open_blob(&self, name: &str) -> Result<(File, std::fs::Metadata), StorageError> {
        let target = self.blob_path(name)?;
        let file = File::open(&target).await?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(StorageError::InvalidName);
        }
        Ok((file, metadata))
    }

    pub async fn stat_blob(&self, name: &str) -> Result<std::fs::Metadata, StorageError> {
        let target = self.blob_path(name)?;
        let metadata = fs::metadata(&target).await?;
        if metadata.is_dir() {
            return Err(StorageError::InvalidName);
        }
        Ok(metadata)
    }

    pub async fn blob_exists(&self, name: &str) -> Result<bool, StorageError> {
        let target = self.blob_path(name)?;
        match fs::metadata(&target).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    pub async fn delete_blob(&self, name: &str) -> Result<(), StorageError> {
        let target = self.blob_path(name)?;
        fs::remove_file(target).await?;
        Ok(())
    }

    pub async fn list_blobs(&self) -> Result<Vec<BlobEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_valid_stored_name(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

            entries.push(BlobEntry {
                name,
                size: metadata.len(),
                created,
                modified,
            });
        }

        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        Ok(entries)
    }
}

/// 存储名合法性：扁平目录内的单段文件名，点号开头的名字保留给内部使用。
pub fn is_valid_stored_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.starts_with('.') {
        return false;
    }
    !name
        .chars()
        .any(|ch| ch == '/' || ch == '\\' || ch.is_control())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct BlobEntry {
    pub name: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::{Storage, StorageError, is_valid_stored_name};
    use tempfile::tempdir;

    #[test]
    fn stored_name_rejects_traversal_and_reserved() {
        assert!(!is_valid_stored_name(""));
        assert!(!is_valid_stored_name(".."));
        assert!(!is_valid_stored_name("../etc/passwd"));
        assert!(!is_valid_stored_name("a/b.txt"));
        assert!(!is_valid_stored_name("a\\b.txt"));
        assert!(!is_valid_stored_name(".gitkeep"));
        assert!(!is_valid_stored_name(".meta"));
        assert!(!is_valid_stored_name("bad\u{0}name"));
        assert!(is_valid_stored_name("report_1712345678901.pdf"));
    }

    #[tokio::test]
    async fn list_blobs_skips_reserved_entries() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        storage.ensure_root().await.expect("ensure root");

        std::fs::write(temp.path().join("a.txt"), b"a").expect("write blob");
        std::fs::write(temp.path().join(".gitkeep"), b"").expect("write placeholder");
        std::fs::create_dir_all(temp.path().join(".meta")).expect("meta dir");
        std::fs::write(temp.path().join(".meta").join("a.txt.json"), b"{}").expect("write record");

        let entries = storage.list_blobs().await.expect("list");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn open_blob_missing_maps_to_not_found() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        storage.ensure_root().await.expect("ensure root");

        let result = storage.open_blob("missing.txt").await;
        match result {
            Err(StorageError::Io(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("expected io not-found error"),
        }
    }

    #[tokio::test]
    async fn blob_path_rejects_invalid_names() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());
        assert!(matches!(
            storage.blob_path("../escape.txt"),
            Err(StorageError::InvalidName)
        ));
    }
}
