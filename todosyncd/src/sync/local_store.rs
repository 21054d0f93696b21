use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use filetime::FileTime;
use thiserror::Error;
use todosync_core::{Item, ItemStatus};
use tokio::io::AsyncWriteExt;

use super::paths::{PathError, is_hidden_key, key_for_path, path_for_key};

const LOCAL_TRASH_DIR: &str = ".trash";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    #[error("failed to move to trash: {0}")]
    Trash(String),
}

/// One file of the local listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub key: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub size: u64,
}

impl LocalFile {
    pub fn to_item(&self, status: ItemStatus) -> Item {
        Item {
            key: self.key.clone(),
            status,
            created_at: self.created_at,
            modified_at: self.modified_at,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub created_at: i64,
    pub modified_at: i64,
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn list_files(&self) -> Result<Vec<LocalFile>, StoreError>;

    /// Resolves `key` to an existing regular file.
    async fn stat(&self, key: &str) -> Result<Option<LocalFile>, StoreError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Overwrites an existing file.
    async fn write(&self, key: &str, data: &[u8], times: FileTimes) -> Result<(), StoreError>;

    /// Creates a new file; fails with [`StoreError::AlreadyExists`] if one is there.
    async fn create(&self, key: &str, data: &[u8], times: FileTimes) -> Result<(), StoreError>;

    /// Reversible delete.
    async fn trash(&self, key: &str) -> Result<(), StoreError>;

    async fn create_folder(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashMode {
    /// Desktop trash of the current user.
    System,
    /// `.trash/` inside the store root.
    LocalFolder,
}

pub struct FsLocalStore {
    root: PathBuf,
    trash: TrashMode,
}

impl FsLocalStore {
    pub fn new(root: impl Into<PathBuf>, trash: TrashMode) -> Self {
        Self {
            root: root.into(),
            trash,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(path_for_key(&self.root, key)?)
    }

    async fn trash_locally(&self, key: &str, source: PathBuf) -> Result<(), StoreError> {
        let trash_root = self.root.join(LOCAL_TRASH_DIR);
        let mut target = path_for_key(&trash_root, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut attempt = 1u32;
        while tokio::fs::try_exists(&target).await? {
            target = path_for_key(&trash_root, &numbered_key(key, attempt))?;
            attempt += 1;
        }
        tokio::fs::rename(&source, &target).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn list_files(&self) -> Result<Vec<LocalFile>, StoreError> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(key) = key_for_path(&self.root, &path) else {
                    continue;
                };
                if is_hidden_key(&key) {
                    continue;
                }
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(path);
                } else if metadata.is_file() {
                    files.push(local_file(key, &metadata));
                }
            }
        }
        Ok(files)
    }

    async fn stat(&self, key: &str) -> Result<Option<LocalFile>, StoreError> {
        let path = self.path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(local_file(key.to_string(), &metadata))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key: &str, data: &[u8], times: FileTimes) -> Result<(), StoreError> {
        let path = self.path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        tokio::fs::write(&path, data).await?;
        set_times(path, times).await
    }

    async fn create(&self, key: &str, data: &[u8], times: FileTimes) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let mut file = match tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        set_times(path, times).await
    }

    async fn trash(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        match self.trash {
            TrashMode::System => tokio::task::spawn_blocking(move || trash::delete(&path))
                .await
                .map_err(io::Error::other)?
                .map_err(|err| StoreError::Trash(err.to_string())),
            TrashMode::LocalFolder => self.trash_locally(key, path).await,
        }
    }

    async fn create_folder(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        match tokio::fs::create_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn local_file(key: String, metadata: &Metadata) -> LocalFile {
    let modified_at = metadata.modified().map(millis).unwrap_or(0);
    let created_at = metadata.created().map(millis).unwrap_or(modified_at);
    LocalFile {
        key,
        created_at,
        modified_at,
        size: metadata.len(),
    }
}

pub(crate) fn millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Only the modification time can be set portably; creation time is left to the OS.
async fn set_times(path: PathBuf, times: FileTimes) -> Result<(), StoreError> {
    let mtime = FileTime::from_unix_time(
        times.modified_at.div_euclid(1000),
        (times.modified_at.rem_euclid(1000) * 1_000_000) as u32,
    );
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime))
        .await
        .map_err(io::Error::other)??;
    Ok(())
}

fn numbered_key(key: &str, n: u32) -> String {
    let (dir, name) = match key.rsplit_once('/') {
        Some((dir, name)) => (format!("{dir}/"), name),
        None => (String::new(), key),
    };
    if let Some((stem, ext)) = name.rsplit_once('.')
        && !stem.is_empty()
    {
        return format!("{dir}{stem} ({n}).{ext}");
    }
    format!("{dir}{name} ({n})")
}
