//! 文件元数据记录与按名加锁的持久化存储。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::atomic::AtomicFile;
use crate::config::DEFAULT_LOCK_WAIT_TIMEOUT_SECS;
use crate::locking::LockManager;
use crate::storage::is_valid_stored_name;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub stored_name: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub hidden_token: Option<String>,
    pub password_hash: Option<String>,
    pub is_password_protected: bool,
    pub view_limit: Option<u64>,
    pub view_count: u64,
}

impl FileRecord {
    /// 为没有元数据的存量文件构造默认记录（公开、无限制）。
    pub fn defaults_for_blob(
        stored_name: &str,
        display_name: String,
        size_bytes: u64,
        content_type: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stored_name: stored_name.to_string(),
            display_name,
            size_bytes,
            content_type,
            created_at,
            last_accessed_at: None,
            is_hidden: false,
            hidden_token: None,
            password_hash: None,
            is_password_protected: false,
            view_limit: None,
            view_count: 0,
        }
    }
}

/// 授权下载后的计数结果。
#[derive(Debug)]
pub enum ViewOutcome {
    /// 已计数，记录仍然存活。
    Counted(FileRecord),
    /// 本次计数达到上限，记录已在临界区内删除，调用方负责删除 blob。
    Expired(FileRecord),
    /// 记录已被并发请求删除。
    Missing,
}

#[derive(Debug)]
pub enum MetaError {
    InvalidName,
    Busy,
    Io(io::Error),
    Corrupt(serde_json::Error),
}

impl From<io::Error> for MetaError {
    fn from(err: io::Error) -> Self {
        MetaError::Io(err)
    }
}

/// 元数据存储：每条记录一个 JSON 文件，写入走原子替换，读改写按名串行化。
#[derive(Debug)]
pub struct MetaStore {
    root: PathBuf,
    locks: LockManager,
}

impl MetaStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: LockManager::new(),
        }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, stored_name: &str) -> Result<PathBuf, MetaError> {
        if !is_valid_stored_name(stored_name) {
            return Err(MetaError::InvalidName);
        }
        Ok(self.root.join(format!("{stored_name}.json")))
    }

    async fn lock_name(&self, stored_name: &str) -> Result<tokio::sync::OwnedMutexGuard<()>, MetaError> {
        self.locks
            .lock_name_with_timeout(
                stored_name,
                Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
            )
            .await
            .map_err(|_| MetaError::Busy)
    }

    async fn read_record(&self, path: &Path) -> Result<Option<FileRecord>, MetaError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(MetaError::Io(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(MetaError::Corrupt)
    }

    async fn write_record(&self, path: &Path, record: &FileRecord) -> Result<(), MetaError> {
        let bytes = serde_json::to_vec(record).map_err(MetaError::Corrupt)?;
        let mut atomic = AtomicFile::new(path).await?;
        if let Err(err) = atomic.file_mut().write_all(&bytes).await {
            atomic.cleanup().await;
            return Err(MetaError::Io(err));
        }
        atomic.finalize().await?;
        Ok(())
    }

    pub async fn get(&self, stored_name: &str) -> Result<Option<FileRecord>, MetaError> {
        let path = self.record_path(stored_name)?;
        self.read_record(&path).await
    }

    pub async fn insert(&self, record: &FileRecord) -> Result<(), MetaError> {
        let path = self.record_path(&record.stored_name)?;
        let _guard = self.lock_name(&record.stored_name).await?;
        self.write_record(&path, record).await
    }

    /// 删除记录，返回是否确实存在。
    pub async fn delete(&self, stored_name: &str) -> Result<bool, MetaError> {
        let path = self.record_path(stored_name)?;
        let _guard = self.lock_name(stored_name).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MetaError::Io(err)),
        }
    }

    /// 单次原子读改写。记录缺失时采用 `default`（存量文件自动建档），
    /// 两者都缺失返回 Ok(None)。
    pub async fn update<F>(
        &self,
        stored_name: &str,
        default: Option<FileRecord>,
        mutate: F,
    ) -> Result<Option<FileRecord>, MetaError>
    where
        F: FnOnce(&mut FileRecord),
    {
        let path = self.record_path(stored_name)?;
        let _guard = self.lock_name(stored_name).await?;
        let mut record = match self.read_record(&path).await? {
            Some(record) => record,
            None => match default {
                Some(record) => record,
                None => return Ok(None),
            },
        };
        mutate(&mut record);
        self.write_record(&path, &record).await?;
        Ok(Some(record))
    }

    /// 授权下载的副作用：计数加一、刷新访问时间，并在同一临界区内
    /// 判定浏览上限。达到上限时记录文件就地删除，保证并发请求中恰好
    /// 一个观察到过期转变。
    pub async fn register_view(
        &self,
        stored_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ViewOutcome, MetaError> {
        let path = self.record_path(stored_name)?;
        let _guard = self.lock_name(stored_name).await?;
        let mut record = match self.read_record(&path).await? {
            Some(record) => record,
            None => return Ok(ViewOutcome::Missing),
        };

        record.view_count += 1;
        record.last_accessed_at = Some(now);

        let expired = record
            .view_limit
            .is_some_and(|limit| record.view_count >= limit);
        if expired {
            fs::remove_file(&path).await.map_err(MetaError::Io)?;
            return Ok(ViewOutcome::Expired(record));
        }

        self.write_record(&path, &record).await?;
        Ok(ViewOutcome::Counted(record))
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<FileRecord>, MetaError> {
        for record in self.list_all().await.into_values() {
            if record.hidden_token.as_deref() == Some(token) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub async fn token_in_use(&self, token: &str) -> Result<bool, MetaError> {
        Ok(self.find_by_token(token).await?.is_some())
    }

    /// 生成未被占用的隐藏令牌，冲突时重掷；重掷耗尽返回 None。
    pub async fn allocate_hidden_token(&self) -> Result<Option<String>, MetaError> {
        for _ in 0..crate::config::TOKEN_REROLL_ATTEMPTS {
            let candidate = crate::naming::generate_hidden_token();
            if !self.token_in_use(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// 读取全部记录。单条损坏或读取失败只降级跳过，不影响整体。
    pub async fn list_all(&self) -> HashMap<String, FileRecord> {
        let mut records = HashMap::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(error = %err, "metadata directory unreadable, listing degrades to defaults");
                }
                return records;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "metadata directory iteration failed");
                    break;
                }
            };
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(stored_name) = file_name.strip_suffix(".json") else {
                continue;
            };
            match self.read_record(&entry.path()).await {
                Ok(Some(record)) => {
                    records.insert(stored_name.to_string(), record);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(name = %stored_name, error = ?err, "skipping unreadable record");
                }
            }
        }

        records
    }

    /// 列出全部记录文件名（含无法解析的），供后台清扫使用。
    pub async fn list_record_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err),
        };
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stored_name) = file_name.strip_suffix(".json") {
                names.push(stored_name.to_string());
            }
        }
        Ok(names)
    }
}
