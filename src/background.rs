//! 孤儿记录与过期临时文件的后台清扫任务。

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{info, warn};

use crate::config::{MAINTENANCE_INTERVAL_SECS, TEMP_FILE_TTL_SECS};
use crate::records::MetaStore;
use crate::storage::Storage;

/// 启动后台维护任务（孤儿记录清理与原子写临时文件清理）。
pub fn spawn_background_tasks(storage: Arc<Storage>, meta: Arc<MetaStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = sweep_orphan_records(&storage, &meta).await {
                warn!(error = %err, "orphan record sweep failed");
            }
            for dir in [storage.root_path(), meta.root_path()] {
                if let Err(err) = sweep_stale_temp_files(dir).await {
                    warn!(path = ?dir, error = %err, "stale temp sweep failed");
                }
            }
        }
    });
}

/// 删除 blob 已不存在的元数据记录。记录先于 blob 删除的正常流程不会
/// 留下孤儿，这里兜住崩溃或竞态遗留。
async fn sweep_orphan_records(storage: &Storage, meta: &MetaStore) -> std::io::Result<()> {
    for name in meta.list_record_names().await? {
        let exists = match storage.blob_exists(&name).await {
            Ok(exists) => exists,
            Err(_) => continue,
        };
        if exists {
            continue;
        }
        match meta.delete(&name).await {
            Ok(true) => info!(name, "removed orphan record without blob"),
            Ok(false) => {}
            Err(err) => warn!(name, error = ?err, "orphan record removal failed"),
        }
    }
    Ok(())
}

/// 清理中断的原子写遗留的 `.<name>.tmp.<uuid>` 临时文件。
async fn sweep_stale_temp_files(dir: &Path) -> std::io::Result<()> {
    let ttl = Duration::from_secs(TEMP_FILE_TTL_SECS);
    let now = SystemTime::now();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with('.') || !name.contains(".tmp.") {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = match metadata.modified() {
            Ok(value) => value,
            Err(_) => continue,
        };
        let age = match now.duration_since(modified) {
            Ok(value) => value,
            Err(_) => continue,
        };
        if age >= ttl {
            let path = entry.path();
            if let Err(err) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %err, "failed to remove stale temp file");
            } else {
                info!(path = ?path, "removed stale temp file");
            }
        }
    }

    Ok(())
}
