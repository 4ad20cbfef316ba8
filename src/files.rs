//! 文件列表、下载、删除与统计处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use chrono::Utc;
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::auth::{self, AuthConfig};
use crate::engine;
use crate::error::ApiError;
use crate::listing::{self, ListingEntry};
use crate::records::{MetaStore, ViewOutcome};
use crate::storage::Storage;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    pub hidden: Option<bool>,
    pub admin_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DownloadQuery {
    pub token: Option<String>,
    pub password: Option<String>,
    pub admin_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdminQuery {
    pub admin_key: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}

/// 列出可见文件。`hidden=true` 仅限管理员。
pub async fn list_files(
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
) -> Result<JsonResponse<Vec<ListingEntry>>, ApiError> {
    let is_admin = auth::is_admin(&headers, query.admin_key.as_deref(), &auth_config);
    let show_hidden = query.hidden.unwrap_or(false);
    engine::authorize_listing(show_hidden, is_admin)?;

    let blobs = storage.list_blobs().await?;
    let records = meta.list_all().await;
    let entries = listing::build_listing(&blobs, &records, is_admin, show_hidden);
    info!(count = entries.len(), show_hidden, "list files");
    Ok(JsonResponse(entries))
}

/// 下载文件：先准入，再计数，达到浏览上限时本次请求负责删除。
pub async fn download_file(
    Path(name): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
) -> Result<Response, ApiError> {
    let is_admin = auth::is_admin(&headers, query.admin_key.as_deref(), &auth_config);
    let (file, metadata) = storage.open_blob(&name).await?;
    let record = meta.get(&name).await?;
    engine::authorize_download(
        record.as_ref(),
        query.token.as_deref(),
        query.password.as_deref(),
        is_admin,
    )?;

    let content_type = record
        .as_ref()
        .map(|record| record.content_type.clone())
        .unwrap_or_else(|| {
            mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    // 此处已持有打开的文件句柄，之后的 unlink 不影响本次响应流。
    if record.is_some() {
        match meta.register_view(&name, Utc::now()).await? {
            ViewOutcome::Expired(expired) => {
                if let Err(err) = storage.delete_blob(&name).await {
                    warn!(name, error = ?err, "view-limited blob removal failed");
                }
                info!(name, views = expired.view_count, "view limit reached, file removed");
            }
            ViewOutcome::Counted(_) => {}
            ViewOutcome::Missing => {}
        }
    }

    info!(name, size = metadata.len(), "download file");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

/// 删除文件：先删记录再删 blob，避免留下无 blob 的记录。
pub async fn delete_file(
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
) -> Result<JsonResponse<MessageResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;

    if !storage.blob_exists(&name).await? {
        return Err(ApiError::NotFound("file not found".into()));
    }
    meta.delete(&name).await?;
    storage.delete_blob(&name).await?;
    info!(name, "delete file");
    Ok(JsonResponse(MessageResponse {
        message: format!("File {name} deleted successfully"),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsResponse {
    total_files: u64,
    total_size: u64,
    average_size: f64,
    files: Vec<StatsEntry>,
}

#[derive(Serialize)]
pub(crate) struct StatsEntry {
    name: String,
    size: u64,
    created: Option<String>,
}

/// 汇总存储统计。明细列表不含隐藏文件，避免公开端点泄露名字。
pub async fn get_stats(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
) -> Result<JsonResponse<StatsResponse>, ApiError> {
    let blobs = storage.list_blobs().await?;
    let records = meta.list_all().await;

    let total_files = blobs.len() as u64;
    let total_size: u64 = blobs.iter().map(|blob| blob.size).sum();
    let average_size = if total_files > 0 {
        total_size as f64 / total_files as f64
    } else {
        0.0
    };
    let files = blobs
        .iter()
        .filter(|blob| {
            !records
                .get(&blob.name)
                .is_some_and(|record| record.is_hidden)
        })
        .map(|blob| StatsEntry {
            name: blob.name.clone(),
            size: blob.size,
            created: blob.created.map(|value| value.to_rfc3339()),
        })
        .collect();

    Ok(JsonResponse(StatsResponse {
        total_files,
        total_size,
        average_size,
        files,
    }))
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

/// 存活探针。
pub async fn health() -> JsonResponse<HealthResponse> {
    JsonResponse(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    })
}
