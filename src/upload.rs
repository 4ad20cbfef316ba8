//! 管理员多文件上传处理器。

use axum::extract::{Extension, Multipart, Query};
use axum::http::{HeaderMap, header};
use axum::response::Json as JsonResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::atomic::AtomicFile;
use crate::auth::{self, AuthConfig};
use crate::config::{ALLOWED_EXTENSIONS, STORED_NAME_RETRY_ATTEMPTS};
use crate::error::ApiError;
use crate::files::AdminQuery;
use crate::naming;
use crate::password;
use crate::records::{FileRecord, MetaStore};
use crate::storage::Storage;

#[derive(Debug)]
pub struct UploadConfig {
    pub max_total_size: u64,
}

/// 整批共用的上传选项，表单字段可能出现在文件之后。
#[derive(Default)]
struct UploadControls {
    is_hidden: bool,
    view_limit: Option<u64>,
    password: Option<String>,
}

/// 已落盘、等待建档的文件。
struct StagedFile {
    original_name: String,
    stored_name: String,
    size: u64,
    content_type: String,
    hash: String,
    uploaded_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadedFile {
    pub original_name: String,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub upload_time: String,
    pub hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    pub message: String,
    pub files: Vec<UploadedFile>,
    pub total_size: u64,
}

fn extension_allowed(name: &str) -> bool {
    naming::extension(name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// 派生未被占用的存储名。同一毫秒内的并发冲突通过小睡重试化解。
async fn allocate_stored_name(storage: &Storage, display_name: &str) -> Result<String, ApiError> {
    for _ in 0..STORED_NAME_RETRY_ATTEMPTS {
        let Some(candidate) = naming::derive_stored_name(display_name, Utc::now()) else {
            return Err(ApiError::BadRequest("invalid file name".into()));
        };
        if !storage.blob_exists(&candidate).await? {
            return Ok(candidate);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    Err(ApiError::Conflict(
        "could not allocate a unique stored name".into(),
    ))
}

/// 上传一批文件：逐个流式落盘，批次读完后统一建档。
/// 建档失败时回滚尚无记录的 blob，不留下无 blob 的记录。
pub async fn upload_files(
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;

    // 声明长度超限的请求不写任何字节
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        && upload.max_total_size > 0
        && length > upload.max_total_size
    {
        return Err(ApiError::BadRequest("upload size exceeds limit".into()));
    }

    let mut staged: Vec<StagedFile> = Vec::new();
    let mut controls = UploadControls::default();
    let mut saw_file_field = false;
    let mut total_written: u64 = 0;

    let stream_phase: Result<(), ApiError> = async {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::BadRequest(err.to_string()))?
        {
            let field_name = field.name().unwrap_or_default().to_string();
            match field_name.as_str() {
                "files" | "files[]" => {
                    saw_file_field = true;
                    let Some(raw_name) = field.file_name().map(str::to_string) else {
                        continue;
                    };
                    if raw_name.is_empty() {
                        continue;
                    }
                    let Some(display_name) = naming::sanitize_display_name(&raw_name) else {
                        warn!(name = raw_name, "skipping file with unusable name");
                        continue;
                    };
                    if !extension_allowed(&display_name) {
                        warn!(name = display_name, "skipping file with disallowed extension");
                        continue;
                    }

                    let content_type = field
                        .content_type()
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            mime_guess::from_path(&display_name)
                                .first_or_octet_stream()
                                .essence_str()
                                .to_string()
                        });
                    let stored_name = allocate_stored_name(&storage, &display_name).await?;
                    let target = storage.blob_path(&stored_name)?;

                    let mut atomic = AtomicFile::new(&target)
                        .await
                        .map_err(|err| ApiError::Internal(err.to_string()))?;
                    let mut hasher = Sha256::new();
                    let mut size: u64 = 0;
                    loop {
                        let chunk = match field.chunk().await {
                            Ok(Some(chunk)) => chunk,
                            Ok(None) => break,
                            Err(err) => {
                                atomic.cleanup().await;
                                return Err(ApiError::BadRequest(err.to_string()));
                            }
                        };
                        if chunk.is_empty() {
                            continue;
                        }
                        size += chunk.len() as u64;
                        total_written += chunk.len() as u64;
                        if upload.max_total_size > 0 && total_written > upload.max_total_size {
                            atomic.cleanup().await;
                            return Err(ApiError::BadRequest("upload size exceeds limit".into()));
                        }
                        hasher.update(&chunk);
                        if let Err(err) = atomic.file_mut().write_all(&chunk).await {
                            atomic.cleanup().await;
                            return Err(ApiError::Internal(err.to_string()));
                        }
                    }
                    atomic
                        .finalize()
                        .await
                        .map_err(|err| ApiError::Internal(err.to_string()))?;

                    staged.push(StagedFile {
                        original_name: display_name,
                        stored_name,
                        size,
                        content_type,
                        hash: hex::encode(hasher.finalize()),
                        uploaded_at: Utc::now(),
                    });
                }
                "isHidden" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                    controls.is_hidden = matches!(
                        value.trim().to_ascii_lowercase().as_str(),
                        "true" | "1" | "on" | "yes"
                    );
                }
                "viewLimit" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                    let value = value.trim().to_string();
                    if !value.is_empty() {
                        let parsed: i64 = value.parse().map_err(|_| {
                            ApiError::BadRequest("viewLimit must be a non-negative integer".into())
                        })?;
                        if parsed < 0 {
                            return Err(ApiError::BadRequest(
                                "viewLimit must be a non-negative integer".into(),
                            ));
                        }
                        controls.view_limit = Some(parsed as u64);
                    }
                }
                "password" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                    if !value.is_empty() {
                        controls.password = Some(value);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = stream_phase {
        for file in &staged {
            let _ = storage.delete_blob(&file.stored_name).await;
        }
        return Err(err);
    }

    if !saw_file_field {
        return Err(ApiError::BadRequest("no files in request".into()));
    }
    if staged.is_empty() {
        return Err(ApiError::BadRequest("no valid files uploaded".into()));
    }

    let mut uploaded = Vec::new();
    let mut recorded = 0usize;
    let record_phase: Result<(), ApiError> = async {
        let password_hash = match controls.password.as_deref() {
            Some(password) => Some(password::hash_password(password).map_err(ApiError::Internal)?),
            None => None,
        };

        for file in &staged {
            let hidden_token = if controls.is_hidden {
                Some(meta.allocate_hidden_token().await?.ok_or_else(|| {
                    ApiError::Conflict("could not allocate a unique hidden token".into())
                })?)
            } else {
                None
            };
            let record = FileRecord {
                stored_name: file.stored_name.clone(),
                display_name: file.original_name.clone(),
                size_bytes: file.size,
                content_type: file.content_type.clone(),
                created_at: file.uploaded_at,
                last_accessed_at: None,
                is_hidden: controls.is_hidden,
                hidden_token,
                password_hash: password_hash.clone(),
                is_password_protected: password_hash.is_some(),
                view_limit: controls.view_limit,
                view_count: 0,
            };
            meta.insert(&record).await?;
            recorded += 1;
            uploaded.push(UploadedFile {
                original_name: file.original_name.clone(),
                filename: file.stored_name.clone(),
                size: file.size,
                content_type: file.content_type.clone(),
                upload_time: file.uploaded_at.to_rfc3339(),
                hash: file.hash.clone(),
            });
        }
        Ok(())
    }
    .await;

    if let Err(err) = record_phase {
        for file in &staged[recorded..] {
            let _ = storage.delete_blob(&file.stored_name).await;
        }
        return Err(err);
    }

    let total_size: u64 = staged.iter().map(|file| file.size).sum();
    info!(
        count = uploaded.len(),
        total_size,
        is_hidden = controls.is_hidden,
        "upload complete"
    );
    Ok(JsonResponse(UploadResponse {
        message: format!("{} file(s) uploaded successfully.", uploaded.len()),
        files: uploaded,
        total_size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use tempfile::tempdir;

    const BOUNDARY: &str = "axo-share-test-boundary";

    async fn make_env() -> (tempfile::TempDir, Arc<Storage>, Arc<MetaStore>, Arc<AuthConfig>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("files");
        let storage = Arc::new(Storage::new(root.clone()));
        storage.ensure_root().await.expect("ensure storage root");
        let meta = Arc::new(MetaStore::new(root.join(".meta")));
        meta.ensure_root().await.expect("ensure meta root");
        let auth_config = Arc::new(AuthConfig {
            admin_key: "test-key".to_string(),
        });
        (temp, storage, meta, auth_config)
    }

    fn upload_config(max_total_size: u64) -> Arc<UploadConfig> {
        Arc::new(UploadConfig { max_total_size })
    }

    fn admin_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("test-key"),
        );
        headers
    }

    fn file_part(filename: &str, content_type: &str, data: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n{data}\r\n"
        )
    }

    fn text_part(name: &str, value: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
    }

    async fn make_multipart(parts: &[String]) -> Multipart {
        let body = format!("{}--{BOUNDARY}--\r\n", parts.concat());
        let request = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request");
        Multipart::from_request(request, &())
            .await
            .expect("multipart")
    }

    async fn run_upload(
        headers: HeaderMap,
        storage: &Arc<Storage>,
        meta: &Arc<MetaStore>,
        auth_config: &Arc<AuthConfig>,
        upload: Arc<UploadConfig>,
        parts: &[String],
    ) -> Result<JsonResponse<UploadResponse>, ApiError> {
        upload_files(
            Query(AdminQuery { admin_key: None }),
            headers,
            Extension(storage.clone()),
            Extension(meta.clone()),
            Extension(auth_config.clone()),
            Extension(upload),
            make_multipart(parts).await,
        )
        .await
    }

    #[tokio::test]
    async fn upload_requires_admin() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let result = run_upload(
            HeaderMap::new(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[file_part("notes.txt", "text/plain", "hello")],
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn upload_stores_blob_and_record() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let JsonResponse(response) = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[file_part("notes.txt", "text/plain", "hello world")],
        )
        .await
        .expect("upload");

        assert_eq!(response.files.len(), 1);
        assert_eq!(response.total_size, 11);
        let uploaded = &response.files[0];
        assert_eq!(uploaded.original_name, "notes.txt");
        assert!(uploaded.filename.starts_with("notes_"));
        assert!(uploaded.filename.ends_with(".txt"));
        assert_eq!(uploaded.size, 11);
        assert_eq!(
            uploaded.hash,
            hex::encode(Sha256::digest(b"hello world"))
        );

        let on_disk = std::fs::read(storage.root_path().join(&uploaded.filename))
            .expect("read stored blob");
        assert_eq!(on_disk, b"hello world");

        let record = meta
            .get(&uploaded.filename)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.display_name, "notes.txt");
        assert!(!record.is_hidden);
        assert!(record.hidden_token.is_none());
        assert!(!record.is_password_protected);
        assert_eq!(record.view_limit, None);
        assert_eq!(record.view_count, 0);
    }

    #[tokio::test]
    async fn upload_applies_controls_sent_after_the_file() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let JsonResponse(response) = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[
                file_part("secret.pdf", "application/pdf", "pdf data"),
                text_part("isHidden", "true"),
                text_part("viewLimit", "2"),
                text_part("password", "hunter2"),
            ],
        )
        .await
        .expect("upload");

        let uploaded = &response.files[0];
        let record = meta
            .get(&uploaded.filename)
            .await
            .expect("get")
            .expect("record");
        assert!(record.is_hidden);
        let token = record.hidden_token.as_deref().expect("token");
        assert_eq!(token.len(), crate::config::HIDDEN_TOKEN_LEN);
        assert_eq!(record.view_limit, Some(2));
        assert!(record.is_password_protected);
        assert!(password::verify_password(
            "hunter2",
            record.password_hash.as_deref().expect("hash")
        ));
    }

    #[tokio::test]
    async fn upload_skips_disallowed_extensions() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let JsonResponse(response) = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[
                file_part("malware.exe", "application/octet-stream", "mz"),
                file_part("ok.txt", "text/plain", "fine"),
            ],
        )
        .await
        .expect("upload");
        assert_eq!(response.files.len(), 1);
        assert_eq!(response.files[0].original_name, "ok.txt");

        let only_exe = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[file_part("malware.exe", "application/octet-stream", "mz")],
        )
        .await;
        assert!(matches!(only_exe, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_without_file_field_is_bad_request() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let result = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[text_part("isHidden", "true")],
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn view_limited_upload_self_destructs_after_first_download() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let JsonResponse(response) = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(0),
            &[
                file_part("photo.jpg", "image/jpeg", "jpeg bytes"),
                text_part("viewLimit", "1"),
            ],
        )
        .await
        .expect("upload");
        let stored_name = response.files[0].filename.clone();
        assert!(stored_name.starts_with("photo_"));
        assert!(stored_name.ends_with(".jpg"));

        let download = |name: String| {
            let storage = storage.clone();
            let meta = meta.clone();
            let auth_config = auth_config.clone();
            async move {
                crate::files::download_file(
                    axum::extract::Path(name),
                    Query(crate::files::DownloadQuery {
                        token: None,
                        password: None,
                        admin_key: None,
                    }),
                    HeaderMap::new(),
                    Extension(storage),
                    Extension(meta),
                    Extension(auth_config),
                )
                .await
            }
        };

        let first = download(stored_name.clone()).await.expect("first download");
        assert_eq!(first.status(), axum::http::StatusCode::OK);
        let body = http_body_util::BodyExt::collect(first.into_body())
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(&body[..], b"jpeg bytes");

        let second = download(stored_name).await;
        assert!(matches!(second, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn oversize_upload_is_rejected_and_rolled_back() {
        let (_temp, storage, meta, auth_config) = make_env().await;
        let result = run_upload(
            admin_headers(),
            &storage,
            &meta,
            &auth_config,
            upload_config(4),
            &[
                file_part("small.txt", "text/plain", "ab"),
                file_part("big.txt", "text/plain", "way too many bytes"),
            ],
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        // nothing survives the rollback
        let blobs = storage.list_blobs().await.expect("list");
        assert!(blobs.is_empty());
        assert!(meta.list_all().await.is_empty());
    }
}
