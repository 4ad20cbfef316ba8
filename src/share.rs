//! 隐藏开关、密码与浏览上限设置、共享链接处理器。

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Path, Query};
use axum::http::HeaderMap;
use axum::response::{Json as JsonResponse, Redirect};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::{self, AuthConfig};
use crate::config::GENERATED_PASSWORD_LEN;
use crate::error::ApiError;
use crate::files::AdminQuery;
use crate::http::{self, RequestScheme};
use crate::naming;
use crate::password;
use crate::records::{FileRecord, MetaStore};
use crate::storage::Storage;

#[derive(Debug)]
pub struct ShareConfig {
    pub public_url: Option<String>,
}

/// 计算共享链接的基础地址：配置优先，否则取请求的 Host。
fn share_base(
    share: &ShareConfig,
    headers: &HeaderMap,
    scheme: RequestScheme,
) -> Result<String, ApiError> {
    share
        .public_url
        .as_deref()
        .map(|url| url.trim_end_matches('/').to_string())
        .or_else(|| http::request_base_url(headers, scheme))
        .ok_or_else(|| ApiError::Internal("cannot determine share link base url".into()))
}

/// 为存量文件构造默认记录；blob 不存在时返回 NotFound（删除即权威）。
async fn default_record_for(storage: &Storage, name: &str) -> Result<FileRecord, ApiError> {
    let metadata = storage.stat_blob(name).await?;
    let created = metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(FileRecord::defaults_for_blob(
        name,
        naming::display_name_from_stored(name),
        metadata.len(),
        mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        created,
    ))
}

/// 生成全局唯一的隐藏令牌，重掷耗尽按冲突处理。
async fn fresh_token(meta: &MetaStore) -> Result<String, ApiError> {
    meta.allocate_hidden_token().await?.ok_or_else(|| {
        ApiError::Conflict("could not allocate a unique hidden token".into())
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToggleHiddenResponse {
    pub name: String,
    pub is_hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
}

/// 切换隐藏状态：转为隐藏时签发新令牌，转为公开时清除令牌。
pub async fn toggle_hidden(
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    Extension(share_config): Extension<Arc<ShareConfig>>,
    Extension(scheme): Extension<RequestScheme>,
) -> Result<JsonResponse<ToggleHiddenResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;

    let default = default_record_for(&storage, &name).await?;
    let token = fresh_token(&meta).await?;
    let updated = meta
        .update(&name, Some(default), |record| {
            if record.is_hidden {
                record.is_hidden = false;
                record.hidden_token = None;
            } else {
                record.is_hidden = true;
                record.hidden_token = Some(token);
            }
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;

    let share_url = match updated.hidden_token.as_deref() {
        Some(token) => {
            let base = share_base(&share_config, &headers, scheme)?;
            Some(format!("{base}/h/{token}"))
        }
        None => None,
    };

    info!(name, is_hidden = updated.is_hidden, "toggle hidden");
    Ok(JsonResponse(ToggleHiddenResponse {
        name,
        is_hidden: updated.is_hidden,
        hidden_token: updated.hidden_token,
        share_url,
    }))
}

#[derive(Deserialize)]
pub(crate) struct SetPasswordRequest {
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetPasswordResponse {
    pub name: String,
    pub is_password_protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

/// 设置下载密码：空串清除保护，缺省字段则代为生成并一次性返回。
pub async fn set_password(
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    payload: Result<Json<SetPasswordRequest>, JsonRejection>,
) -> Result<JsonResponse<SetPasswordResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;
    let Json(payload) = payload.map_err(|err| ApiError::BadRequest(err.body_text()))?;

    let (hash, generated) = match payload.password {
        None => {
            let generated = naming::generate_password(GENERATED_PASSWORD_LEN);
            let hash = password::hash_password(&generated).map_err(ApiError::Internal)?;
            (Some(hash), Some(generated))
        }
        Some(password) if password.is_empty() => (None, None),
        Some(password) => {
            let hash = password::hash_password(&password).map_err(ApiError::Internal)?;
            (Some(hash), None)
        }
    };

    let default = default_record_for(&storage, &name).await?;
    let updated = meta
        .update(&name, Some(default), |record| {
            record.is_password_protected = hash.is_some();
            record.password_hash = hash;
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;

    info!(
        name,
        protected = updated.is_password_protected,
        "set password"
    );
    Ok(JsonResponse(SetPasswordResponse {
        name,
        is_password_protected: updated.is_password_protected,
        generated_password: generated,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetViewLimitRequest {
    pub view_limit: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetViewLimitResponse {
    pub name: String,
    pub view_limit: Option<u64>,
    pub view_count: u64,
}

/// 设置浏览上限：null 表示不限。已达上限的文件在下次授权下载后删除。
pub async fn set_view_limit(
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    payload: Result<Json<SetViewLimitRequest>, JsonRejection>,
) -> Result<JsonResponse<SetViewLimitResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;
    let Json(payload) = payload.map_err(|err| ApiError::BadRequest(err.body_text()))?;

    let view_limit = match payload.view_limit {
        Some(value) if value < 0 => {
            return Err(ApiError::BadRequest(
                "viewLimit must be a non-negative integer".into(),
            ));
        }
        Some(value) => Some(value as u64),
        None => None,
    };

    let default = default_record_for(&storage, &name).await?;
    let updated = meta
        .update(&name, Some(default), |record| {
            record.view_limit = view_limit;
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;

    info!(name, view_limit = ?updated.view_limit, "set view limit");
    Ok(JsonResponse(SetViewLimitResponse {
        name,
        view_limit: updated.view_limit,
        view_count: updated.view_count,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetViewsResponse {
    pub name: String,
    pub view_count: u64,
}

/// 浏览计数清零。
pub async fn reset_views(
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
) -> Result<JsonResponse<ResetViewsResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;

    let default = default_record_for(&storage, &name).await?;
    let updated = meta
        .update(&name, Some(default), |record| {
            record.view_count = 0;
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;

    info!(name, "reset views");
    Ok(JsonResponse(ResetViewsResponse {
        name,
        view_count: updated.view_count,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ShareLinkResponse {
    pub name: String,
    pub share_url: String,
}

/// 计算共享链接：隐藏文件走令牌入口，公开文件直接指向下载地址。
pub async fn generate_share_link(
    Path(name): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(meta): Extension<Arc<MetaStore>>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    Extension(share_config): Extension<Arc<ShareConfig>>,
    Extension(scheme): Extension<RequestScheme>,
) -> Result<JsonResponse<ShareLinkResponse>, ApiError> {
    auth::require_admin(&headers, query.admin_key.as_deref(), &auth_config)?;

    if !storage.blob_exists(&name).await? {
        return Err(ApiError::NotFound("file not found".into()));
    }
    let record = meta.get(&name).await?;
    let base = share_base(&share_config, &headers, scheme)?;
    let share_url = match record.as_ref().and_then(|record| {
        record
            .is_hidden
            .then_some(record.hidden_token.as_deref())
            .flatten()
    }) {
        Some(token) => format!("{base}/h/{token}"),
        None => format!("{base}/api/download/{name}"),
    };

    Ok(JsonResponse(ShareLinkResponse { name, share_url }))
}

/// 解析隐藏令牌并跳转到带令牌的下载地址。
pub async fn resolve_hidden(
    Path(token): Path<String>,
    Extension(meta): Extension<Arc<MetaStore>>,
) -> Result<Redirect, ApiError> {
    let record = meta
        .find_by_token(&token)
        .await?
        .ok_or_else(|| ApiError::NotFound("share link not found".into()))?;
    Ok(Redirect::temporary(&format!(
        "/api/download/{}?token={token}",
        record.stored_name
    )))
}
