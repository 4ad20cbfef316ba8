//! 统一的 API 错误类型与 JSON 响应转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use std::io::ErrorKind;

use crate::records::MetaError;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized {
        message: String,
        requires_password: bool,
    },
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// 密码缺失时的拒绝响应。
    pub fn password_required() -> Self {
        ApiError::Unauthorized {
            message: "password required".into(),
            requires_password: true,
        }
    }

    /// 密码错误时的拒绝响应。
    pub fn invalid_password() -> Self {
        ApiError::Unauthorized {
            message: "invalid password".into(),
            requires_password: false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    requires_password: Option<bool>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message, requires_password) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Unauthorized {
                message,
                requires_password,
            } => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                message,
                requires_password.then_some(true),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg, None),
        };
        (
            status,
            JsonResponse(ErrorBody {
                error,
                message,
                requires_password,
            }),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName => ApiError::BadRequest("invalid file name".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("file not found".into()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

impl From<MetaError> for ApiError {
    fn from(error: MetaError) -> Self {
        match error {
            MetaError::InvalidName => ApiError::BadRequest("invalid file name".into()),
            MetaError::Busy => ApiError::Conflict("record is busy, retry".into()),
            MetaError::Io(err) => ApiError::Internal(err.to_string()),
            MetaError::Corrupt(err) => ApiError::Internal(err.to_string()),
        }
    }
}
