//! 访问控制引擎：下载与列表的准入判定、管理员密钥校验。

use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::password;
use crate::records::FileRecord;

/// 常数时间字符串比较，长度不同直接判不等。
fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// 管理员判定：共享密钥原样或 `Bearer <key>` 形式匹配，无会话状态。
pub fn admin_key_matches(presented: Option<&str>, configured: &str) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    if ct_eq(presented, configured) {
        return true;
    }
    match presented.strip_prefix("Bearer ") {
        Some(rest) => ct_eq(rest, configured),
        None => false,
    }
}

/// 下载准入：依次校验隐藏令牌与下载密码。无元数据的存量文件无条件放行。
///
/// blob 是否存在由调用方先行判定；这里只做纯决策，不产生副作用。
pub fn authorize_download(
    record: Option<&FileRecord>,
    token: Option<&str>,
    password: Option<&str>,
    is_admin: bool,
) -> Result<(), ApiError> {
    let Some(record) = record else {
        return Ok(());
    };

    if record.is_hidden && !is_admin {
        let presented = token.unwrap_or_default();
        let expected = record.hidden_token.as_deref().unwrap_or_default();
        if expected.is_empty() || !ct_eq(presented, expected) {
            return Err(ApiError::Forbidden("invalid or missing token".into()));
        }
    }

    if record.is_password_protected {
        let Some(hash) = record.password_hash.as_deref() else {
            return Err(ApiError::Internal("record has no password hash".into()));
        };
        let Some(password) = password else {
            return Err(ApiError::password_required());
        };
        if !password::verify_password(password, hash) {
            return Err(ApiError::invalid_password());
        }
    }

    Ok(())
}

/// 列表准入：请求隐藏文件列表必须是管理员，否则硬性拒绝。
pub fn authorize_listing(show_hidden: bool, is_admin: bool) -> Result<(), ApiError> {
    if show_hidden && !is_admin {
        return Err(ApiError::Forbidden(
            "admin key required to list hidden files".into(),
        ));
    }
    Ok(())
}
