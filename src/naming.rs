//! 文件名净化、存储名派生与随机令牌生成。

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::config::HIDDEN_TOKEN_LEN;

/// 生成密码用的字符表，去掉易混淆字符。
const PASSWORD_CHARS: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// 净化展示名：仅保留安全字符，空白折叠为下划线，路径前缀剥离。
pub fn sanitize_display_name(raw: &str) -> Option<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let mut sanitized = String::with_capacity(base.len());
    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            sanitized.push(ch);
        } else if ch.is_whitespace() {
            sanitized.push('_');
        }
    }

    let sanitized = sanitized.trim_matches(['.', '_']).to_string();
    if sanitized.is_empty() {
        return None;
    }
    Some(sanitized)
}

/// 派生存储名：`<词干>_<毫秒时间戳>.<小写扩展名>`。
pub fn derive_stored_name(display_name: &str, now: DateTime<Utc>) -> Option<String> {
    let sanitized = sanitize_display_name(display_name)?;
    let millis = now.timestamp_millis();
    Some(match split_stem_ext(&sanitized) {
        (stem, Some(ext)) => format!("{stem}_{millis}.{}", ext.to_lowercase()),
        (stem, None) => format!("{stem}_{millis}"),
    })
}

/// 展示名的尽力还原：剥离扩展名前的一段 `_<数字>`，仅用于展示。
pub fn display_name_from_stored(stored_name: &str) -> String {
    let (stem, ext) = split_stem_ext(stored_name);
    let stem = match stem.rsplit_once('_') {
        Some((head, tail))
            if !head.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head
        }
        _ => stem,
    };
    match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

/// 返回小写扩展名（不含点号）。
pub fn extension(name: &str) -> Option<String> {
    split_stem_ext(name).1.map(|ext| ext.to_lowercase())
}

fn split_stem_ext(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// 生成隐藏链接令牌：48 位字母数字，约 285 比特熵。
pub fn generate_hidden_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(HIDDEN_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// 生成随机密码，供管理员设置保护时选用。
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..PASSWORD_CHARS.len());
            PASSWORD_CHARS[idx] as char
        })
        .collect()
}
