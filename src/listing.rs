//! 列表投影：磁盘条目与元数据记录合并为客户端可见视图。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::naming;
use crate::records::FileRecord;
use crate::storage::BlobEntry;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    pub name: String,
    pub original_name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub is_hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_token: Option<String>,
    pub is_password_protected: bool,
    pub view_limit: Option<u64>,
    pub view_count: u64,
    pub last_accessed: Option<String>,
}

fn format_instant(instant: Option<DateTime<Utc>>) -> Option<String> {
    instant.map(|value| value.to_rfc3339())
}

/// 合并单个磁盘条目与其记录。记录缺失时退回公开默认值。
fn project_entry(blob: &BlobEntry, record: Option<&FileRecord>, is_admin: bool) -> ListingEntry {
    match record {
        Some(record) => ListingEntry {
            name: blob.name.clone(),
            original_name: record.display_name.clone(),
            size: blob.size,
            content_type: record.content_type.clone(),
            created: Some(record.created_at.to_rfc3339()),
            modified: format_instant(blob.modified),
            is_hidden: record.is_hidden,
            hidden_token: if is_admin {
                record.hidden_token.clone()
            } else {
                None
            },
            is_password_protected: record.is_password_protected,
            view_limit: record.view_limit,
            view_count: record.view_count,
            last_accessed: format_instant(record.last_accessed_at),
        },
        None => ListingEntry {
            name: blob.name.clone(),
            original_name: naming::display_name_from_stored(&blob.name),
            size: blob.size,
            content_type: mime_guess::from_path(&blob.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            created: format_instant(blob.created),
            modified: format_instant(blob.modified),
            is_hidden: false,
            hidden_token: None,
            is_password_protected: false,
            view_limit: None,
            view_count: 0,
            last_accessed: None,
        },
    }
}

/// 构建列表。隐藏条目仅在管理员显式请求时出现，令牌只回给管理员。
pub fn build_listing(
    blobs: &[BlobEntry],
    records: &HashMap<String, FileRecord>,
    is_admin: bool,
    show_hidden: bool,
) -> Vec<ListingEntry> {
    blobs
        .iter()
        .filter_map(|blob| {
            let record = records.get(&blob.name);
            if record.is_some_and(|record| record.is_hidden) && !(show_hidden && is_admin) {
                return None;
            }
            Some(project_entry(blob, record, is_admin))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn blob(name: &str) -> BlobEntry {
        BlobEntry {
            name: name.to_string(),
            size: 42,
            created: Some(Utc::now()),
            modified: Some(Utc::now()),
        }
    }

    fn hidden_record(name: &str) -> FileRecord {
        let mut record = FileRecord::defaults_for_blob(
            name,
            "secret.pdf".to_string(),
            42,
            "application/pdf".to_string(),
            Utc::now(),
        );
        record.is_hidden = true;
        record.hidden_token = Some("tok123".to_string());
        record
    }

    #[test]
    fn hidden_entries_are_omitted_without_admin_show_hidden() {
        let blobs = vec![blob("public_1.txt"), blob("secret_1.pdf")];
        let mut records = HashMap::new();
        records.insert("secret_1.pdf".to_string(), hidden_record("secret_1.pdf"));

        let public_view = build_listing(&blobs, &records, false, false);
        assert_eq!(public_view.len(), 1);
        assert_eq!(public_view[0].name, "public_1.txt");

        // admin without hidden=true still gets the public projection
        let admin_default = build_listing(&blobs, &records, true, false);
        assert_eq!(admin_default.len(), 1);

        let admin_hidden = build_listing(&blobs, &records, true, true);
        assert_eq!(admin_hidden.len(), 2);
    }

    #[test]
    fn tokens_are_only_exposed_to_admins() {
        let blobs = vec![blob("secret_1.pdf")];
        let mut records = HashMap::new();
        records.insert("secret_1.pdf".to_string(), hidden_record("secret_1.pdf"));

        let admin_view = build_listing(&blobs, &records, true, true);
        assert_eq!(admin_view[0].hidden_token.as_deref(), Some("tok123"));
    }

    #[test]
    fn recordless_blob_projects_public_defaults() {
        let blobs = vec![blob("report_1712345678901.pdf")];
        let records = HashMap::new();

        let entries = build_listing(&blobs, &records, false, false);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.original_name, "report.pdf");
        assert_eq!(entry.content_type, "application/pdf");
        assert!(!entry.is_hidden);
        assert!(!entry.is_password_protected);
        assert_eq!(entry.view_count, 0);
        assert_eq!(entry.view_limit, None);
        assert!(entry.hidden_token.is_none());
    }

    #[test]
    fn record_fields_win_over_guesses() {
        let blobs = vec![blob("data_1.bin")];
        let mut records = HashMap::new();
        let mut record = FileRecord::defaults_for_blob(
            "data_1.bin",
            "data.bin".to_string(),
            42,
            "application/x-custom".to_string(),
            Utc::now(),
        );
        record.view_limit = Some(5);
        record.view_count = 3;
        records.insert("data_1.bin".to_string(), record);

        let entries = build_listing(&blobs, &records, false, false);
        assert_eq!(entries[0].content_type, "application/x-custom");
        assert_eq!(entries[0].view_limit, Some(5));
        assert_eq!(entries[0].view_count, 3);
    }
}
