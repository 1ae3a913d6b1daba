//! Conversation and message queries.
//!
//! Read-side of the archive. Everything here skips rows whose `hidden_at`
//! is set. Used by `chx get` and the REST handlers in [`crate::server`].

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 1000;

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Non-positive values fall back to page 1 / 20 per page. Page size is
    /// capped at [`MAX_PAGE_SIZE`].
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(1),
            page_size: page_size
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .min(MAX_PAGE_SIZE),
        }
    }

    /// Saturates instead of overflowing for absurd page numbers; the
    /// query then simply returns no rows.
    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        }
    }
}

/// One row of `conversation_stats_view`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub uuid: String,
    pub title: String,
    pub source_type: String,
    pub created_at: String,
    pub message_count: i64,
    pub user_message_count: i64,
    pub assistant_message_count: i64,
    pub max_round_index: Option<i64>,
    pub first_message_at: Option<String>,
    pub last_message_at: Option<String>,
}

impl ConversationSummary {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            uuid: row.get("uuid"),
            title: row.get("title"),
            source_type: row.get("source_type"),
            created_at: row.get("created_at"),
            message_count: row.get("message_count"),
            user_message_count: row.get("user_message_count"),
            assistant_message_count: row.get("assistant_message_count"),
            max_round_index: row.get("max_round_index"),
            first_message_at: row.get("first_message_at"),
            last_message_at: row.get("last_message_at"),
        }
    }
}

pub(crate) const SUMMARY_COLUMNS: &str = "csv.uuid, csv.title, csv.source_type, csv.created_at, \
     csv.message_count, csv.user_message_count, csv.assistant_message_count, \
     csv.max_round_index, csv.first_message_at, csv.last_message_at";

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub uuid: String,
    pub source_type: String,
    pub title: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub uuid: String,
    pub conversation_uuid: String,
    pub parent_uuid: String,
    pub round_index: i64,
    pub role: String,
    pub content_type: String,
    /// The stored content envelope, decoded.
    pub content: serde_json::Value,
    pub created_at: String,
}

impl MessageRecord {
    fn from_row(row: &SqliteRow) -> Self {
        let raw: String = row.get("content");
        let content = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
        Self {
            uuid: row.get("uuid"),
            conversation_uuid: row.get("conversation_uuid"),
            parent_uuid: row.get("parent_uuid"),
            round_index: row.get("round_index"),
            role: row.get("role"),
            content_type: row.get("content_type"),
            content,
            created_at: row.get("created_at"),
        }
    }

    /// The `text` field of the envelope, or empty.
    pub fn text(&self) -> &str {
        self.content.get("text").and_then(|t| t.as_str()).unwrap_or("")
    }
}

const MESSAGE_COLUMNS: &str =
    "uuid, conversation_uuid, parent_uuid, round_index, role, content_type, content, created_at";

/// Filters for [`list_conversations`]. Dates compare lexicographically
/// against the stored RFC3339 text.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub source_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// List visible conversations, most recently active first.
pub async fn list_conversations(
    pool: &SqlitePool,
    filter: &ConversationFilter,
    pagination: Pagination,
) -> Result<Paged<ConversationSummary>> {
    let mut conditions = String::new();
    let mut args: Vec<&str> = Vec::new();
    if let Some(source) = non_blank(&filter.source_type) {
        conditions.push_str(" AND source_type = ?");
        args.push(source);
    }
    if let Some(from) = non_blank(&filter.date_from) {
        conditions.push_str(" AND created_at >= ?");
        args.push(from);
    }
    if let Some(to) = non_blank(&filter.date_to) {
        conditions.push_str(" AND created_at <= ?");
        args.push(to);
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM conversations WHERE hidden_at IS NULL{}",
        conditions
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for arg in &args {
        count_query = count_query.bind(*arg);
    }
    let total = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT {} FROM conversation_stats_view csv WHERE 1=1{} \
         ORDER BY csv.last_message_at DESC LIMIT ? OFFSET ?",
        SUMMARY_COLUMNS,
        conditions.replace(" AND ", " AND csv.")
    );
    let mut list_query = sqlx::query(&list_sql);
    for arg in &args {
        list_query = list_query.bind(*arg);
    }
    let rows = list_query
        .bind(pagination.page_size)
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    let items = rows.iter().map(ConversationSummary::from_row).collect();
    Ok(Paged::new(items, total, pagination))
}

pub async fn get_conversation(pool: &SqlitePool, uuid: &str) -> Result<Option<ConversationDetail>> {
    let row = sqlx::query(
        "SELECT uuid, source_type, title, metadata, created_at, updated_at \
         FROM conversations WHERE uuid = ? AND hidden_at IS NULL",
    )
    .bind(uuid)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let metadata: String = row.get("metadata");
        ConversationDetail {
            uuid: row.get("uuid"),
            source_type: row.get("source_type"),
            title: row.get("title"),
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }))
}

/// Messages of one conversation, in round order.
pub async fn list_messages(
    pool: &SqlitePool,
    conversation_uuid: &str,
    pagination: Pagination,
) -> Result<Paged<MessageRecord>> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE conversation_uuid = ? AND hidden_at IS NULL",
    )
    .bind(conversation_uuid)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(&format!(
        "SELECT {} FROM messages WHERE conversation_uuid = ? AND hidden_at IS NULL \
         ORDER BY round_index, created_at LIMIT ? OFFSET ?",
        MESSAGE_COLUMNS
    ))
    .bind(conversation_uuid)
    .bind(pagination.page_size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    let items = rows.iter().map(MessageRecord::from_row).collect();
    Ok(Paged::new(items, total, pagination))
}

/// Every visible message of a conversation, unpaginated.
pub async fn all_messages(pool: &SqlitePool, conversation_uuid: &str) -> Result<Vec<MessageRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM messages WHERE conversation_uuid = ? AND hidden_at IS NULL \
         ORDER BY round_index, created_at",
        MESSAGE_COLUMNS
    ))
    .bind(conversation_uuid)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(MessageRecord::from_row).collect())
}

pub async fn get_message(pool: &SqlitePool, uuid: &str) -> Result<Option<MessageRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM messages WHERE uuid = ? AND hidden_at IS NULL",
        MESSAGE_COLUMNS
    ))
    .bind(uuid)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(MessageRecord::from_row))
}

/// Messages whose round lies in `[round - before, round + after]` around
/// the given message, clamped below at round 1. `None` when the anchor
/// message does not exist.
pub async fn message_context(
    pool: &SqlitePool,
    uuid: &str,
    before: i64,
    after: i64,
) -> Result<Option<Vec<MessageRecord>>> {
    let anchor = sqlx::query(
        "SELECT conversation_uuid, round_index FROM messages WHERE uuid = ? AND hidden_at IS NULL",
    )
    .bind(uuid)
    .fetch_optional(pool)
    .await?;

    let Some(anchor) = anchor else {
        return Ok(None);
    };
    let conversation_uuid: String = anchor.get("conversation_uuid");
    let round: i64 = anchor.get("round_index");
    let low = round.saturating_sub(before).max(1);
    let high = round.saturating_add(after);

    let rows = sqlx::query(&format!(
        "SELECT {} FROM messages \
         WHERE conversation_uuid = ? AND hidden_at IS NULL AND round_index BETWEEN ? AND ? \
         ORDER BY round_index, created_at",
        MESSAGE_COLUMNS
    ))
    .bind(&conversation_uuid)
    .bind(low)
    .bind(high)
    .fetch_all(pool)
    .await?;

    Ok(Some(rows.iter().map(MessageRecord::from_row).collect()))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
