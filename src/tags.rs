//! Tags and conversation/tag links.
//!
//! `tags.usage_count` is maintained by the `trg_tag_usage_*` triggers
//! created in [`crate::migrate`]; nothing here touches it directly.

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::conversations::{ConversationSummary, Paged, Pagination, SUMMARY_COLUMNS};
use crate::timestamp;

pub const DEFAULT_TAG_COLOR: &str = "#3B82F6";

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub usage_count: i64,
    pub created_at: String,
}

impl Tag {
    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            color: row.get("color"),
            usage_count: row.get("usage_count"),
            created_at: row.get("created_at"),
        }
    }
}

/// All tags, most used first.
pub async fn list_tags(pool: &SqlitePool) -> Result<Vec<Tag>> {
    let rows = sqlx::query(
        "SELECT id, name, color, usage_count, created_at FROM tags ORDER BY usage_count DESC, name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(Tag::from_row).collect())
}

pub async fn get_tag(pool: &SqlitePool, id: i64) -> Result<Option<Tag>> {
    let row = sqlx::query("SELECT id, name, color, usage_count, created_at FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Tag::from_row))
}

/// Create a tag. An empty color falls back to [`DEFAULT_TAG_COLOR`].
pub async fn create_tag(pool: &SqlitePool, name: &str, color: &str) -> Result<Tag> {
    let color = if color.trim().is_empty() {
        DEFAULT_TAG_COLOR
    } else {
        color.trim()
    };
    let now = timestamp::to_storage(&chrono::Utc::now());
    let result = sqlx::query("INSERT INTO tags (name, color, usage_count, created_at) VALUES (?, ?, 0, ?)")
        .bind(name.trim())
        .bind(color)
        .bind(&now)
        .execute(pool)
        .await?;

    let id = result.last_insert_rowid();
    get_tag(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("tag {} vanished after insert", id))
}

/// Link one tag to a conversation. Linking twice is a no-op.
/// Returns whether a new link was created.
pub async fn add_conversation_tag(pool: &SqlitePool, tag_id: i64, conversation_uuid: &str) -> Result<bool> {
    let now = timestamp::to_storage(&chrono::Utc::now());
    let result = sqlx::query(
        "INSERT OR IGNORE INTO conversation_tags (tag_id, conversation_uuid, created_at) VALUES (?, ?, ?)",
    )
    .bind(tag_id)
    .bind(conversation_uuid)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Link several tags in one transaction. Returns the number of new links.
pub async fn batch_add(pool: &SqlitePool, conversation_uuid: &str, tag_ids: &[i64]) -> Result<u64> {
    let now = timestamp::to_storage(&chrono::Utc::now());
    let mut tx = pool.begin().await?;
    let mut added = 0;
    for tag_id in tag_ids {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO conversation_tags (tag_id, conversation_uuid, created_at) VALUES (?, ?, ?)",
        )
        .bind(tag_id)
        .bind(conversation_uuid)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        added += result.rows_affected();
    }
    tx.commit().await?;
    Ok(added)
}

/// Unlink several tags in one transaction. Returns the number removed.
pub async fn batch_remove(pool: &SqlitePool, conversation_uuid: &str, tag_ids: &[i64]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut removed = 0;
    for tag_id in tag_ids {
        let result = sqlx::query("DELETE FROM conversation_tags WHERE conversation_uuid = ? AND tag_id = ?")
            .bind(conversation_uuid)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        removed += result.rows_affected();
    }
    tx.commit().await?;
    Ok(removed)
}

/// Delete a link by its id. A missing link counts as deleted.
pub async fn delete_conversation_tag(pool: &SqlitePool, link_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM conversation_tags WHERE id = ?")
        .bind(link_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Visible conversations carrying a tag, most recently tagged first.
pub async fn tag_conversations(
    pool: &SqlitePool,
    tag_id: i64,
    pagination: Pagination,
) -> Result<Paged<ConversationSummary>> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM conversation_tags ct \
         JOIN conversations c ON ct.conversation_uuid = c.uuid \
         WHERE ct.tag_id = ? AND c.hidden_at IS NULL",
    )
    .bind(tag_id)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(&format!(
        "SELECT {} FROM conversation_tags ct \
         JOIN conversation_stats_view csv ON ct.conversation_uuid = csv.uuid \
         WHERE ct.tag_id = ? ORDER BY ct.created_at DESC, ct.id DESC LIMIT ? OFFSET ?",
        SUMMARY_COLUMNS
    ))
    .bind(tag_id)
    .bind(pagination.page_size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    let items = rows.iter().map(ConversationSummary::from_row).collect();
    Ok(Paged::new(items, total, pagination))
}
