//! Bookmarks on conversations, rounds, messages or fragments.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::conversations::{Paged, Pagination};
use crate::timestamp;

pub const TARGET_TYPES: [&str; 4] = ["conversation", "round", "message", "fragment"];

#[derive(Debug, Clone, Serialize)]
pub struct Favorite {
    pub id: i64,
    pub target_type: String,
    pub target_id: String,
    pub category: String,
    pub notes: Option<String>,
    pub created_at: String,
}

impl Favorite {
    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            target_type: row.get("target_type"),
            target_id: row.get("target_id"),
            category: row.get("category"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewFavorite {
    pub target_type: String,
    pub target_id: String,
    pub category: Option<String>,
    pub notes: Option<String>,
}

pub async fn create_favorite(pool: &SqlitePool, new: &NewFavorite) -> Result<Favorite> {
    let target_type = new.target_type.trim();
    if !TARGET_TYPES.contains(&target_type) {
        bail!("invalid target_type: {}", target_type);
    }
    let category = new
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("default");
    let notes = new.notes.as_deref().filter(|n| !n.is_empty());
    let now = timestamp::to_storage(&chrono::Utc::now());

    let result = sqlx::query(
        "INSERT INTO favorites (target_type, target_id, category, notes, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(target_type)
    .bind(new.target_id.trim())
    .bind(category)
    .bind(notes)
    .bind(&now)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id, target_type, target_id, category, notes, created_at FROM favorites WHERE id = ?",
    )
    .bind(result.last_insert_rowid())
    .fetch_one(pool)
    .await?;
    Ok(Favorite::from_row(&row))
}

/// Newest first, optionally restricted to one category.
pub async fn list_favorites(
    pool: &SqlitePool,
    category: Option<&str>,
    pagination: Pagination,
) -> Result<Paged<Favorite>> {
    let category = category.map(str::trim).filter(|c| !c.is_empty());
    let filter = if category.is_some() { " WHERE category = ?" } else { "" };

    let count_sql = format!("SELECT COUNT(*) FROM favorites{}", filter);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(c) = category {
        count_query = count_query.bind(c);
    }
    let total = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT id, target_type, target_id, category, notes, created_at FROM favorites{} \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        filter
    );
    let mut list_query = sqlx::query(&list_sql);
    if let Some(c) = category {
        list_query = list_query.bind(c);
    }
    let rows = list_query
        .bind(pagination.page_size)
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    let items = rows.iter().map(Favorite::from_row).collect();
    Ok(Paged::new(items, total, pagination))
}

/// Returns false when no favorite had that id.
pub async fn delete_favorite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM favorites WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
