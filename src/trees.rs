//! Saved conversation trees: named groupings of conversation uuids.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::conversations::{Paged, Pagination};
use crate::timestamp;

#[derive(Debug, Clone, Serialize)]
pub struct Tree {
    pub id: i64,
    pub tree_id: String,
    pub title: String,
    pub description: Option<String>,
    pub tree_data: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl Tree {
    fn from_row(row: &SqliteRow) -> Self {
        let data: String = row.get("tree_data");
        Self {
            id: row.get("id"),
            tree_id: row.get("tree_id"),
            title: row.get("title"),
            description: row.get("description"),
            tree_data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// List entry without the tree payload.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSummary {
    pub tree_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeData {
    pub conversation_uuids: Vec<String>,
    pub node_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TreeUpdate {
    pub tree_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub conversation_uuids: Vec<String>,
}

pub async fn list_trees(pool: &SqlitePool, pagination: Pagination) -> Result<Paged<TreeSummary>> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_trees")
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query(
        "SELECT tree_id, title, created_at, updated_at FROM conversation_trees \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(pagination.page_size)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(|row| TreeSummary {
            tree_id: row.get("tree_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
        .collect();
    Ok(Paged::new(items, total, pagination))
}

pub async fn get_tree(pool: &SqlitePool, tree_id: &str) -> Result<Option<Tree>> {
    let row = sqlx::query(
        "SELECT id, tree_id, title, description, tree_data, created_at, updated_at \
         FROM conversation_trees WHERE tree_id = ?",
    )
    .bind(tree_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(Tree::from_row))
}

/// Create or replace a tree. A blank `tree_id` becomes `tree-<unix seconds>`.
/// Returns the tree id and the update time.
pub async fn upsert_tree(pool: &SqlitePool, update: &TreeUpdate) -> Result<(String, String)> {
    let now = chrono::Utc::now();
    let tree_id = update
        .tree_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("tree-{}", now.timestamp()));
    let data = TreeData {
        conversation_uuids: update.conversation_uuids.clone(),
        node_count: update.conversation_uuids.len(),
    };
    let stamp = timestamp::to_storage(&now);
    let description = update.description.as_deref().map(str::trim);

    sqlx::query(
        r#"
        INSERT INTO conversation_trees (tree_id, title, description, tree_data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(tree_id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            tree_data = excluded.tree_data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&tree_id)
    .bind(update.title.trim())
    .bind(description)
    .bind(serde_json::to_string(&data)?)
    .bind(&stamp)
    .bind(&stamp)
    .execute(pool)
    .await?;

    Ok((tree_id, stamp))
}

/// Returns false when the tree did not exist.
pub async fn delete_tree(pool: &SqlitePool, tree_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM conversation_trees WHERE tree_id = ?")
        .bind(tree_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("t.sqlite")).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();

        let mut update = TreeUpdate {
            tree_id: Some("travel".into()),
            title: "Trips".into(),
            description: None,
            conversation_uuids: vec!["a".into(), "b".into()],
        };
        upsert_tree(&pool, &update).await.unwrap();
        update.title = "Trips 2025".into();
        update.conversation_uuids.push("c".into());
        let (id, _) = upsert_tree(&pool, &update).await.unwrap();
        assert_eq!(id, "travel");

        let tree = get_tree(&pool, "travel").await.unwrap().unwrap();
        assert_eq!(tree.title, "Trips 2025");
        assert_eq!(tree.tree_data["node_count"], 3);
        assert_eq!(list_trees(&pool, Pagination::default()).await.unwrap().total, 1);

        assert!(delete_tree(&pool, "travel").await.unwrap());
        assert!(get_tree(&pool, "travel").await.unwrap().is_none());
        assert!(!delete_tree(&pool, "travel").await.unwrap());
    }

    #[tokio::test]
    async fn blank_id_is_generated() {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("t.sqlite")).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        let update = TreeUpdate {
            tree_id: Some("  ".into()),
            title: "x".into(),
            conversation_uuids: vec!["a".into()],
            ..Default::default()
        };
        let (id, _) = upsert_tree(&pool, &update).await.unwrap();
        assert!(id.starts_with("tree-"));
    }
}
