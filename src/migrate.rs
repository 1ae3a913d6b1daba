use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table, index, trigger and view. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Create conversations table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            uuid TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            hidden_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create messages table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            uuid TEXT PRIMARY KEY,
            conversation_uuid TEXT NOT NULL,
            parent_uuid TEXT NOT NULL DEFAULT '',
            round_index INTEGER NOT NULL,
            role TEXT NOT NULL,
            content_type TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            hidden_at TEXT,
            FOREIGN KEY (conversation_uuid) REFERENCES conversations(uuid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_trees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tree_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            description TEXT,
            tree_data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS favorites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'default',
            notes TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL DEFAULT '#3B82F6',
            usage_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag_id INTEGER NOT NULL,
            conversation_uuid TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(tag_id, conversation_uuid),
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE,
            FOREIGN KEY (conversation_uuid) REFERENCES conversations(uuid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create dedup ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_inputs (
            content_hash TEXT PRIMARY KEY,
            vendor TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            detail TEXT,
            processed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_conv_source ON conversations(source_type, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_conv_hidden ON conversations(hidden_at)",
        "CREATE INDEX IF NOT EXISTS idx_msg_conv_round ON messages(conversation_uuid, round_index)",
        "CREATE INDEX IF NOT EXISTS idx_msg_parent ON messages(parent_uuid)",
        "CREATE INDEX IF NOT EXISTS idx_msg_created ON messages(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_fav_type_id ON favorites(target_type, target_id)",
        "CREATE INDEX IF NOT EXISTS idx_fav_category ON favorites(category, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_tag_usage ON tags(usage_count DESC)",
        "CREATE INDEX IF NOT EXISTS idx_conv_tag_conv ON conversation_tags(conversation_uuid)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    // Tag usage counts are owned by these triggers; the decrement floors at 0.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_tag_usage_inc AFTER INSERT ON conversation_tags
        BEGIN
            UPDATE tags SET usage_count = usage_count + 1 WHERE id = NEW.tag_id;
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_tag_usage_dec AFTER DELETE ON conversation_tags
        BEGIN
            UPDATE tags SET usage_count = MAX(usage_count - 1, 0) WHERE id = OLD.tag_id;
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS conversation_stats_view AS
        SELECT
            c.uuid,
            c.title,
            c.source_type,
            c.created_at,
            COUNT(DISTINCT m.uuid) AS message_count,
            COUNT(DISTINCT CASE WHEN m.role = 'user' THEN m.uuid END) AS user_message_count,
            COUNT(DISTINCT CASE WHEN m.role = 'assistant' THEN m.uuid END) AS assistant_message_count,
            MAX(m.round_index) AS max_round_index,
            MIN(m.created_at) AS first_message_at,
            MAX(m.created_at) AS last_message_at
        FROM conversations c
        LEFT JOIN messages m ON c.uuid = m.conversation_uuid AND m.hidden_at IS NULL
        WHERE c.hidden_at IS NULL
        GROUP BY c.uuid
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn schema_is_idempotent_and_triggers_floor_at_zero() {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("t.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        apply_schema(&pool).await.unwrap();

        let ts = "2025-01-01T00:00:00.000Z";
        sqlx::query("INSERT INTO conversations (uuid, source_type, created_at, updated_at) VALUES ('c', 'gpt', ?, ?)")
            .bind(ts)
            .bind(ts)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO tags (name, created_at) VALUES ('t', ?)")
            .bind(ts)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO conversation_tags (tag_id, conversation_uuid, created_at) VALUES (1, 'c', ?)")
            .bind(ts)
            .execute(&pool)
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT usage_count FROM tags WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        sqlx::query("UPDATE tags SET usage_count = 0 WHERE id = 1")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM conversation_tags")
            .execute(&pool)
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT usage_count FROM tags WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
