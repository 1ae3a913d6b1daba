//! Archive statistics.
//!
//! [`overview`] and [`by_date`] back the `/api/v1/stats/*` endpoints;
//! [`run_stats`] prints the `chx stats` summary with a per-source breakdown.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_conversations: i64,
    pub total_messages: i64,
    /// Visible conversations per source type.
    pub sources: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayCount {
    pub date: String,
    pub count: i64,
}

pub async fn overview(pool: &SqlitePool) -> Result<Overview> {
    let total_conversations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE hidden_at IS NULL")
            .fetch_one(pool)
            .await?;

    let total_messages: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE hidden_at IS NULL")
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(
        "SELECT source_type, COUNT(*) AS count FROM conversations \
         WHERE hidden_at IS NULL GROUP BY source_type",
    )
    .fetch_all(pool)
    .await?;

    let sources = rows
        .iter()
        .map(|row| (row.get::<String, _>("source_type"), row.get::<i64, _>("count")))
        .collect();

    Ok(Overview {
        total_conversations,
        total_messages,
        sources,
    })
}

/// Message counts per calendar day (UTC), newest 30 days with activity.
pub async fn by_date(pool: &SqlitePool, date_from: Option<&str>, date_to: Option<&str>) -> Result<Vec<DayCount>> {
    let date_from = date_from.map(str::trim).filter(|d| !d.is_empty());
    let date_to = date_to.map(str::trim).filter(|d| !d.is_empty());

    let mut sql = String::from("SELECT DATE(created_at) AS date, COUNT(*) AS count FROM messages WHERE hidden_at IS NULL");
    if date_from.is_some() {
        sql.push_str(" AND created_at >= ?");
    }
    if date_to.is_some() {
        sql.push_str(" AND created_at <= ?");
    }
    sql.push_str(" GROUP BY DATE(created_at) ORDER BY date DESC LIMIT 30");

    let mut query = sqlx::query(&sql);
    if let Some(from) = date_from {
        query = query.bind(from);
    }
    if let Some(to) = date_to {
        query = query.bind(to);
    }
    let rows = query.fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| DayCount {
            date: row.get("date"),
            count: row.get("count"),
        })
        .collect())
}

struct SourceStats {
    source: String,
    conversations: i64,
    messages: i64,
    last_message_at: Option<String>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let summary = overview(&pool).await?;

    let inputs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_inputs WHERE status = 'ok'")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Chat Harness Archive Stats");
    println!("==========================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Conversations:  {}", summary.total_conversations);
    println!("  Messages:       {}", summary.total_messages);
    println!("  Inputs synced:  {}", inputs);

    let source_rows = sqlx::query(
        r#"
        SELECT
            source_type,
            COUNT(*) AS conversations,
            COALESCE(SUM(message_count), 0) AS messages,
            MAX(last_message_at) AS last_message_at
        FROM conversation_stats_view
        GROUP BY source_type
        ORDER BY conversations DESC, source_type
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let source_stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source_type"),
            conversations: row.get("conversations"),
            messages: row.get("messages"),
            last_message_at: row.get("last_message_at"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<14} {:>14} {:>10}   {}",
            "SOURCE", "CONVERSATIONS", "MESSAGES", "LAST MESSAGE"
        );
        println!("  {}", "-".repeat(64));

        for s in &source_stats {
            println!(
                "  {:<14} {:>14} {:>10}   {}",
                s.source,
                s.conversations,
                s.messages,
                s.last_message_at.as_deref().unwrap_or("never")
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::tests::seeded_pool;
    use tempfile::TempDir;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn overview_counts_per_source() {
        let dir = TempDir::new().unwrap();
        let pool = seeded_pool(&dir).await;
        let o = overview(&pool).await.unwrap();
        assert_eq!(o.total_conversations, 3);
        assert_eq!(o.total_messages, 12);
        assert_eq!(o.sources.get("gpt"), Some(&2));
        assert_eq!(o.sources.get("claude"), Some(&1));
    }

    #[tokio::test]
    async fn by_date_groups_and_filters() {
        let dir = TempDir::new().unwrap();
        let pool = seeded_pool(&dir).await;

        let days = by_date(&pool, None, None).await.unwrap();
        let dates: Vec<&str> = days.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-09", "2025-03-05", "2025-03-01"]);
        assert_eq!(days[2].count, 6);

        let window = by_date(&pool, Some("2025-03-02"), Some("2025-03-06")).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].date, "2025-03-05");
    }
}
