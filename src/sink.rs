//! Conversation sink.
//!
//! The [`ConversationSink`] trait is the only seam between the parsing
//! pipeline and storage. Upserts are idempotent: re-applying the same
//! conversation updates rows in place and never duplicates them.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`SqliteSink`] | `conversations` + `messages` tables, one transaction per conversation |
//! | [`MemorySink`] | `BTreeMap`s behind `RwLock`, for tests |

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::models::{ParsedConversation, ParsedMessage, Vendor};
use crate::timestamp;

/// Insert/update counts from one or more upserts, plus the conversations
/// whose transaction failed. A failed conversation leaves no rows behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub conversations_inserted: u64,
    pub conversations_updated: u64,
    pub messages_inserted: u64,
    pub messages_updated: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SinkFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkFailure {
    pub id: String,
    pub error: String,
}

impl SinkReport {
    pub fn merge(&mut self, other: SinkReport) {
        self.conversations_inserted += other.conversations_inserted;
        self.conversations_updated += other.conversations_updated;
        self.messages_inserted += other.messages_inserted;
        self.messages_updated += other.messages_updated;
        self.failures.extend(other.failures);
    }

    pub fn conversations(&self) -> u64 {
        self.conversations_inserted + self.conversations_updated
    }

    pub fn messages(&self) -> u64 {
        self.messages_inserted + self.messages_updated
    }
}

#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Upsert every conversation in `batch` under `vendor`. A conversation
    /// that fails is listed in [`SinkReport::failures`] and the rest of the
    /// batch still goes through; `Err` is reserved for a sink that cannot
    /// take writes at all.
    async fn upsert_batch(&self, vendor: Vendor, batch: &[ParsedConversation]) -> Result<SinkReport>;
}

/// SQLite implementation of [`ConversationSink`].
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert_one(&self, vendor: Vendor, conv: &ParsedConversation) -> Result<SinkReport> {
        let mut report = SinkReport::default();
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM conversations WHERE uuid = ?")
            .bind(&conv.id)
            .fetch_one(&mut *tx)
            .await?;
        if exists {
            report.conversations_updated += 1;
        } else {
            report.conversations_inserted += 1;
        }

        let metadata = serde_json::to_string(&conv.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO conversations (uuid, source_type, title, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(uuid) DO UPDATE SET
                title = excluded.title,
                metadata = excluded.metadata,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conv.id)
        .bind(vendor.as_str())
        .bind(&conv.title)
        .bind(&metadata)
        .bind(timestamp::to_storage(&conv.created_at))
        .bind(timestamp::to_storage(&conv.updated_at))
        .execute(&mut *tx)
        .await?;

        for msg in &conv.messages {
            let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM messages WHERE uuid = ?")
                .bind(&msg.id)
                .fetch_one(&mut *tx)
                .await?;
            if exists {
                report.messages_updated += 1;
            } else {
                report.messages_inserted += 1;
            }

            let content = serde_json::to_string(&msg.envelope())?;
            sqlx::query(
                r#"
                INSERT INTO messages (uuid, conversation_uuid, parent_uuid, round_index,
                                      role, content_type, content, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uuid) DO UPDATE SET
                    parent_uuid = excluded.parent_uuid,
                    round_index = excluded.round_index,
                    content = excluded.content,
                    content_type = excluded.content_type,
                    role = excluded.role,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&msg.id)
            .bind(&conv.id)
            .bind(&msg.parent_id)
            .bind(msg.round_index)
            .bind(msg.role.as_str())
            .bind(msg.content_type.as_str())
            .bind(&content)
            .bind(timestamp::to_storage(&msg.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(report)
    }
}

#[async_trait]
impl ConversationSink for SqliteSink {
    async fn upsert_batch(&self, vendor: Vendor, batch: &[ParsedConversation]) -> Result<SinkReport> {
        let mut report = SinkReport::default();
        for conv in batch {
            match self.upsert_one(vendor, conv).await {
                Ok(one) => report.merge(one),
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(vendor = %vendor, conversation = %conv.id, %error, "upsert failed");
                    report.failures.push(SinkFailure {
                        id: conv.id.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    conversations: RwLock<BTreeMap<String, (Vendor, ParsedConversation)>>,
    messages: RwLock<BTreeMap<String, (String, ParsedMessage)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn get(&self, id: &str) -> Option<ParsedConversation> {
        self.conversations
            .read()
            .ok()
            .and_then(|c| c.get(id).map(|(_, conv)| conv.clone()))
    }
}

#[async_trait]
impl ConversationSink for MemorySink {
    async fn upsert_batch(&self, vendor: Vendor, batch: &[ParsedConversation]) -> Result<SinkReport> {
        let mut report = SinkReport::default();
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;
        let mut messages = self
            .messages
            .write()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;

        for conv in batch {
            match conversations.insert(conv.id.clone(), (vendor, conv.clone())) {
                Some(_) => report.conversations_updated += 1,
                None => report.conversations_inserted += 1,
            }
            for msg in &conv.messages {
                match messages.insert(msg.id.clone(), (conv.id.clone(), msg.clone())) {
                    Some(_) => report.messages_updated += 1,
                    None => report.messages_inserted += 1,
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::models::{ContentType, Role};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn sample(title: &str) -> ParsedConversation {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let msg = |id: &str, parent: &str, role: Role, text: &str| ParsedMessage {
            id: id.into(),
            parent_id: parent.into(),
            child_id: None,
            round_index: 1,
            role,
            content_type: ContentType::Text,
            content_text: text.into(),
            content_images: vec![],
            content_videos: vec![],
            tool_data: None,
            created_at: at,
        };
        ParsedConversation {
            id: "conv-1".into(),
            title: title.into(),
            metadata: Default::default(),
            created_at: at,
            updated_at: at,
            messages: vec![
                msg("m1", "", Role::User, "hi"),
                msg("m2", "m1", Role::Assistant, "hello"),
            ],
        }
    }

    #[tokio::test]
    async fn sqlite_upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("s.sqlite")).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        let sink = SqliteSink::new(pool.clone());

        let first = sink.upsert_batch(Vendor::Claude, &[sample("one")]).await.unwrap();
        assert_eq!(first.conversations_inserted, 1);
        assert_eq!(first.messages_inserted, 2);

        let second = sink.upsert_batch(Vendor::Claude, &[sample("two")]).await.unwrap();
        assert_eq!(second.conversations_updated, 1);
        assert_eq!(second.messages_updated, 2);
        assert_eq!(second.messages_inserted, 0);

        let (convs, msgs): (i64, i64) = (
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations").fetch_one(&pool).await.unwrap(),
            sqlx::query_scalar("SELECT COUNT(*) FROM messages").fetch_one(&pool).await.unwrap(),
        );
        assert_eq!((convs, msgs), (1, 2));

        let title: String = sqlx::query_scalar("SELECT title FROM conversations WHERE uuid = 'conv-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(title, "two");

        let content: String = sqlx::query_scalar("SELECT content FROM messages WHERE uuid = 'm2'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(content, r#"{"text":"hello"}"#);

        let created: String = sqlx::query_scalar("SELECT created_at FROM messages WHERE uuid = 'm1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(created, "2025-03-01T12:00:00.000Z");
    }

    #[tokio::test]
    async fn one_failing_conversation_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("s.sqlite")).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER refuse_bad BEFORE INSERT ON conversations WHEN NEW.uuid = 'bad' \
             BEGIN SELECT RAISE(ABORT, 'refused'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        let sink = SqliteSink::new(pool.clone());

        let mut bad = sample("bad");
        bad.id = "bad".into();
        for m in &mut bad.messages {
            m.id = format!("bad-{}", m.id);
        }
        let mut later = sample("later");
        later.id = "conv-2".into();
        for m in &mut later.messages {
            m.id = format!("later-{}", m.id);
            if !m.parent_id.is_empty() {
                m.parent_id = format!("later-{}", m.parent_id);
            }
        }

        let report = sink
            .upsert_batch(Vendor::Claude, &[sample("first"), bad, later])
            .await
            .unwrap();
        assert_eq!(report.conversations_inserted, 2);
        assert_eq!(report.messages_inserted, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "bad");
        assert!(report.failures[0].error.contains("refused"));

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE uuid LIKE 'bad-%'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn memory_sink_counts_like_sqlite() {
        let sink = MemorySink::new();
        let first = sink.upsert_batch(Vendor::Gpt, &[sample("a")]).await.unwrap();
        let second = sink.upsert_batch(Vendor::Gpt, &[sample("b")]).await.unwrap();
        assert_eq!(first.conversations_inserted, 1);
        assert_eq!(second.conversations_updated, 1);
        assert_eq!(second.messages(), 2);
        assert_eq!(sink.conversation_count(), 1);
        assert_eq!(sink.message_count(), 2);
        assert_eq!(sink.get("conv-1").unwrap().title, "b");
    }
}
