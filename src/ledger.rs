//! Dedup ledger.
//!
//! Records the sha256 of every processed input together with its outcome.
//! `chx sync` consults it to skip inputs already ingested successfully;
//! failed inputs are retried on the next run.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::models::Vendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Ok,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Ok => "ok",
            LedgerStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub content_hash: String,
    pub vendor: Vendor,
    pub name: String,
    pub status: LedgerStatus,
    pub detail: Option<String>,
}

#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// True when `hash` was already processed successfully.
    async fn seen(&self, hash: &str) -> Result<bool>;

    /// Record the outcome for an input, replacing any earlier entry.
    async fn record(&self, entry: &LedgerEntry) -> Result<()>;
}

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupLedger for SqliteLedger {
    async fn seen(&self, hash: &str) -> Result<bool> {
        let seen: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM processed_inputs WHERE content_hash = ? AND status = 'ok'",
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen)
    }

    async fn record(&self, entry: &LedgerEntry) -> Result<()> {
        let now = crate::timestamp::to_storage(&chrono::Utc::now());
        sqlx::query(
            r#"
            INSERT INTO processed_inputs (content_hash, vendor, name, status, detail, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO UPDATE SET
                vendor = excluded.vendor,
                name = excluded.name,
                status = excluded.status,
                detail = excluded.detail,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(&entry.content_hash)
        .bind(entry.vendor.as_str())
        .bind(&entry.name)
        .bind(entry.status.as_str())
        .bind(&entry.detail)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory ledger for tests and dry runs.
#[derive(Default)]
pub struct MemoryLedger {
    entries: RwLock<HashMap<String, LedgerStatus>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn seen(&self, hash: &str) -> Result<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
        Ok(entries.get(hash) == Some(&LedgerStatus::Ok))
    }

    async fn record(&self, entry: &LedgerEntry) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?
            .insert(entry.content_hash.clone(), entry.status);
        Ok(())
    }
}
