//! Ingestion pipeline orchestration.
//!
//! Coordinates the full sync flow: drop scan → ledger filter → parallel
//! parse + validation → sequential upsert → ledger record. Parses run on
//! the blocking pool, bounded by `ingest.workers`; results are applied to
//! the sink in input order so same-id upserts are serialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::feeder::{self, DropFilter, DropInput, DropScan, UnreadableInput};
use crate::ledger::{DedupLedger, LedgerEntry, LedgerStatus, SqliteLedger};
use crate::models::Vendor;
use crate::normalize::{self, ConversationFailure, FailureKind, ParseContext, ParseOutcome};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::sink::{ConversationSink, SinkReport, SqliteSink};

/// Flags shared by every vendor in one `chx sync` invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Ignore the ledger and reprocess every input.
    pub full: bool,
    /// Parse and validate, but write nothing.
    pub dry_run: bool,
    /// Process at most this many inputs (after the ledger filter).
    pub limit: Option<usize>,
    /// Override the configured drop root (file or directory).
    pub path: Option<PathBuf>,
}

/// Tally for one vendor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub inputs: usize,
    pub skipped_seen: usize,
    pub sink: SinkReport,
    pub parsed_conversations: usize,
    pub rejected: usize,
    pub failed_inputs: usize,
    pub skipped_lines: usize,
    pub failures: Vec<ConversationFailure>,
}

impl SyncReport {
    /// Count files the scan could not read as failed inputs. They have no
    /// content hash, so the ledger never sees them and the next run retries.
    pub fn add_unreadable(&mut self, unreadable: Vec<UnreadableInput>) {
        self.inputs += unreadable.len();
        self.failed_inputs += unreadable.len();
        self.failures.extend(unreadable.into_iter().map(|u| ConversationFailure {
            key: u.name,
            kind: FailureKind::Error,
            reason: u.error,
        }));
    }
}

pub async fn run_sync(
    config: &Config,
    target: &str,
    opts: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<()> {
    let vendors: Vec<Vendor> = if target == "all" {
        if opts.path.is_some() {
            bail!("--path requires a single vendor, not 'all'");
        }
        let configured: Vec<Vendor> = Vendor::ALL
            .into_iter()
            .filter(|v| config.source(*v).is_some())
            .collect();
        if configured.is_empty() {
            bail!("No sources configured. Add a [sources.<vendor>] table to the config.");
        }
        configured
    } else {
        vec![target.parse()?]
    };

    let pool = db::connect(config).await?;
    let sink = SqliteSink::new(pool.clone());
    let ledger = SqliteLedger::new(pool.clone());

    for vendor in &vendors {
        let scan = match discover(config, *vendor, opts.path.as_deref()) {
            Ok(scan) => scan,
            Err(e) if vendors.len() > 1 => {
                warn!(vendor = %vendor, error = %e, "skipping vendor");
                println!("sync {}", vendor);
                println!("  error: {:#}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut report = sync_inputs(
            *vendor,
            scan.inputs,
            config.ingest.workers,
            &sink,
            &ledger,
            opts,
            progress,
        )
        .await?;
        report.add_unreadable(scan.unreadable);
        print_report(*vendor, &report, opts.dry_run);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Resolve and scan the drop for `vendor`.
pub fn discover(config: &Config, vendor: Vendor, path: Option<&Path>) -> Result<DropScan> {
    let source = config.source(vendor);
    let filter = DropFilter::new(vendor, source)?;

    let (root, follow) = match (path, source) {
        (Some(p), s) => (p.to_path_buf(), s.map(|s| s.follow_symlinks).unwrap_or(false)),
        (None, Some(s)) => (s.root.clone(), s.follow_symlinks),
        (None, None) => bail!(
            "No drop configured for '{}'. Add [sources.{}] to the config or pass --path.",
            vendor,
            vendor
        ),
    };

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        let mut scan = DropScan::default();
        match feeder::read_input(&root, &name, &filter) {
            Ok(inputs) => scan.inputs = inputs,
            Err(e) => {
                warn!(vendor = %vendor, input = %name, error = %format!("{:#}", e), "unreadable input");
                scan.unreadable.push(UnreadableInput {
                    name,
                    error: format!("{:#}", e),
                });
            }
        }
        return Ok(scan);
    }
    feeder::scan_drop(&root, &filter, follow)
}

/// Parse, validate and store a set of inputs for one vendor.
pub async fn sync_inputs(
    vendor: Vendor,
    inputs: Vec<DropInput>,
    workers: usize,
    sink: &dyn ConversationSink,
    ledger: &dyn DedupLedger,
    opts: &SyncOptions,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    let mut report = SyncReport {
        inputs: inputs.len(),
        ..Default::default()
    };

    let mut pending = Vec::with_capacity(inputs.len());
    for input in inputs {
        if !opts.full && ledger.seen(&input.hash).await? {
            report.skipped_seen += 1;
            continue;
        }
        pending.push(input);
    }
    if let Some(limit) = opts.limit {
        pending.truncate(limit);
    }
    progress.report(SyncProgressEvent::Scanned {
        vendor,
        found: report.inputs as u64,
        fresh: pending.len() as u64,
    });

    let meta: Vec<(String, String)> = pending
        .iter()
        .map(|i| (i.name.clone(), i.hash.clone()))
        .collect();
    let outcomes = parse_parallel(vendor, pending, workers).await?;
    let total = outcomes.len() as u64;

    for (n, ((name, hash), outcome)) in meta.into_iter().zip(outcomes).enumerate() {
        report.skipped_lines += outcome.skipped_records;
        report.rejected += outcome.dropped_conversations();
        report.parsed_conversations += outcome.conversations.len();

        let mut status = LedgerStatus::Ok;
        let mut detail = None;

        if let Some(err) = &outcome.input_error {
            report.failed_inputs += 1;
            status = LedgerStatus::Failed;
            detail = Some(err.clone());
        } else if !opts.dry_run && !outcome.conversations.is_empty() {
            match sink.upsert_batch(vendor, &outcome.conversations).await {
                Ok(mut stored) => {
                    let failed = std::mem::take(&mut stored.failures);
                    if !failed.is_empty() {
                        report.failed_inputs += 1;
                        status = LedgerStatus::Failed;
                        detail = Some(
                            failed
                                .iter()
                                .map(|f| format!("{}: {}", f.id, f.error))
                                .collect::<Vec<_>>()
                                .join("; "),
                        );
                        report.failures.extend(failed.into_iter().map(|f| ConversationFailure {
                            key: f.id,
                            kind: FailureKind::Error,
                            reason: f.error,
                        }));
                    }
                    report.sink.merge(stored);
                }
                Err(e) => {
                    warn!(vendor = %vendor, input = %name, error = %format!("{:#}", e), "sink write failed");
                    report.failed_inputs += 1;
                    status = LedgerStatus::Failed;
                    detail = Some(format!("{:#}", e));
                }
            }
        }
        report.failures.extend(outcome.failures);

        progress.report(SyncProgressEvent::Stored {
            vendor,
            n: n as u64 + 1,
            total,
            input: name.clone(),
        });

        if !opts.dry_run {
            ledger
                .record(&LedgerEntry {
                    content_hash: hash,
                    vendor,
                    name,
                    status,
                    detail,
                })
                .await?;
        }
    }

    progress.report(SyncProgressEvent::Done {
        vendor,
        conversations: report.parsed_conversations as u64,
        rejected: report.rejected as u64,
    });
    Ok(report)
}

/// Run `parse_input` for every input on the blocking pool, at most
/// `workers` at a time. Results come back in input order.
async fn parse_parallel(vendor: Vendor, inputs: Vec<DropInput>, workers: usize) -> Result<Vec<ParseOutcome>> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    let count = inputs.len();
    let names: Vec<String> = inputs.iter().map(|i| i.name.clone()).collect();

    for (idx, input) in inputs.into_iter().enumerate() {
        let permit = semaphore.clone().acquire_owned().await?;
        set.spawn(async move {
            let parsed = tokio::task::spawn_blocking(move || {
                let ctx = ParseContext::new(input.name.clone(), input.modified);
                normalize::parse_input(vendor, &input.bytes, &ctx)
            })
            .await;
            drop(permit);
            (idx, parsed)
        });
    }

    let mut slots: Vec<Option<ParseOutcome>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (idx, parsed) = joined?;
        let outcome = parsed.unwrap_or_else(|e| ParseOutcome {
            input_error: Some(format!("parser task failed: {}", e)),
            ..Default::default()
        });
        slots[idx] = Some(outcome);
    }

    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.unwrap_or_else(|| ParseOutcome {
                input_error: Some(format!("no result for {}", names[idx])),
                ..Default::default()
            })
        })
        .collect())
}

fn print_report(vendor: Vendor, report: &SyncReport, dry_run: bool) {
    if dry_run {
        println!("sync {} (dry-run)", vendor);
    } else {
        println!("sync {}", vendor);
    }
    println!("  inputs: {}", report.inputs);
    println!("  skipped (already processed): {}", report.skipped_seen);
    if dry_run {
        println!("  conversations parsed: {}", report.parsed_conversations);
    } else {
        println!("  conversations upserted: {}", report.sink.conversations());
        println!("  messages upserted: {}", report.sink.messages());
    }
    println!("  rejected: {}", report.rejected);
    println!("  failed inputs: {}", report.failed_inputs);
    println!("  skipped lines: {}", report.skipped_lines);
    for failure in &report.failures {
        println!("  skipped: {}: {}", failure.key, failure.reason);
    }
}
