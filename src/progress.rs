//! Sync progress on stderr.
//!
//! stdout carries the tally that scripts read, so everything here goes to
//! stderr: a human line per step, one JSON object per line, or nothing.

use std::io::Write;

use crate::models::Vendor;

#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// The drop was walked. `fresh` of `found` inputs are not in the ledger.
    Scanned { vendor: Vendor, found: u64, fresh: u64 },
    /// Input `n` of `total` was parsed and stored (or recorded as failed).
    Stored {
        vendor: Vendor,
        n: u64,
        total: u64,
        input: String,
    },
    Done {
        vendor: Vendor,
        conversations: u64,
        rejected: u64,
    },
}

impl SyncProgressEvent {
    fn vendor(&self) -> Vendor {
        match self {
            SyncProgressEvent::Scanned { vendor, .. }
            | SyncProgressEvent::Stored { vendor, .. }
            | SyncProgressEvent::Done { vendor, .. } => *vendor,
        }
    }
}

pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// `chx sync codex  [  3/120] rollout-....jsonl`
pub struct HumanProgress;

impl SyncProgressReporter for HumanProgress {
    fn report(&self, event: SyncProgressEvent) {
        let vendor = event.vendor();
        let line = match &event {
            SyncProgressEvent::Scanned { found, fresh, .. } => {
                format!("chx sync {}  {} inputs, {} new", vendor, group_digits(*found), group_digits(*fresh))
            }
            SyncProgressEvent::Stored { n, total, input, .. } => {
                let width = total.to_string().len();
                format!("chx sync {}  [{:>width$}/{}] {}", vendor, n, total, input, width = width)
            }
            SyncProgressEvent::Done {
                conversations,
                rejected,
                ..
            } => format!(
                "chx sync {}  done: {} conversations, {} rejected",
                vendor,
                group_digits(*conversations),
                group_digits(*rejected)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
        let _ = err.flush();
    }
}

pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Scanned { vendor, found, fresh } => serde_json::json!({
                "event": "scanned",
                "vendor": vendor,
                "found": found,
                "fresh": fresh,
            }),
            SyncProgressEvent::Stored {
                vendor,
                n,
                total,
                input,
            } => serde_json::json!({
                "event": "stored",
                "vendor": vendor,
                "n": n,
                "total": total,
                "input": input,
            }),
            SyncProgressEvent::Done {
                vendor,
                conversations,
                rejected,
            } => serde_json::json!({
                "event": "done",
                "vendor": vendor,
                "conversations": conversations,
                "rejected": rejected,
            }),
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// 1234567 -> "1,234,567"
fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: '{}'. Use off, human, or json.", other),
        }
    }
}
