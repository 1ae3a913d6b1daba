//! Conversation normalization entry point.
//!
//! [`parse_input`] takes one input blob and its declared vendor, dispatches
//! to the vendor parser, runs the validation gate over every conversation,
//! and returns a [`ParseOutcome`]. It never fails as a whole: a broken
//! input becomes a single failure entry so sibling inputs keep going.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ParseResult;
use crate::models::{ParsedConversation, Vendor};
use crate::{parser_claude, parser_claude_code, parser_codex, parser_gemini, parser_gpt, validate};

/// Per-input facts a parser may need besides the bytes themselves.
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Input name (file path or `archive.zip!entry`). Used for filename
    /// derived ids and error reporting.
    pub source_name: String,
    /// Instant used where a vendor provides no timestamps.
    pub anchor: DateTime<Utc>,
}

impl ParseContext {
    pub fn new(source_name: impl Into<String>, anchor: DateTime<Utc>) -> Self {
        Self {
            source_name: source_name.into(),
            anchor,
        }
    }
}

/// What a vendor parser hands back: one result per conversation found, keyed
/// by the best identifier available, plus a count of unreadable records.
#[derive(Debug)]
pub struct VendorOutput {
    pub conversations: Vec<(String, ParseResult<ParsedConversation>)>,
    pub skipped_records: usize,
}

impl VendorOutput {
    pub fn single(key: impl Into<String>, result: ParseResult<ParsedConversation>, skipped_records: usize) -> Self {
        Self {
            conversations: vec![(key.into(), result)],
            skipped_records,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The input or conversation could not be parsed.
    Error,
    /// Parsed fine but the validation gate refused it.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationFailure {
    pub key: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Result of normalizing one input.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub conversations: Vec<ParsedConversation>,
    pub failures: Vec<ConversationFailure>,
    pub skipped_records: usize,
    /// Set when the input as a whole could not be parsed.
    pub input_error: Option<String>,
}

impl ParseOutcome {
    pub fn rejected(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Rejected)
            .count()
    }

    /// Conversations that were found but not kept, whether they failed to
    /// parse or were refused by the validation gate.
    pub fn dropped_conversations(&self) -> usize {
        self.failures.len() - usize::from(self.input_error.is_some())
    }

    pub fn errors(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Error)
            .count()
    }
}

/// Dispatch to the vendor parser without validation.
pub fn parse_vendor(vendor: Vendor, bytes: &[u8], ctx: &ParseContext) -> ParseResult<VendorOutput> {
    match vendor {
        Vendor::Gpt => parser_gpt::parse(bytes, ctx),
        Vendor::Claude => parser_claude::parse(bytes, ctx),
        Vendor::ClaudeCode => parser_claude_code::parse(bytes, ctx),
        Vendor::Codex => parser_codex::parse(bytes, ctx),
        Vendor::Gemini => parser_gemini::parse(bytes, ctx),
    }
}

/// Parse and validate one input. Pure apart from logging.
pub fn parse_input(vendor: Vendor, bytes: &[u8], ctx: &ParseContext) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    let output = match parse_vendor(vendor, bytes, ctx) {
        Ok(output) => output,
        Err(e) => {
            warn!(vendor = %vendor, input = %ctx.source_name, error = %e, "input failed to parse");
            outcome.failures.push(ConversationFailure {
                key: ctx.source_name.clone(),
                kind: FailureKind::Error,
                reason: e.to_string(),
            });
            outcome.input_error = Some(e.to_string());
            return outcome;
        }
    };

    outcome.skipped_records = output.skipped_records;
    if output.skipped_records > 0 {
        debug!(
            vendor = %vendor,
            input = %ctx.source_name,
            skipped = output.skipped_records,
            "skipped unreadable records"
        );
    }

    for (key, result) in output.conversations {
        match result {
            Ok(conv) => match validate::check(&conv) {
                Ok(()) => outcome.conversations.push(conv),
                Err(reason) => {
                    warn!(vendor = %vendor, conversation = %key, %reason, "conversation rejected");
                    outcome.failures.push(ConversationFailure {
                        key,
                        kind: FailureKind::Rejected,
                        reason: reason.to_string(),
                    });
                }
            },
            Err(e) => {
                warn!(vendor = %vendor, conversation = %key, error = %e, "conversation failed to parse");
                outcome.failures.push(ConversationFailure {
                    key,
                    kind: FailureKind::Error,
                    reason: e.to_string(),
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ParseContext {
        ParseContext::new("input.json", Utc::now())
    }

    #[test]
    fn broken_input_is_a_single_failure() {
        let outcome = parse_input(Vendor::Claude, b"{not json", &ctx());
        assert!(outcome.conversations.is_empty());
        assert_eq!(outcome.errors(), 1);
        assert_eq!(outcome.failures[0].key, "input.json");
        assert!(outcome.input_error.is_some());
        assert_eq!(outcome.dropped_conversations(), 0);
    }

    #[test]
    fn rejected_conversations_are_reported_not_kept() {
        let bytes = br#"[{"uuid":"c1","name":"n","created_at":"2025-01-01T00:00:00Z","updated_at":"2025-01-01T00:00:00Z",
            "chat_messages":[{"uuid":"m1","sender":"human","created_at":"2025-01-01T00:00:00Z","content":[{"type":"text","text":"hi"}]}]}]"#;
        let outcome = parse_input(Vendor::Claude, bytes, &ctx());
        assert!(outcome.conversations.is_empty());
        assert_eq!(outcome.rejected(), 1);
        assert_eq!(outcome.failures[0].reason, "no assistant messages");
        assert_eq!(outcome.dropped_conversations(), 1);
    }
}
