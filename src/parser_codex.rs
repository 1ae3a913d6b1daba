//! Codex session log (`rollout-<ts>-<uuid>.jsonl`) normalizer.
//!
//! Codex lines carry no message ids. Each id is derived from the session
//! namespace, the line timestamp and the canonical payload encoding, so a
//! re-sync of the same log yields the same ids (see [`crate::identity`]).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::chain::{self, LinearCursor, RoundCounter, RoundRule};
use crate::content::{self, ContentShape};
use crate::error::{ParseError, ParseResult};
use crate::identity;
use crate::models::{ContentType, ParsedConversation, ParsedMessage, Role};
use crate::normalize::{ParseContext, VendorOutput};
use crate::timestamp;
use crate::title::{self, TitleStyle};

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Option<Box<RawValue>>,
    #[serde(default)]
    id: String,
}

/// Parse one rollout log into a single conversation.
pub fn parse(bytes: &[u8], ctx: &ParseContext) -> ParseResult<VendorOutput> {
    let text = String::from_utf8_lossy(bytes);
    let mut meta_id: Option<String> = None;
    let mut items: Vec<(String, Payload)> = Vec::new();
    let mut skipped = 0usize;

    for raw in text.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        let line: LogLine = match serde_json::from_str(raw) {
            Ok(line) => line,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let Some(payload) = line.payload else {
            continue;
        };
        match line.kind.as_str() {
            "session_meta" if !payload.id.trim().is_empty() => {
                meta_id = Some(payload.id.trim().to_string());
            }
            "response_item" if payload.kind == "message" => items.push((line.timestamp, payload)),
            _ => {}
        }
    }

    // A meta id that is not a UUID yields to the file name's UUID. Only
    // when neither is usable does the conversation fail on identity.
    let from_name = identity::session_id_from_name(&ctx.source_name);
    let session_id = match (meta_id, from_name) {
        (Some(meta), _) if uuid::Uuid::parse_str(&meta).is_ok() => meta,
        (_, Some(name)) => name,
        (Some(meta), None) => meta,
        (None, None) => {
            return Err(ParseError::missing_session(
                "session_meta not found or missing id",
            ))
        }
    };

    let result = build_conversation(&session_id, items, ctx);
    Ok(VendorOutput::single(session_id, result, skipped))
}

fn build_conversation(
    session_id: &str,
    items: Vec<(String, Payload)>,
    ctx: &ParseContext,
) -> ParseResult<ParsedConversation> {
    let mut cursor = LinearCursor::default();
    let mut rounds = RoundCounter::new(RoundRule::OnUser { start: 0 });
    let mut messages = Vec::with_capacity(items.len());

    for (ts, payload) in items {
        let Some(role) = Role::from_vendor(&payload.role) else {
            continue;
        };
        if role == Role::System {
            continue;
        }
        let raw_content = payload.content.as_deref().map(RawValue::get);
        let text = raw_content
            .and_then(|raw| serde_json::from_str::<ContentShape>(raw).ok())
            .map(|shape| content::extract_codex(&shape))
            .unwrap_or_default();
        if text.is_empty() {
            continue;
        }

        let canonical = identity::canonical_payload(&payload.kind, &payload.role, raw_content, &payload.id);
        let id = identity::derive_message_id(session_id, &ts, &canonical)?;
        let created_at: DateTime<Utc> = timestamp::parse_rfc3339(&ts)
            .ok_or_else(|| ParseError::Timestamp(format!("message timestamp '{}'", ts)))?;

        messages.push(ParsedMessage {
            parent_id: cursor.advance(&id),
            id,
            child_id: None,
            round_index: rounds.next(role),
            role,
            content_type: ContentType::Text,
            content_text: text,
            content_images: Vec::new(),
            content_videos: Vec::new(),
            tool_data: None,
            created_at,
        });
    }

    chain::link_children(&mut messages);
    let title = title::resolve_title(None, None, &messages, TitleStyle::CODEX);
    let (created_at, updated_at) = timestamp::bounds(messages.iter().map(|m| m.created_at))
        .unwrap_or((ctx.anchor, ctx.anchor));

    Ok(ParsedConversation {
        id: session_id.to_string(),
        title,
        metadata: serde_json::Map::new(),
        created_at,
        updated_at,
        messages,
    })
}
