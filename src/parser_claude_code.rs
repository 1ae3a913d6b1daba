//! Claude Code session log (`<session>.jsonl`) normalizer.
//!
//! One JSON object per line. Lines without a `message`, meta lines and
//! sidechain lines are dropped; unparseable lines are counted and skipped.
//! User lines that only carry tool results are emitted with the `tool` role
//! so they do not open a new round.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::chain::{self, LinearCursor, RoundCounter, RoundRule};
use crate::content::{self, ContentShape, Part};
use crate::error::{ParseError, ParseResult};
use crate::identity;
use crate::models::{ParsedConversation, ParsedMessage, Role};
use crate::normalize::{ParseContext, VendorOutput};
use crate::timestamp;
use crate::title::{self, TitleStyle};

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    uuid: String,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<LogMessage>,
    #[serde(default, rename = "isMeta")]
    is_meta: bool,
    #[serde(default, rename = "isSidechain")]
    is_sidechain: bool,
}

#[derive(Debug, Deserialize)]
struct LogMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Option<ContentShape>,
}

impl LogLine {
    fn carries_message(&self) -> bool {
        self.message.is_some() && !self.is_meta && !self.is_sidechain
    }
}

/// Parse one session log into a single conversation.
pub fn parse(bytes: &[u8], ctx: &ParseContext) -> ParseResult<VendorOutput> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = Vec::new();
    let mut skipped = 0usize;

    for raw in text.lines() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(raw) {
            // A message line with no uuid cannot be linked into the chain.
            Ok(line) if line.carries_message() && line.uuid.trim().is_empty() => skipped += 1,
            Ok(line) => lines.push(line),
            Err(_) => skipped += 1,
        }
    }

    if lines.is_empty() {
        return Err(ParseError::structure("no valid messages found"));
    }

    let session_id = lines
        .iter()
        .filter_map(|l| l.session_id.as_deref())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| identity::session_id_from_name(&ctx.source_name));
    let Some(session_id) = session_id else {
        return Err(ParseError::missing_session("no session ID found"));
    };

    let result = build_conversation(&session_id, lines, ctx);
    Ok(VendorOutput::single(session_id, result, skipped))
}

fn only_tool_results(shape: &ContentShape) -> bool {
    match shape {
        ContentShape::Parts(parts) if !parts.is_empty() => parts.iter().all(|p| match p {
            Part::Object(obj) => obj.get("type").and_then(|t| t.as_str()) == Some("tool_result"),
            _ => false,
        }),
        _ => false,
    }
}

fn build_conversation(
    session_id: &str,
    lines: Vec<LogLine>,
    ctx: &ParseContext,
) -> ParseResult<ParsedConversation> {
    let times: Vec<Option<DateTime<Utc>>> = lines
        .iter()
        .map(|l| l.timestamp.as_deref().and_then(timestamp::parse_rfc3339))
        .collect();
    let bounds = timestamp::bounds(times.iter().flatten().copied());
    let fallback = bounds.map(|b| b.0).unwrap_or(ctx.anchor);

    let mut cursor = LinearCursor::default();
    let mut rounds = RoundCounter::new(RoundRule::OnUser { start: 0 });
    let mut messages = Vec::new();

    for (line, at) in lines.into_iter().zip(times) {
        if line.is_meta || line.is_sidechain {
            continue;
        }
        let Some(message) = line.message else {
            continue;
        };
        let role = match Role::from_vendor(&message.role) {
            Some(Role::System) | None => continue,
            Some(role) => role,
        };
        let Some(shape) = message.content else {
            continue;
        };

        let extracted = content::extract_claude_code(&shape);
        if extracted.text.is_empty() && extracted.tool_data.is_none() {
            continue;
        }
        let role = if role == Role::User && only_tool_results(&shape) {
            Role::Tool
        } else {
            role
        };

        messages.push(ParsedMessage {
            parent_id: cursor.advance(&line.uuid),
            id: line.uuid,
            child_id: None,
            round_index: rounds.next(role),
            role,
            content_type: extracted.content_type,
            content_text: extracted.text,
            content_images: extracted.images,
            content_videos: Vec::new(),
            tool_data: extracted.tool_data,
            created_at: at.unwrap_or(fallback),
        });
    }

    chain::link_children(&mut messages);
    let title = title::resolve_title(None, None, &messages, TitleStyle::CLAUDE_CODE);
    let (created_at, updated_at) = bounds.unwrap_or((ctx.anchor, ctx.anchor));

    Ok(ParsedConversation {
        id: session_id.to_string(),
        title,
        metadata: serde_json::Map::new(),
        created_at,
        updated_at,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::validate;
    use serde_json::{json, Value};

    const SESSION: &str = "0b9e6a52-5f5d-4c6e-9a1e-2f4f1c0d8a11";

    fn ctx() -> ParseContext {
        ParseContext::new(format!("projects/demo/{}.jsonl", SESSION), Utc::now())
    }

    fn line(uuid: &str, role: &str, content: Value, ts: &str) -> String {
        json!({
            "type": role,
            "uuid": uuid,
            "parentUuid": null,
            "sessionId": SESSION,
            "timestamp": ts,
            "message": {"role": role, "content": content}
        })
        .to_string()
    }

    fn log(lines: &[String]) -> Vec<u8> {
        lines.join("\n").into_bytes()
    }

    fn parse_one(bytes: &[u8]) -> (ParsedConversation, usize) {
        let mut out = parse(bytes, &ctx()).unwrap();
        let skipped = out.skipped_records;
        (out.conversations.remove(0).1.unwrap(), skipped)
    }

    #[test]
    fn tool_flow_keeps_rounds_and_tool_data() {
        let bytes = log(&[
            line("u1", "user", json!("<command-name>/review</command-name> check the diff"), "2025-10-01T10:00:00Z"),
            line("a1", "assistant", json!([
                {"type": "text", "text": "Running tests"},
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "cargo test"}}
            ]), "2025-10-01T10:00:01Z"),
            line("r1", "user", json!([
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
            ]), "2025-10-01T10:00:02Z"),
            line("a2", "assistant", json!([{"type": "text", "text": "All green"}]), "2025-10-01T10:00:03Z"),
        ]);
        let (conv, skipped) = parse_one(&bytes);
        assert_eq!(skipped, 0);
        assert_eq!(conv.id, SESSION);
        assert_eq!(conv.messages.len(), 4);
        assert_eq!(conv.messages[1].content_type, ContentType::ToolUse);
        assert_eq!(conv.messages[1].tool_data.as_ref().unwrap().name, "Bash");
        assert_eq!(conv.messages[2].role, Role::Tool);
        assert_eq!(conv.messages[2].content_type, ContentType::ToolResult);
        let rounds: Vec<i64> = conv.messages.iter().map(|m| m.round_index).collect();
        assert_eq!(rounds, vec![1, 1, 1, 1]);
        assert_eq!(conv.title, "/review check the diff");
        assert_eq!(validate::check(&conv), Ok(()));
    }

    #[test]
    fn drops_meta_sidechain_and_bad_lines() {
        let mut meta: Value = serde_json::from_str(&line("m", "user", json!("caveat"), "2025-10-01T09:59:00Z")).unwrap();
        meta["isMeta"] = json!(true);
        let mut side: Value = serde_json::from_str(&line("s", "assistant", json!("side"), "2025-10-01T10:00:05Z")).unwrap();
        side["isSidechain"] = json!(true);
        let bytes = log(&[
            meta.to_string(),
            "{broken".to_string(),
            line("u1", "user", json!("hi"), "2025-10-01T10:00:00Z"),
            json!({"type": "file-history-snapshot", "sessionId": SESSION}).to_string(),
            side.to_string(),
            line("a1", "assistant", json!([{"type": "text", "text": "hello"}]), "2025-10-01T10:00:01Z"),
        ]);
        let (conv, skipped) = parse_one(&bytes);
        assert_eq!(skipped, 1);
        let ids: Vec<&str> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "a1"]);
        assert_eq!(conv.messages[1].parent_id, "u1");
        assert_eq!(conv.created_at.to_rfc3339(), "2025-10-01T09:59:00+00:00");
        assert_eq!(conv.updated_at.to_rfc3339(), "2025-10-01T10:00:05+00:00");
    }

    #[test]
    fn one_bad_line_in_ten_is_skipped() {
        let mut lines = Vec::new();
        for i in 0..10u32 {
            if i == 6 {
                lines.push("{\"uuid\": \"x\", \"message\": ".to_string());
                continue;
            }
            let (role, body) = if i % 2 == 0 {
                ("user", json!(format!("question {}", i)))
            } else {
                ("assistant", json!([{"type": "text", "text": format!("answer {}", i)}]))
            };
            lines.push(line(&format!("m{}", i), role, body, &format!("2025-10-01T10:00:{:02}Z", i)));
        }
        let (conv, skipped) = parse_one(&log(&lines));
        assert_eq!(skipped, 1);
        assert_eq!(conv.messages.len(), 9);
        assert_eq!(conv.messages[6].parent_id, "m5");
        assert_eq!(validate::check(&conv), Ok(()));
    }

    #[test]
    fn message_lines_without_uuid_are_skipped() {
        let bytes = log(&[
            line("u1", "user", json!("hi"), "2025-10-01T10:00:00Z"),
            line("", "assistant", json!([{"type": "text", "text": "lost"}]), "2025-10-01T10:00:01Z"),
            json!({
                "sessionId": SESSION, "timestamp": "2025-10-01T10:00:02Z",
                "message": {"role": "assistant", "content": "also lost"}
            })
            .to_string(),
            line("a1", "assistant", json!([{"type": "text", "text": "hello"}]), "2025-10-01T10:00:03Z"),
        ]);
        let (conv, skipped) = parse_one(&bytes);
        assert_eq!(skipped, 2);
        let ids: Vec<&str> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "a1"]);
        assert_eq!(conv.messages[1].parent_id, "u1");
        assert_eq!(validate::check(&conv), Ok(()));
    }

    #[test]
    fn session_id_from_file_name() {
        let raw = json!({
            "uuid": "u1", "timestamp": "2025-10-01T10:00:00Z",
            "message": {"role": "user", "content": "hi"}
        })
        .to_string();
        let (conv, _) = parse_one(raw.as_bytes());
        assert_eq!(conv.id, SESSION);
    }

    #[test]
    fn missing_session_is_an_error() {
        let raw = json!({"uuid": "u1", "message": {"role": "user", "content": "hi"}}).to_string();
        let err = parse(raw.as_bytes(), &ParseContext::new("notes.jsonl", Utc::now())).unwrap_err();
        assert_eq!(err.to_string(), "no session ID found");
    }

    #[test]
    fn empty_log_is_an_error() {
        assert!(parse(b"\n\n", &ctx()).is_err());
    }
}
