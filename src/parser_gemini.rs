//! Gemini export normalizer.
//!
//! One JSON object per file with a flat `data` array and no ids or
//! timestamps. The file stem is the conversation id, message ids and times
//! are synthesized from array position.

use std::path::Path;

use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;

use crate::chain::{self, RoundCounter, RoundRule};
use crate::error::{ParseError, ParseResult};
use crate::models::{ContentType, ParsedConversation, ParsedMessage, Role, UNTITLED};
use crate::normalize::{ParseContext, VendorOutput};

#[derive(Debug, Deserialize)]
struct GeminiExport {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    round_count: i64,
    #[serde(default)]
    total_count: i64,
    #[serde(default)]
    data: Vec<GeminiMessage>,
}

#[derive(Debug, Deserialize)]
struct GeminiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    files: Vec<GeminiFile>,
}

#[derive(Debug, Deserialize)]
struct GeminiFile {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    filename: String,
}

fn conversation_id(source_name: &str) -> Option<String> {
    let file = source_name.rsplit(['/', '\\', '!']).next().unwrap_or(source_name);
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse one Gemini export file.
pub fn parse(bytes: &[u8], ctx: &ParseContext) -> ParseResult<VendorOutput> {
    let export: GeminiExport = serde_json::from_slice(bytes)?;
    let id = conversation_id(&ctx.source_name)
        .ok_or_else(|| ParseError::structure("cannot derive conversation id from file name"))?;
    let conv = build_conversation(&id, export, ctx);
    Ok(VendorOutput::single(id, Ok(conv), 0))
}

fn build_conversation(id: &str, export: GeminiExport, ctx: &ParseContext) -> ParsedConversation {
    let mut rounds = RoundCounter::new(RoundRule::UserAfterAssistant { start: 1 });
    let mut messages = Vec::with_capacity(export.data.len());

    for (i, msg) in export.data.into_iter().enumerate() {
        let role = match Role::from_vendor(&msg.role) {
            Some(Role::System) | None => continue,
            Some(role) => role,
        };

        let mut images = Vec::new();
        let mut videos = Vec::new();
        if msg.content_type == "mixed" {
            for file in msg.files {
                match file.kind.as_str() {
                    "image" => images.push(file.url),
                    "video" => videos.push(format!("{}-{}", id, file.filename)),
                    _ => {}
                }
            }
        }

        let content_type = ContentType::from_media(!msg.content.is_empty(), images.len(), videos.len());
        let message = ParsedMessage {
            id: format!("{}-msg-{}", id, i),
            parent_id: String::new(),
            child_id: None,
            round_index: rounds.next(role),
            role,
            content_type,
            content_text: msg.content,
            content_images: images,
            content_videos: videos,
            tool_data: None,
            created_at: ctx.anchor + Duration::seconds(i as i64),
        };
        if message.is_noise() {
            continue;
        }
        messages.push(message);
    }

    chain::link_children(&mut messages);

    let mut metadata = serde_json::Map::new();
    metadata.insert("round_count".to_string(), Value::from(export.round_count));
    metadata.insert("total_count".to_string(), Value::from(export.total_count));

    let title = export
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());
    let updated_at = messages.last().map(|m| m.created_at).unwrap_or(ctx.anchor);

    ParsedConversation {
        id: id.to_string(),
        title,
        metadata,
        created_at: ctx.anchor,
        updated_at,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ctx(name: &str) -> ParseContext {
        ParseContext::new(name, Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap())
    }

    fn parse_one(value: Value, name: &str) -> ParsedConversation {
        let bytes = serde_json::to_vec(&value).unwrap();
        parse(&bytes, &ctx(name)).unwrap().conversations.remove(0).1.unwrap()
    }

    #[test]
    fn synthesizes_ids_times_and_rounds() {
        let conv = parse_one(
            json!({
                "title": "Trip planning",
                "round_count": 2,
                "total_count": 5,
                "data": [
                    {"role": "user", "content_type": "text", "content": "plan a trip"},
                    {"role": "user", "content_type": "text", "content": "to Kyoto"},
                    {"role": "model", "content_type": "text", "content": "sure"},
                    {"role": "user", "content_type": "text", "content": "budget?"},
                    {"role": "assistant", "content_type": "text", "content": "cheap"}
                ]
            }),
            "exports/gemini/abc123.json",
        );
        assert_eq!(conv.id, "abc123");
        assert_eq!(conv.title, "Trip planning");
        assert_eq!(conv.messages[3].id, "abc123-msg-3");
        let rounds: Vec<i64> = conv.messages.iter().map(|m| m.round_index).collect();
        assert_eq!(rounds, vec![1, 1, 1, 2, 2]);
        assert!(conv.messages.iter().all(|m| m.parent_id.is_empty()));
        assert_eq!(conv.messages[4].created_at, ctx("x").anchor + Duration::seconds(4));
        assert_eq!(conv.updated_at, conv.messages[4].created_at);
        assert_eq!(conv.metadata["round_count"], 2);
        assert_eq!(validate::check(&conv), Ok(()));
    }

    #[test]
    fn mixed_files_become_media() {
        let conv = parse_one(
            json!({
                "data": [
                    {"role": "user", "content_type": "mixed", "content": "", "files": [
                        {"type": "image", "url": "https://img/1.png", "filename": "1.png"},
                        {"type": "video", "url": "https://v/clip.mp4", "filename": "clip.mp4"}
                    ]},
                    {"role": "assistant", "content_type": "text", "content": "nice", "files": [
                        {"type": "image", "url": "https://ignored", "filename": "x"}
                    ]}
                ]
            }),
            "trip.json",
        );
        let first = &conv.messages[0];
        assert_eq!(first.content_images, vec!["https://img/1.png"]);
        assert_eq!(first.content_videos, vec!["trip-clip.mp4"]);
        assert_eq!(first.content_type, ContentType::Image);
        assert!(conv.messages[1].content_images.is_empty());
        assert_eq!(conv.title, UNTITLED);
    }

    #[test]
    fn empty_messages_keep_original_index() {
        let conv = parse_one(
            json!({"data": [
                {"role": "user", "content_type": "text", "content": ""},
                {"role": "user", "content_type": "text", "content": "hi"},
                {"role": "model", "content_type": "text", "content": "hello"}
            ]}),
            "c.json",
        );
        let ids: Vec<&str> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c-msg-1", "c-msg-2"]);
    }

    #[test]
    fn archive_entry_name_uses_entry_stem() {
        let conv = parse_one(
            json!({"data": [{"role": "user", "content_type": "text", "content": "q"}]}),
            "takeout.zip!gemini/conv-9.json",
        );
        assert_eq!(conv.id, "conv-9");
    }
}
