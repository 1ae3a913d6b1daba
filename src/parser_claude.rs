//! Claude web export (`conversations.json`) normalizer.

use serde::Deserialize;
use serde_json::Value;

use crate::chain::{self, LinearCursor, RoundCounter, RoundRule};
use crate::content::{self, Part};
use crate::error::{ParseError, ParseResult};
use crate::models::{ContentType, ParsedConversation, ParsedMessage, Role};
use crate::normalize::{ParseContext, VendorOutput};
use crate::timestamp;
use crate::title::{self, TitleStyle};

#[derive(Debug, Deserialize)]
struct ClaudeConversation {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    chat_messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<Vec<Part>>,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    created_at: String,
}

/// Parse a Claude export: a JSON array of conversations.
pub fn parse(bytes: &[u8], ctx: &ParseContext) -> ParseResult<VendorOutput> {
    let items: Vec<Value> = serde_json::from_slice(bytes)?;
    let mut output = VendorOutput {
        conversations: Vec::with_capacity(items.len()),
        skipped_records: 0,
    };

    for (i, item) in items.into_iter().enumerate() {
        let conv: ClaudeConversation = match serde_json::from_value(item) {
            Ok(c) => c,
            Err(_) => {
                output.skipped_records += 1;
                continue;
            }
        };
        let key = if conv.uuid.is_empty() {
            format!("{}[{}]", ctx.source_name, i)
        } else {
            conv.uuid.clone()
        };
        output.conversations.push((key, parse_conversation(conv)));
    }
    Ok(output)
}

fn parse_time(raw: &str, what: &str) -> ParseResult<chrono::DateTime<chrono::Utc>> {
    timestamp::parse_rfc3339(raw)
        .ok_or_else(|| ParseError::Timestamp(format!("{} '{}'", what, raw)))
}

fn parse_conversation(conv: ClaudeConversation) -> ParseResult<ParsedConversation> {
    if conv.uuid.trim().is_empty() {
        return Err(ParseError::structure("conversation has no uuid"));
    }
    if conv.chat_messages.is_empty() {
        return Err(ParseError::structure("no chat messages"));
    }
    let created_at = parse_time(&conv.created_at, "created_at")?;
    let updated_at = parse_time(&conv.updated_at, "updated_at")?;

    let mut cursor = LinearCursor::default();
    let mut rounds = RoundCounter::new(RoundRule::OnUser { start: 0 });
    let mut messages = Vec::with_capacity(conv.chat_messages.len());

    for msg in &conv.chat_messages {
        let role = match Role::from_vendor(&msg.sender) {
            Some(Role::System) | None => continue,
            Some(role) => role,
        };

        let mut text = content::extract_claude_items(msg.content.as_deref().unwrap_or_default());
        if text.is_empty() {
            text = msg.text.clone().unwrap_or_default();
        }
        if text.is_empty() {
            continue;
        }

        let created = parse_time(&msg.created_at, "message created_at")?;
        messages.push(ParsedMessage {
            parent_id: cursor.advance(&msg.uuid),
            id: msg.uuid.clone(),
            child_id: None,
            round_index: rounds.next(role),
            role,
            content_type: ContentType::Text,
            content_text: text,
            content_images: Vec::new(),
            content_videos: Vec::new(),
            tool_data: None,
            created_at: created,
        });
    }

    chain::link_children(&mut messages);
    let title = title::resolve_title(
        conv.name.as_deref(),
        conv.summary.as_deref(),
        &messages,
        TitleStyle::CLAUDE,
    );

    Ok(ParsedConversation {
        id: conv.uuid,
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
    use crate::validate;
    use chrono::Utc;
    use serde_json::json;

    fn ctx() -> ParseContext {
        ParseContext::new("conversations.json", Utc::now())
    }

    fn export(messages: Value, name: &str) -> Vec<u8> {
        serde_json::to_vec(&json!([{
            "uuid": "c-1",
            "name": name,
            "summary": "",
            "created_at": "2025-11-02T22:33:11.888588Z",
            "updated_at": "2025-11-02T23:00:00Z",
            "chat_messages": messages
        }]))
        .unwrap()
    }

    fn msg(uuid: &str, sender: &str, text: &str, at: &str) -> Value {
        json!({
            "uuid": uuid,
            "sender": sender,
            "text": "",
            "created_at": at,
            "content": [{"type": "text", "text": text}]
        })
    }

    fn parse_one(bytes: &[u8]) -> ParseResult<ParsedConversation> {
        let mut out = parse(bytes, &ctx()).unwrap();
        out.conversations.remove(0).1
    }

    #[test]
    fn linear_chain_with_rounds() {
        let bytes = export(
            json!([
                msg("m1", "human", "what is rust", "2025-11-02T22:33:12Z"),
                msg("m2", "assistant", "a language", "2025-11-02T22:33:13Z"),
                msg("m3", "human", "why", "2025-11-02T22:33:14Z"),
                msg("m4", "assistant", "safety", "2025-11-02T22:33:15Z"),
            ]),
            "",
        );
        let conv = parse_one(&bytes).unwrap();
        let parents: Vec<&str> = conv.messages.iter().map(|m| m.parent_id.as_str()).collect();
        assert_eq!(parents, vec!["", "m1", "m2", "m3"]);
        let rounds: Vec<i64> = conv.messages.iter().map(|m| m.round_index).collect();
        assert_eq!(rounds, vec![1, 1, 2, 2]);
        assert_eq!(conv.messages[0].role, Role::User);
        assert_eq!(conv.title, "what is rust");
        assert_eq!(validate::check(&conv), Ok(()));
    }

    #[test]
    fn name_wins_over_first_message() {
        let bytes = export(
            json!([
                msg("m1", "human", "hello", "2025-11-02T22:33:12Z"),
                msg("m2", "assistant", "hi", "2025-11-02T22:33:13Z"),
            ]),
            "Named chat",
        );
        assert_eq!(parse_one(&bytes).unwrap().title, "Named chat");
    }

    #[test]
    fn empty_content_falls_back_to_text_field() {
        let bytes = export(
            json!([{
                "uuid": "m1", "sender": "human", "text": "legacy body",
                "created_at": "2025-11-02T22:33:12Z", "content": []
            }]),
            "",
        );
        let conv = parse_one(&bytes).unwrap();
        assert_eq!(conv.messages[0].content_text, "legacy body");
    }

    #[test]
    fn null_content_falls_back_to_text_field() {
        let bytes = export(
            json!([
                {"uuid": "m1", "sender": "human", "text": "old export", "created_at": "2025-11-02T22:33:12Z", "content": null},
                msg("m2", "assistant", "still parsed", "2025-11-02T22:33:13Z"),
            ]),
            "",
        );
        let out = parse(&bytes, &ctx()).unwrap();
        assert_eq!(out.skipped_records, 0);
        let conv = out.conversations.into_iter().next().unwrap().1.unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].content_text, "old export");
        assert_eq!(conv.messages[1].content_text, "still parsed");
    }

    #[test]
    fn skips_empty_and_system_messages() {
        let bytes = export(
            json!([
                msg("m0", "system", "prompt", "2025-11-02T22:33:11Z"),
                msg("m1", "human", "hello", "2025-11-02T22:33:12Z"),
                msg("m2", "assistant", "", "2025-11-02T22:33:13Z"),
                msg("m3", "assistant", "hi", "2025-11-02T22:33:14Z"),
            ]),
            "",
        );
        let conv = parse_one(&bytes).unwrap();
        let ids: Vec<&str> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        assert_eq!(conv.messages[1].parent_id, "m1");
    }

    #[test]
    fn bad_message_timestamp_fails_conversation() {
        let bytes = export(json!([msg("m1", "human", "hello", "yesterday")]), "");
        let err = parse_one(&bytes).unwrap_err();
        assert!(matches!(err, ParseError::Timestamp(_)));
    }

    #[test]
    fn no_chat_messages_is_an_error() {
        let bytes = export(json!([]), "x");
        assert!(parse_one(&bytes).is_err());
    }
}
