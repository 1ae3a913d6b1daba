//! GPT (`conversations.json`) normalizer.
//!
//! Each conversation is a `mapping` of node id to `{message, parent,
//! children}` plus a `current_node` pointer at the active leaf. Only the
//! root-to-`current_node` path is materialized; sibling branches are
//! dropped. System nodes and nodes without a message are skipped, and each
//! emitted message is parented to the previous emitted one so skipped
//! nodes never leave a dangling link.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::chain::{self, Arena, RoundCounter, RoundRule};
use crate::content::{self, Part};
use crate::error::{ParseError, ParseResult};
use crate::models::{ContentType, ParsedConversation, ParsedMessage, Role};
use crate::normalize::{ParseContext, VendorOutput};
use crate::timestamp;
use crate::title::{self, TitleStyle};

#[derive(Debug, Deserialize)]
struct GptConversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    update_time: Option<f64>,
    #[serde(default)]
    mapping: BTreeMap<String, GptNode>,
    #[serde(default)]
    current_node: Option<String>,
    #[serde(default)]
    gizmo_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GptNode {
    #[serde(default)]
    message: Option<GptMessage>,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GptMessage {
    #[serde(default)]
    author: Option<GptAuthor>,
    #[serde(default)]
    create_time: Option<f64>,
    #[serde(default)]
    content: Option<GptContent>,
}

#[derive(Debug, Deserialize)]
struct GptAuthor {
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
struct GptContent {
    #[serde(default)]
    parts: Vec<Part>,
    #[serde(default)]
    text: Option<String>,
}

/// Parse a GPT export: a JSON array of conversations. Array elements that
/// do not match the conversation shape are skipped and counted.
pub fn parse(bytes: &[u8], ctx: &ParseContext) -> ParseResult<VendorOutput> {
    let items: Vec<Value> = serde_json::from_slice(bytes)?;
    let mut output = VendorOutput {
        conversations: Vec::with_capacity(items.len()),
        skipped_records: 0,
    };

    for (i, item) in items.into_iter().enumerate() {
        let conv: GptConversation = match serde_json::from_value(item) {
            Ok(c) => c,
            Err(_) => {
                output.skipped_records += 1;
                continue;
            }
        };
        let key = conversation_id(&conv).unwrap_or_else(|| format!("{}[{}]", ctx.source_name, i));
        output.conversations.push((key, parse_conversation(conv, ctx)));
    }
    Ok(output)
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn conversation_id(conv: &GptConversation) -> Option<String> {
    non_empty(&conv.id).or_else(|| non_empty(&conv.conversation_id))
}

fn parse_conversation(conv: GptConversation, ctx: &ParseContext) -> ParseResult<ParsedConversation> {
    let conv_created = conv.create_time.and_then(timestamp::from_unix_float);
    let conv_updated = conv.update_time.and_then(timestamp::from_unix_float);

    let id = match conversation_id(&conv) {
        Some(id) => id,
        None => format!(
            "unknown_{}",
            conv.create_time.map(|t| t as i64).unwrap_or(0)
        ),
    };

    let current = non_empty(&conv.current_node)
        .ok_or_else(|| ParseError::structure("missing current_node"))?;

    let fallback_time = conv_created.unwrap_or(ctx.anchor);
    let messages = walk_messages(conv.mapping, &current, fallback_time)?;

    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "conversation_id".to_string(),
        Value::String(non_empty(&conv.conversation_id).unwrap_or_else(|| id.clone())),
    );
    if let Some(gizmo) = non_empty(&conv.gizmo_id) {
        metadata.insert("gizmo_id".to_string(), Value::String(gizmo));
    }

    let bounds = timestamp::bounds(messages.iter().map(|m| m.created_at));
    let created_at = conv_created
        .or(bounds.map(|b| b.0))
        .unwrap_or(ctx.anchor);
    let updated_at = conv_updated
        .or(bounds.map(|b| b.1))
        .unwrap_or(created_at);

    let title = title::resolve_title(conv.title.as_deref(), None, &messages, TitleStyle::GPT);

    Ok(ParsedConversation {
        id,
        title,
        metadata,
        created_at,
        updated_at,
        messages,
    })
}

fn walk_messages(
    mapping: BTreeMap<String, GptNode>,
    current: &str,
    fallback_time: DateTime<Utc>,
) -> ParseResult<Vec<ParsedMessage>> {
    let arena = Arena::build(
        mapping
            .into_iter()
            .map(|(id, node)| (id, node.parent, node.message)),
    );
    let walk = arena.path_to(current).ok_or_else(|| {
        ParseError::structure(format!("current_node '{}' not found in mapping", current))
    })?;

    let mut rounds = RoundCounter::new(RoundRule::OnUser { start: 0 });
    let mut messages: Vec<ParsedMessage> = Vec::with_capacity(walk.indices.len());

    for idx in walk.indices {
        let node = arena.get(idx);
        let Some(message) = node.value.as_ref() else {
            continue;
        };
        let raw_role = message.author.as_ref().map(|a| a.role.as_str()).unwrap_or("");
        let role = match Role::from_vendor(raw_role) {
            Some(Role::System) | None => continue,
            Some(role) => role,
        };

        let mut extracted = match &message.content {
            Some(c) => content::extract_gpt_parts(&c.parts),
            None => content::Extracted::empty(),
        };
        if extracted.text.is_empty() && extracted.images.is_empty() {
            if let Some(text) = message.content.as_ref().and_then(|c| c.text.as_deref()) {
                extracted.text = text.to_string();
                extracted.content_type = ContentType::Text;
            }
        }
        if extracted.text.is_empty() && extracted.images.is_empty() {
            continue;
        }

        let created_at = message
            .create_time
            .and_then(timestamp::from_unix_float)
            .unwrap_or(fallback_time);
        let parent_id = messages.last().map(|m| m.id.clone()).unwrap_or_default();

        messages.push(ParsedMessage {
            id: node.id.clone(),
            parent_id,
            child_id: None,
            round_index: rounds.next(role),
            role,
            content_type: extracted.content_type,
            content_text: extracted.text,
            content_images: extracted.images,
            content_videos: Vec::new(),
            tool_data: None,
            created_at,
        });
    }

    chain::link_children(&mut messages);
    Ok(messages)
}
