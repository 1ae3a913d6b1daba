//! Core data models used throughout chat-harness.
//!
//! Every vendor parser produces the same [`ParsedConversation`] shape, and
//! the sink, the REST API, and the `chx parse` exporter all consume it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder title used when no name, summary, or user text is available.
pub const UNTITLED: &str = "Untitled Conversation";

/// A supported chat export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Gpt,
    Claude,
    ClaudeCode,
    Codex,
    Gemini,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::Gpt,
        Vendor::Claude,
        Vendor::ClaudeCode,
        Vendor::Codex,
        Vendor::Gemini,
    ];

    /// Stable identifier stored in `conversations.source_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Gpt => "gpt",
            Vendor::Claude => "claude",
            Vendor::ClaudeCode => "claude_code",
            Vendor::Codex => "codex",
            Vendor::Gemini => "gemini",
        }
    }

    /// Default include globs used by the drop-directory feeder.
    pub fn default_include_globs(&self) -> Vec<String> {
        let globs: &[&str] = match self {
            Vendor::Gpt | Vendor::Claude => &["**/conversations.json", "**/*.zip"],
            Vendor::ClaudeCode => &["**/*.jsonl", "**/*.zip"],
            Vendor::Codex => &["**/rollout-*.jsonl", "**/*.zip"],
            Vendor::Gemini => &["**/*.json", "**/*.zip"],
        };
        globs.iter().map(|g| g.to_string()).collect()
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpt" | "chatgpt" => Ok(Vendor::Gpt),
            "claude" => Ok(Vendor::Claude),
            "claude_code" | "claude-code" => Ok(Vendor::ClaudeCode),
            "codex" => Ok(Vendor::Codex),
            "gemini" => Ok(Vendor::Gemini),
            other => anyhow::bail!(
                "Unknown vendor: '{}'. Available: gpt, claude, claude_code, codex, gemini",
                other
            ),
        }
    }
}

/// Normalized author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Map a vendor role string onto the normalized set.
    ///
    /// Returns `None` for roles with no counterpart, which callers skip.
    pub fn from_vendor(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "model" => Some(Role::Assistant),
            "system" | "developer" => Some(Role::System),
            "tool" | "function" => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Multipart,
    Video,
    ToolUse,
    ToolResult,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Multipart => "multipart",
            ContentType::Video => "video",
            ContentType::ToolUse => "tool_use",
            ContentType::ToolResult => "tool_result",
        }
    }

    /// Classify a part `type` discriminator. Unrecognised types map to `None`
    /// and never override the running content type.
    pub fn from_part_type(raw: &str) -> Option<ContentType> {
        match raw {
            "text" => Some(ContentType::Text),
            "image" | "image_asset_pointer" | "image_url" => Some(ContentType::Image),
            "tool_use" => Some(ContentType::ToolUse),
            "tool_result" => Some(ContentType::ToolResult),
            _ => None,
        }
    }

    /// Classification used by vendors that only distinguish text from media.
    pub fn from_media(has_text: bool, images: usize, videos: usize) -> ContentType {
        match (images > 0 || videos > 0, has_text) {
            (false, _) => ContentType::Text,
            (true, true) => ContentType::Multipart,
            (true, false) if images > 0 => ContentType::Image,
            (true, false) => ContentType::Video,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured side-channel for Claude Code tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<TodoItem>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub status: String,
    #[serde(rename = "activeForm")]
    pub active_form: String,
}

/// One normalized turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    pub round_index: i64,
    pub role: Role,
    pub content_type: ContentType,
    #[serde(default)]
    pub content_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_videos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_data: Option<ToolData>,
    pub created_at: DateTime<Utc>,
}

impl ParsedMessage {
    /// True when the message carries nothing worth keeping.
    pub fn is_noise(&self) -> bool {
        self.content_text.is_empty()
            && self.content_images.is_empty()
            && self.content_videos.is_empty()
            && self.tool_data.is_none()
    }

    /// The JSON object persisted in `messages.content`.
    pub fn envelope(&self) -> ContentEnvelope {
        ContentEnvelope {
            text: self.content_text.clone(),
            images: self.content_images.clone(),
            videos: self.content_videos.clone(),
            tool_data: self.tool_data.clone(),
        }
    }
}

/// One normalized conversation. Built once per parse and never mutated by
/// downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedConversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<ParsedMessage>,
}

impl ParsedConversation {
    pub fn assistant_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }

    pub fn user_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }
}

/// Stored form of a message body. `text` is always present; the lists and
/// tool data only when non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEnvelope {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_data: Option<ToolData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_round_trips_through_str() {
        for vendor in Vendor::ALL {
            assert_eq!(vendor.as_str().parse::<Vendor>().unwrap(), vendor);
        }
        assert_eq!("claude-code".parse::<Vendor>().unwrap(), Vendor::ClaudeCode);
        assert!("slack".parse::<Vendor>().is_err());
    }

    #[test]
    fn human_maps_to_user() {
        assert_eq!(Role::from_vendor("human"), Some(Role::User));
        assert_eq!(Role::from_vendor("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::from_vendor("critic"), None);
    }

    #[test]
    fn media_classification() {
        assert_eq!(ContentType::from_media(true, 0, 0), ContentType::Text);
        assert_eq!(ContentType::from_media(true, 1, 0), ContentType::Multipart);
        assert_eq!(ContentType::from_media(false, 1, 0), ContentType::Image);
        assert_eq!(ContentType::from_media(false, 0, 2), ContentType::Video);
    }

    #[test]
    fn envelope_omits_empty_lists() {
        let msg = ParsedMessage {
            id: "m1".into(),
            parent_id: String::new(),
            child_id: None,
            round_index: 1,
            role: Role::User,
            content_type: ContentType::Text,
            content_text: "hi".into(),
            content_images: vec![],
            content_videos: vec![],
            tool_data: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&msg.envelope()).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }
}
