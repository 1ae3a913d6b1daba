//! Title extraction.
//!
//! Fallback chain, first non-empty wins: explicit name, explicit summary,
//! the first user message truncated to 50 characters, then
//! [`UNTITLED`]. Whether the truncation gets an ellipsis is a per-vendor
//! rule and is kept as each vendor has always rendered it.

use crate::models::{ParsedMessage, Role, UNTITLED};

pub const TITLE_MAX_CHARS: usize = 50;

/// How the first user message is turned into a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleStyle {
    pub ellipsis: bool,
    pub strip_tags: bool,
}

impl TitleStyle {
    pub const GPT: TitleStyle = TitleStyle {
        ellipsis: true,
        strip_tags: false,
    };
    pub const CLAUDE: TitleStyle = TitleStyle {
        ellipsis: false,
        strip_tags: false,
    };
    pub const CLAUDE_CODE: TitleStyle = TitleStyle {
        ellipsis: true,
        strip_tags: true,
    };
    pub const CODEX: TitleStyle = TitleStyle {
        ellipsis: false,
        strip_tags: false,
    };
}

/// Resolve a title from the explicit fields and the first user message.
pub fn resolve_title(
    name: Option<&str>,
    summary: Option<&str>,
    messages: &[ParsedMessage],
    style: TitleStyle,
) -> String {
    let explicit = [name, summary]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty());
    if let Some(title) = explicit {
        return title.to_string();
    }

    first_user_title(messages.iter().filter(|m| m.role == Role::User).map(|m| m.content_text.as_str()), style)
        .unwrap_or_else(|| UNTITLED.to_string())
}

/// Title from the first user text that survives cleanup.
pub fn first_user_title<'a, I>(user_texts: I, style: TitleStyle) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    for text in user_texts {
        let mut cleaned = text.trim().to_string();
        if style.strip_tags && cleaned.contains('<') {
            cleaned = strip_tags(&cleaned);
        }
        if cleaned.is_empty() {
            continue;
        }
        return Some(truncate_chars(&cleaned, TITLE_MAX_CHARS, style.ellipsis));
    }
    None
}

/// Truncate to at most `max` characters, appending `...` when asked and
/// when something was cut.
pub fn truncate_chars(s: &str, max: usize, ellipsis: bool) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => {
            let mut out = s[..cut].to_string();
            if ellipsis {
                out.push_str("...");
            }
            out
        }
    }
}

/// Remove `<...>` markup, keeping the text between tags.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}
