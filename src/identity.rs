//! Stable identity derivation.
//!
//! Codex logs carry no per-message ids, so ids are minted as UUIDv5 over the
//! session namespace and `timestamp ++ canonical_payload`. The canonical
//! payload must stay byte-compatible with the ids already in existing
//! stores: keys in `type, role, content, id` order, raw `content` compacted,
//! and `<`, `>`, `&`, U+2028, U+2029 written as `\u` escapes.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};

fn trailing_uuid_re() -> &'static Regex {
    static TRAILING_UUID_RE: OnceLock<Regex> = OnceLock::new();
    TRAILING_UUID_RE.get_or_init(|| {
        Regex::new(
            r"([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$",
        )
        .expect("valid trailing uuid regex")
    })
}

/// Extract a session UUID embedded at the end of a file stem, e.g.
/// `rollout-2025-10-03T12-39-28-<uuid>.jsonl` or `<uuid>.jsonl`.
pub fn session_id_from_name(name: &str) -> Option<String> {
    let file = name.rsplit(['/', '\\', '!']).next().unwrap_or(name);
    let stem = Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())?;
    trailing_uuid_re()
        .captures(&stem)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Mint a deterministic message id. Fails when `namespace` is not a UUID;
/// never falls back to a random id.
pub fn derive_message_id(namespace: &str, timestamp: &str, canonical_payload: &str) -> ParseResult<String> {
    let ns = Uuid::parse_str(namespace.trim())
        .map_err(|e| ParseError::identity(format!("invalid session ID '{}': {}", namespace, e)))?;
    let mut name = String::with_capacity(timestamp.len() + canonical_payload.len());
    name.push_str(timestamp);
    name.push_str(canonical_payload);
    Ok(Uuid::new_v5(&ns, name.as_bytes()).to_string())
}

/// Encode a Codex payload in canonical form.
///
/// `content_raw` is the payload's raw `content` JSON exactly as it appeared
/// in the log line, or `None` when the key was absent.
pub fn canonical_payload(kind: &str, role: &str, content_raw: Option<&str>, id: &str) -> String {
    let content = match content_raw {
        Some(raw) => compact_json(raw),
        None => "null".to_string(),
    };
    format!(
        "{{\"type\":{},\"role\":{},\"content\":{},\"id\":{}}}",
        encode_string(kind),
        encode_string(role),
        content,
        encode_string(id)
    )
}

/// JSON string literal with HTML-sensitive characters escaped.
pub fn encode_string(s: &str) -> String {
    let quoted = serde_json::Value::String(s.to_string()).to_string();
    escape_html(&quoted)
}

/// Strip insignificant whitespace from raw JSON and escape HTML-sensitive
/// characters. Token text (key order, number spelling, existing escapes)
/// is preserved verbatim.
pub fn compact_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            push_escaped(&mut out, ch);
            continue;
        }
        match ch {
            ' ' | '\t' | '\n' | '\r' => {}
            '"' => {
                in_string = true;
                out.push(ch);
            }
            _ => push_escaped(&mut out, ch),
        }
    }
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        push_escaped(&mut out, ch);
    }
    out
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '<' => out.push_str("\\u003c"),
        '>' => out.push_str("\\u003e"),
        '&' => out.push_str("\\u0026"),
        '\u{2028}' => out.push_str("\\u2028"),
        '\u{2029}' => out.push_str("\\u2029"),
        _ => out.push(ch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "0199a9c4-5b8e-7a31-9d2f-3c4b5a6d7e8f";

    #[test]
    fn session_id_from_rollout_name() {
        let name = format!("sessions/2025/10/03/rollout-2025-10-03T12-39-28-{}.jsonl", SESSION);
        assert_eq!(session_id_from_name(&name).as_deref(), Some(SESSION));
        let zipped = format!("codex.zip!rollout-x-{}.jsonl", SESSION);
        assert_eq!(session_id_from_name(&zipped).as_deref(), Some(SESSION));
        assert_eq!(session_id_from_name("notes.jsonl"), None);
    }

    #[test]
    fn canonical_payload_orders_keys_and_escapes() {
        let raw = r#"[ {"type": "input_text", "text": "a < b && c > d"} ]"#;
        let encoded = canonical_payload("message", "user", Some(raw), "");
        assert_eq!(
            encoded,
            r#"{"type":"message","role":"user","content":[{"type":"input_text","text":"a \u003c b \u0026\u0026 c \u003e d"}],"id":""}"#
        );
    }

    #[test]
    fn canonical_payload_missing_content_is_null() {
        let encoded = canonical_payload("message", "assistant", None, "abc");
        assert_eq!(
            encoded,
            r#"{"type":"message","role":"assistant","content":null,"id":"abc"}"#
        );
    }

    #[test]
    fn compact_keeps_whitespace_inside_strings() {
        assert_eq!(compact_json("{ \"a\" : \"x  y\\\" z\" }"), "{\"a\":\"x  y\\\" z\"}");
    }

    #[test]
    fn derived_ids_are_deterministic() {
        let payload = canonical_payload("message", "user", Some("\"hi\""), "");
        let a = derive_message_id(SESSION, "2025-10-03T12:39:28.166Z", &payload).unwrap();
        let b = derive_message_id(SESSION, "2025-10-03T12:39:28.166Z", &payload).unwrap();
        let c = derive_message_id(SESSION, "2025-10-03T12:39:28.167Z", &payload).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 5);
    }

    #[test]
    fn derived_id_matches_reference_v5() {
        let payload = canonical_payload("message", "user", Some("\"hi\""), "");
        let ns = Uuid::parse_str(SESSION).unwrap();
        let expected = Uuid::new_v5(&ns, format!("T{}", payload).as_bytes()).to_string();
        assert_eq!(derive_message_id(SESSION, "T", &payload).unwrap(), expected);
    }

    #[test]
    fn invalid_namespace_is_rejected() {
        let err = derive_message_id("not-a-uuid", "t", "{}").unwrap_err();
        assert!(matches!(err, ParseError::Identity(_)));
    }
}
