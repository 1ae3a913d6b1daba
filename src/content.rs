//! Content extraction.
//!
//! Vendors encode a message body as a bare string, an array of typed parts,
//! or a single object. [`ContentShape`] captures the three cases as an
//! untagged sum type and each vendor reduces it to an [`Extracted`] value.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::{ContentType, TodoItem, ToolData};

/// A vendor `content` field before interpretation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentShape {
    Text(String),
    Parts(Vec<Part>),
    Object(Map<String, Value>),
    Other(Value),
}

/// One element of an array-shaped `content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text(String),
    Object(Map<String, Value>),
    Other(Value),
}

/// The common reduction every vendor produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub content_type: ContentType,
    pub text: String,
    pub images: Vec<String>,
    pub tool_data: Option<ToolData>,
}

impl Extracted {
    pub fn empty() -> Self {
        Self {
            content_type: ContentType::Text,
            text: String::new(),
            images: Vec::new(),
            tool_data: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::empty()
        }
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Accumulates text fragments and tracks the first non-text part type.
#[derive(Default)]
struct Accumulator {
    texts: Vec<String>,
    images: Vec<String>,
    override_type: Option<ContentType>,
    tool_data: Option<ToolData>,
}

impl Accumulator {
    fn push_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.texts.push(text.to_string());
        }
    }

    fn note_type(&mut self, raw: Option<&str>) {
        if self.override_type.is_some() {
            return;
        }
        if let Some(ct) = raw.and_then(ContentType::from_part_type) {
            if ct != ContentType::Text {
                self.override_type = Some(ct);
            }
        }
    }

    fn finish(self) -> Extracted {
        Extracted {
            content_type: self.override_type.unwrap_or(ContentType::Text),
            text: self.texts.join("\n"),
            images: self.images,
            tool_data: self.tool_data,
        }
    }
}

/// Map a GPT asset pointer to its stored asset id.
pub fn asset_id(pointer: &str) -> Option<String> {
    if let Some(id) = pointer.strip_prefix("sediment://") {
        Some(format!("{}-sanitized", id))
    } else {
        pointer.strip_prefix("file-service://").map(str::to_string)
    }
}

/// GPT `content.parts`: string parts and `text` fields become text, asset
/// pointers and `file_id`s become images. The type is text, image, or
/// multipart depending on what was found.
pub fn extract_gpt_parts(parts: &[Part]) -> Extracted {
    let mut acc = Accumulator::default();
    for part in parts {
        match part {
            Part::Text(s) => acc.push_text(s),
            Part::Object(obj) => {
                if let Some(text) = str_field(obj, "text") {
                    acc.push_text(text);
                }
                if let Some(id) = str_field(obj, "asset_pointer").and_then(asset_id) {
                    acc.images.push(id);
                }
                if let Some(file_id) = str_field(obj, "file_id") {
                    acc.images.push(file_id.to_string());
                }
            }
            Part::Other(_) => {}
        }
    }
    let mut extracted = acc.finish();
    extracted.content_type =
        ContentType::from_media(!extracted.text.is_empty(), extracted.images.len(), 0);
    extracted
}

/// Claude web export: only `type == "text"` items carry text.
pub fn extract_claude_items(items: &[Part]) -> String {
    items
        .iter()
        .filter_map(|item| match item {
            Part::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                str_field(obj, "text")
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Claude Code `message.content`.
///
/// Array parts contribute their `text`, and tool results their `content`
/// (string or list of text blocks). The first recognised non-text part type
/// sets the content type while text keeps accumulating. The first named
/// `tool_use` part becomes [`ToolData`].
pub fn extract_claude_code(shape: &ContentShape) -> Extracted {
    match shape {
        ContentShape::Text(s) => Extracted::text(s.clone()),
        ContentShape::Parts(parts) => {
            let mut acc = Accumulator::default();
            for part in parts {
                match part {
                    Part::Text(s) => acc.push_text(s),
                    Part::Object(obj) => {
                        let kind = obj.get("type").and_then(Value::as_str);
                        acc.note_type(kind);
                        if kind == Some("tool_use") && acc.tool_data.is_none() {
                            acc.tool_data = tool_data_from(obj);
                        }
                        if let Some(text) = str_field(obj, "text") {
                            acc.push_text(text);
                        }
                        match obj.get("content") {
                            Some(Value::String(s)) => acc.push_text(s),
                            Some(Value::Array(blocks)) => {
                                for block in blocks {
                                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                                        acc.push_text(text);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    Part::Other(_) => {}
                }
            }
            acc.finish()
        }
        ContentShape::Object(obj) => {
            let content_type = obj
                .get("type")
                .and_then(Value::as_str)
                .and_then(ContentType::from_part_type)
                .unwrap_or(ContentType::Text);
            match obj.get("text").and_then(Value::as_str) {
                Some(text) => Extracted {
                    content_type,
                    text: text.to_string(),
                    ..Extracted::empty()
                },
                None => Extracted::empty(),
            }
        }
        ContentShape::Other(_) => Extracted::empty(),
    }
}

fn tool_data_from(obj: &Map<String, Value>) -> Option<ToolData> {
    let name = str_field(obj, "name")?;
    let input = obj.get("input").and_then(Value::as_object);

    let mut data = ToolData {
        name: name.to_string(),
        input: None,
        todos: None,
    };
    let Some(input) = input else {
        return Some(data);
    };

    if name == "TodoWrite" {
        let todos: Vec<TodoItem> = input
            .get("todos")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let status = item.get("status").and_then(Value::as_str)?;
                        let active = item.get("activeForm").and_then(Value::as_str)?;
                        if status.is_empty() || active.is_empty() {
                            return None;
                        }
                        Some(TodoItem {
                            status: status.to_string(),
                            active_form: active.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !todos.is_empty() {
            data.todos = Some(todos);
        }
    } else {
        data.input = Some(Value::Object(input.clone()));
    }
    Some(data)
}

/// Codex `payload.content`: an array of items with `text`, or a string.
pub fn extract_codex(shape: &ContentShape) -> String {
    match shape {
        ContentShape::Text(s) => s.clone(),
        ContentShape::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Part::Object(obj) => str_field(obj, "text"),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape(value: Value) -> ContentShape {
        serde_json::from_value(value).unwrap()
    }

    fn parts(value: Value) -> Vec<Part> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn shapes_are_recognised() {
        assert!(matches!(shape(json!("hi")), ContentShape::Text(_)));
        assert!(matches!(shape(json!([1, "a"])), ContentShape::Parts(_)));
        assert!(matches!(shape(json!({"type": "text"})), ContentShape::Object(_)));
        assert!(matches!(shape(json!(42)), ContentShape::Other(_)));
    }

    #[test]
    fn gpt_text_and_image_pointer() {
        let p = parts(json!([
            "hello",
            {"content_type": "image_asset_pointer", "asset_pointer": "file-service://abc"}
        ]));
        let out = extract_gpt_parts(&p);
        assert_eq!(out.text, "hello");
        assert_eq!(out.images, vec!["abc".to_string()]);
        assert_ne!(out.content_type, ContentType::Text);
        assert_eq!(out.content_type, ContentType::Multipart);
    }

    #[test]
    fn gpt_sediment_pointer_and_file_id() {
        let p = parts(json!([
            {"asset_pointer": "sediment://file_123"},
            {"file_id": "file-xyz"}
        ]));
        let out = extract_gpt_parts(&p);
        assert_eq!(out.images, vec!["file_123-sanitized", "file-xyz"]);
        assert_eq!(out.content_type, ContentType::Image);
        assert!(out.text.is_empty());
    }

    #[test]
    fn claude_items_only_text_type() {
        let items = parts(json!([
            {"type": "text", "text": "one"},
            {"type": "tool_use", "text": "ignored"},
            {"type": "text", "text": "two"}
        ]));
        assert_eq!(extract_claude_items(&items), "one\ntwo");
    }

    #[test]
    fn claude_code_first_non_text_type_wins() {
        let out = extract_claude_code(&shape(json!([
            {"type": "text", "text": "let me check"},
            {"type": "tool_use", "name": "Bash", "input": {"command": "ls"}},
            {"type": "tool_result", "content": "done"}
        ])));
        assert_eq!(out.content_type, ContentType::ToolUse);
        assert_eq!(out.text, "let me check\ndone");
        let tool = out.tool_data.unwrap();
        assert_eq!(tool.name, "Bash");
        assert_eq!(tool.input, Some(json!({"command": "ls"})));
    }

    #[test]
    fn claude_code_todo_write_keeps_complete_items() {
        let out = extract_claude_code(&shape(json!([
            {"type": "tool_use", "name": "TodoWrite", "input": {"todos": [
                {"status": "pending", "activeForm": "Writing tests", "content": "x"},
                {"status": "", "activeForm": "Dropped"},
                {"status": "completed"}
            ]}}
        ])));
        let tool = out.tool_data.unwrap();
        assert!(tool.input.is_none());
        let todos = tool.todos.unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].active_form, "Writing tests");
    }

    #[test]
    fn claude_code_tool_result_blocks() {
        let out = extract_claude_code(&shape(json!([
            {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "ok"}]}
        ])));
        assert_eq!(out.content_type, ContentType::ToolResult);
        assert_eq!(out.text, "ok");
    }

    #[test]
    fn claude_code_object_shape() {
        let out = extract_claude_code(&shape(json!({"type": "text", "text": "plain"})));
        assert_eq!(out.text, "plain");
        assert_eq!(out.content_type, ContentType::Text);
        assert_eq!(extract_claude_code(&shape(json!({"type": "x"}))), Extracted::empty());
    }

    #[test]
    fn codex_array_and_string() {
        let arr = shape(json!([{"type": "input_text", "text": "a"}, {"type": "input_text", "text": "b"}]));
        assert_eq!(extract_codex(&arr), "a\nb");
        assert_eq!(extract_codex(&shape(json!("s"))), "s");
        assert_eq!(extract_codex(&shape(json!({"text": "obj"}))), "");
    }
}
