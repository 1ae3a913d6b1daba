//! `chx parse`: normalize one export file without touching the database.
//!
//! Each conversation is written in the flat "parsed output" layout, one
//! JSON document per conversation, named after its sanitized id. Without
//! an output directory the documents go to stdout as one JSON array.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;

use crate::feeder::{self, DropFilter};
use crate::models::{ParsedConversation, Role, ToolData, Vendor};
use crate::normalize::{self, ParseContext};

#[derive(Debug, Serialize)]
pub struct ParsedOutput {
    pub title: String,
    /// Number of user messages.
    pub round_count: usize,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub data: Vec<OutputNode>,
}

#[derive(Debug, Serialize)]
pub struct OutputNode {
    pub id: String,
    pub parent_id: String,
    pub child_id: String,
    pub role: Role,
    pub content_type: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_data: Option<ToolData>,
    /// Unix seconds.
    pub create_time: f64,
}

impl From<&ParsedConversation> for ParsedOutput {
    fn from(conv: &ParsedConversation) -> Self {
        let project_id = ["project_id", "gizmo_id"]
            .iter()
            .filter_map(|key| conv.metadata.get(*key))
            .filter_map(|v| v.as_str())
            .find(|v| !v.is_empty())
            .map(String::from);

        let data = conv
            .messages
            .iter()
            .map(|m| OutputNode {
                id: m.id.clone(),
                parent_id: m.parent_id.clone(),
                child_id: m.child_id.clone().unwrap_or_default(),
                role: m.role,
                content_type: m.content_type.as_str().to_string(),
                content: m.content_text.clone(),
                images: m.content_images.clone(),
                videos: m.content_videos.clone(),
                tool_data: m.tool_data.clone(),
                create_time: m.created_at.timestamp_millis() as f64 / 1000.0,
            })
            .collect();

        Self {
            title: conv.title.clone(),
            round_count: conv.user_count(),
            total_count: conv.messages.len(),
            project_id,
            data,
        }
    }
}

/// Replace characters that are not allowed in file names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Parse `file` as `vendor` and write the parsed output.
pub fn run_parse(vendor: Vendor, file: &Path, output: Option<&Path>) -> Result<()> {
    if !file.is_file() {
        bail!("Input file does not exist: {}", file.display());
    }
    let filter = DropFilter::new(vendor, None)?;
    let name = file.to_string_lossy().replace('\\', "/");
    let inputs = feeder::read_input(file, &name, &filter)?;

    let mut documents = Vec::new();
    let mut dropped = 0usize;
    for input in &inputs {
        let ctx = ParseContext::new(&input.name, input.modified);
        let outcome = normalize::parse_input(vendor, &input.bytes, &ctx);
        if let Some(err) = &outcome.input_error {
            if inputs.len() == 1 {
                bail!("Failed to parse {}: {}", input.name, err);
            }
        }
        for failure in &outcome.failures {
            eprintln!("  skipped: {}: {}", failure.key, failure.reason);
        }
        dropped += outcome.failures.len();
        documents.extend(
            outcome
                .conversations
                .iter()
                .map(|c| (c.id.clone(), ParsedOutput::from(c))),
        );
    }

    match output {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            for (id, doc) in &documents {
                let path = dir.join(format!("{}.json", sanitize_filename(id)));
                std::fs::write(&path, serde_json::to_string_pretty(doc)?)?;
                eprintln!("Wrote {} ({} messages)", path.display(), doc.total_count);
            }
        }
        None => {
            let docs: Vec<&ParsedOutput> = documents.iter().map(|(_, d)| d).collect();
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
    }

    eprintln!(
        "Parsed {} conversation{} ({} skipped)",
        documents.len(),
        if documents.len() == 1 { "" } else { "s" },
        dropped
    );
    Ok(())
}
