//! `chx get`: print one conversation and its messages.

use anyhow::Result;

use crate::config::Config;
use crate::conversations;
use crate::db;

/// CLI entry point. Exits with status 1 when the conversation is unknown.
pub async fn run_get(config: &Config, uuid: &str) -> Result<()> {
    let pool = db::connect(config).await?;

    let conv = match conversations::get_conversation(&pool, uuid).await? {
        Some(c) => c,
        None => {
            pool.close().await;
            eprintln!("Error: conversation not found: {}", uuid);
            std::process::exit(1);
        }
    };
    let messages = conversations::all_messages(&pool, uuid).await?;
    pool.close().await;

    println!("--- Conversation ---");
    println!("uuid:        {}", conv.uuid);
    println!("title:       {}", conv.title);
    println!("source:      {}", conv.source_type);
    println!("created_at:  {}", conv.created_at);
    println!("updated_at:  {}", conv.updated_at);
    println!("metadata:    {}", conv.metadata);
    println!();

    println!("--- Messages ({}) ---", messages.len());
    for msg in &messages {
        println!(
            "[round {}] {} ({}) {}",
            msg.round_index, msg.role, msg.content_type, msg.created_at
        );
        let text = msg.text();
        if !text.is_empty() {
            println!("{}", text);
        }
        for key in ["images", "videos"] {
            if let Some(list) = msg.content.get(key).and_then(|v| v.as_array()) {
                let names: Vec<&str> = list.iter().filter_map(|v| v.as_str()).collect();
                println!("{}: {}", key, names.join(", "));
            }
        }
        if let Some(tool) = msg.content.get("tool_data") {
            println!("tool_data: {}", tool);
        }
        println!();
    }

    Ok(())
}
