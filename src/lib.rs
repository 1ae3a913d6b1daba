//! # Chat Harness
//!
//! A local-first archive for AI chat exports.
//!
//! Exports from five assistants (ChatGPT, Claude web, Claude Code, Codex CLI
//! and Gemini) arrive in five unrelated shapes: a DAG of mapping nodes, flat
//! arrays, append-only JSONL session logs, and bare message lists. Chat
//! Harness parses each into one [`models::ParsedConversation`] shape with
//! deterministic ids, parent links and round numbering, validates the
//! result, and upserts it idempotently into SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Drop dirs   │──▶│ Vendor parsers   │──▶│ Validation   │
//! │ files/zips  │   │ + ledger filter  │   │ gate         │
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                 ▼
//!                 ┌──────────┐            ┌──────────────┐
//!                 │ REST API │◀───────────│ SQLite sink  │
//!                 │  (axum)  │            │              │
//!                 └──────────┘            └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chx init
//! chx sync all
//! chx stats
//! chx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Normalized conversation types |
//! | [`error`] | Typed parse failures |
//! | [`timestamp`], [`identity`], [`title`], [`content`], [`chain`] | Shared parsing utilities |
//! | [`parser_gpt`], [`parser_claude`], [`parser_claude_code`], [`parser_codex`], [`parser_gemini`] | Vendor parsers |
//! | [`validate`] | Validation gate |
//! | [`normalize`] | Parse-and-validate entry point |
//! | [`feeder`] | Drop-directory scanning and ZIP expansion |
//! | [`ledger`] | Content-hash dedup ledger |
//! | [`sink`] | Idempotent conversation storage |
//! | [`ingest`] | `chx sync` driver |
//! | [`conversations`], [`tags`], [`favorites`], [`trees`], [`stats`] | Archive queries |
//! | [`server`] | REST API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chain;
pub mod config;
pub mod content;
pub mod conversations;
pub mod db;
pub mod error;
pub mod export;
pub mod favorites;
pub mod feeder;
pub mod get;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod parser_claude;
pub mod parser_claude_code;
pub mod parser_codex;
pub mod parser_gemini;
pub mod parser_gpt;
pub mod progress;
pub mod server;
pub mod sink;
pub mod sources;
pub mod stats;
pub mod tags;
pub mod timestamp;
pub mod title;
pub mod trees;
pub mod validate;
