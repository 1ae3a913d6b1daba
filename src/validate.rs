//! Validation gate.
//!
//! Conversations that parsed but carry no useful signal, or that break the
//! linkage and round invariants, are refused before they reach the sink.
//! A refusal is a normal outcome reported as "skipped: reason".

use std::collections::HashSet;
use std::fmt;

use crate::models::{ParsedConversation, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoMessages,
    NoAssistantMessages,
    MissingId,
    DuplicateId(String),
    DanglingParent(String),
    RoundRegression(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoMessages => write!(f, "no messages"),
            Rejection::NoAssistantMessages => write!(f, "no assistant messages"),
            Rejection::MissingId => write!(f, "message without id"),
            Rejection::DuplicateId(id) => write!(f, "duplicate message id: {}", id),
            Rejection::DanglingParent(id) => write!(f, "dangling parent: {}", id),
            Rejection::RoundRegression(id) => write!(f, "round regression at {}", id),
        }
    }
}

/// Run every check, returning the first failure.
pub fn check(conv: &ParsedConversation) -> Result<(), Rejection> {
    if conv.messages.is_empty() {
        return Err(Rejection::NoMessages);
    }
    if conv.assistant_count() == 0 {
        return Err(Rejection::NoAssistantMessages);
    }
    check_ids(conv)?;
    check_parents(conv)?;
    check_rounds(conv)
}

/// Message ids are non-empty and unique within the conversation.
pub fn check_ids(conv: &ParsedConversation) -> Result<(), Rejection> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(conv.messages.len());
    for m in &conv.messages {
        if m.id.trim().is_empty() {
            return Err(Rejection::MissingId);
        }
        if !seen.insert(m.id.as_str()) {
            return Err(Rejection::DuplicateId(m.id.clone()));
        }
    }
    Ok(())
}

/// Every non-empty `parent_id` must name a message in the same conversation.
pub fn check_parents(conv: &ParsedConversation) -> Result<(), Rejection> {
    let ids: HashSet<&str> = conv.messages.iter().map(|m| m.id.as_str()).collect();
    match conv
        .messages
        .iter()
        .find(|m| !m.parent_id.is_empty() && !ids.contains(m.parent_id.as_str()))
    {
        Some(m) => Err(Rejection::DanglingParent(m.parent_id.clone())),
        None => Ok(()),
    }
}

/// `round_index` never decreases and only increases at user messages.
pub fn check_rounds(conv: &ParsedConversation) -> Result<(), Rejection> {
    let mut prev: Option<i64> = None;
    for m in &conv.messages {
        if let Some(p) = prev {
            let regressed = m.round_index < p;
            let bumped_by_non_user = m.round_index > p && m.role != Role::User;
            if regressed || bumped_by_non_user {
                return Err(Rejection::RoundRegression(m.id.clone()));
            }
        }
        prev = Some(m.round_index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, ParsedMessage};
    use chrono::Utc;

    fn msg(id: &str, parent: &str, round: i64, role: Role) -> ParsedMessage {
        ParsedMessage {
            id: id.into(),
            parent_id: parent.into(),
            child_id: None,
            round_index: round,
            role,
            content_type: ContentType::Text,
            content_text: "x".into(),
            content_images: vec![],
            content_videos: vec![],
            tool_data: None,
            created_at: Utc::now(),
        }
    }

    fn conv(messages: Vec<ParsedMessage>) -> ParsedConversation {
        ParsedConversation {
            id: "c".into(),
            title: "t".into(),
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages,
        }
    }

    #[test]
    fn accepts_well_formed_chain() {
        let c = conv(vec![
            msg("a", "", 1, Role::User),
            msg("b", "a", 1, Role::Assistant),
            msg("c", "b", 2, Role::User),
            msg("d", "c", 2, Role::Assistant),
        ]);
        assert_eq!(check(&c), Ok(()));
    }

    #[test]
    fn rejects_user_only() {
        let c = conv(vec![msg("a", "", 1, Role::User), msg("b", "a", 2, Role::User)]);
        assert_eq!(check(&c), Err(Rejection::NoAssistantMessages));
        assert_eq!(Rejection::NoAssistantMessages.to_string(), "no assistant messages");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(check(&conv(vec![])), Err(Rejection::NoMessages));
    }

    #[test]
    fn rejects_empty_and_repeated_ids() {
        let c = conv(vec![msg("a", "", 1, Role::User), msg("", "a", 1, Role::Assistant)]);
        assert_eq!(check(&c), Err(Rejection::MissingId));
        let c = conv(vec![
            msg("a", "", 1, Role::User),
            msg("b", "a", 1, Role::Assistant),
            msg("b", "b", 1, Role::Assistant),
        ]);
        assert_eq!(check(&c), Err(Rejection::DuplicateId("b".into())));
        assert_eq!(Rejection::DuplicateId("b".into()).to_string(), "duplicate message id: b");
    }

    #[test]
    fn detects_dangling_parent() {
        let c = conv(vec![msg("a", "", 1, Role::User), msg("b", "ghost", 1, Role::Assistant)]);
        assert_eq!(check(&c), Err(Rejection::DanglingParent("ghost".into())));
    }

    #[test]
    fn detects_round_bump_on_assistant() {
        let c = conv(vec![msg("a", "", 1, Role::User), msg("b", "a", 2, Role::Assistant)]);
        assert_eq!(check(&c), Err(Rejection::RoundRegression("b".into())));
    }
}
