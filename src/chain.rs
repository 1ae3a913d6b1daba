//! Chain and tree walking.
//!
//! Three strategies turn vendor structures into one linear message chain:
//!
//! | Strategy | Vendors | Linkage |
//! |----------|---------|---------|
//! | [`Arena::path_to`] | GPT | parent pointers from the current leaf back to the root |
//! | [`LinearCursor`] | Claude, Claude Code, Codex | running `prev_id` over emission order |
//! | index synthesis | Gemini | none; ids and times derived from array position |
//!
//! Round numbering is shared through [`RoundCounter`].

use std::collections::{HashMap, HashSet};

use crate::models::{ParsedMessage, Role};

/// A node in an [`Arena`]. Parent links are indices, never references.
#[derive(Debug)]
pub struct ArenaNode<T> {
    pub id: String,
    pub parent: Option<usize>,
    pub value: T,
}

/// Flat node table indexed by id.
#[derive(Debug)]
pub struct Arena<T> {
    nodes: Vec<ArenaNode<T>>,
    index: HashMap<String, usize>,
}

/// Result of walking from a leaf to its root.
#[derive(Debug, PartialEq, Eq)]
pub struct PathWalk {
    /// Node indices in root-to-leaf order.
    pub indices: Vec<usize>,
    /// True when a revisited node cut the walk short.
    pub truncated: bool,
}

impl<T> Arena<T> {
    /// Build from `(id, parent_id, value)` entries. Parent ids that do not
    /// resolve to a node are treated as absent.
    pub fn build<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>, T)>,
    {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();
        let mut parents = Vec::new();
        for (id, parent, value) in entries {
            index.insert(id.clone(), nodes.len());
            parents.push(parent);
            nodes.push(ArenaNode {
                id,
                parent: None,
                value,
            });
        }
        for (node, parent) in nodes.iter_mut().zip(parents) {
            node.parent = parent
                .filter(|p| !p.is_empty())
                .and_then(|p| index.get(&p).copied());
        }
        Self { nodes, index }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, idx: usize) -> &ArenaNode<T> {
        &self.nodes[idx]
    }

    pub fn lookup(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Walk parent links from `leaf_id` to the root.
    ///
    /// Returns `None` when the leaf is not in the arena. A revisit stops the
    /// walk and marks the result truncated.
    pub fn path_to(&self, leaf_id: &str) -> Option<PathWalk> {
        let mut current = self.lookup(leaf_id)?;
        let mut visited = HashSet::new();
        let mut indices = Vec::new();
        let mut truncated = false;

        loop {
            if !visited.insert(current) {
                truncated = true;
                break;
            }
            indices.push(current);
            match self.nodes[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        indices.reverse();
        Some(PathWalk { indices, truncated })
    }
}

/// Running `prev_id` cursor for append-only logs and flat arrays.
#[derive(Debug, Default)]
pub struct LinearCursor {
    prev: Option<String>,
}

impl LinearCursor {
    /// Parent id for the message `id`, then advance the cursor to it.
    pub fn advance(&mut self, id: &str) -> String {
        let parent = self.prev.take().unwrap_or_default();
        self.prev = Some(id.to_string());
        parent
    }
}

/// How a vendor numbers its rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundRule {
    /// Increment at every user message, starting from `start`.
    OnUser { start: i64 },
    /// Increment at a user message that follows an assistant message.
    UserAfterAssistant { start: i64 },
}

#[derive(Debug)]
pub struct RoundCounter {
    rule: RoundRule,
    current: i64,
    assistant_seen: bool,
}

impl RoundCounter {
    pub fn new(rule: RoundRule) -> Self {
        let current = match rule {
            RoundRule::OnUser { start } | RoundRule::UserAfterAssistant { start } => start,
        };
        Self {
            rule,
            current,
            assistant_seen: false,
        }
    }

    /// Round index for the next emitted message with `role`.
    pub fn next(&mut self, role: Role) -> i64 {
        match self.rule {
            RoundRule::OnUser { .. } => {
                if role == Role::User {
                    self.current += 1;
                }
            }
            RoundRule::UserAfterAssistant { .. } => {
                if role == Role::User && self.assistant_seen {
                    self.current += 1;
                    self.assistant_seen = false;
                } else if role == Role::Assistant {
                    self.assistant_seen = true;
                }
            }
        }
        self.current
    }
}

/// Set each message's `child_id` to the next message in the chain whose
/// `parent_id` is this message's id.
pub fn link_children(messages: &mut [ParsedMessage]) {
    for i in 0..messages.len() {
        let id = messages[i].id.clone();
        let child = messages[i + 1..]
            .iter()
            .find(|m| m.parent_id == id)
            .map(|m| m.id.clone());
        messages[i].child_id = child;
    }
}
