//! Word completion over the command tree.
//!
//! The entry point walks the tree from the session's current node, collecting
//! candidate continuations for the token under the cursor. It never mutates
//! the tree apart from the (idempotent) first-touch expansion of dynamic
//! children, and calling it twice with the same input yields the same result.

use super::{CommandTree, NodeId, EXECUTE_THIS_COMMAND};
use crate::token::{has_more_tokens, is_token_separator, pop_token};
use std::collections::BTreeSet;

/// A single completion candidate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Completion {
    /// The missing remainder of the candidate name.
    pub name_suffix: String,
    /// Help text displayed next to the candidate.
    pub type_suffix: Option<String>,
    /// Appended after an unambiguous completion.
    pub cont_suffix: &'static str,
}

/// Everything a caller needs to act on a completion attempt.
#[derive(Debug, Default)]
pub struct CompletionResult {
    /// Candidate continuations in tree walk order.
    pub completions: Vec<Completion>,
    /// Names of matched literal-keyword nodes.
    pub literal_names: BTreeSet<String>,
    /// Names of matched type-argument nodes.
    pub type_names: BTreeSet<String>,
}

impl CompletionResult {
    /// More than one distinct literal name shares the typed prefix.
    pub fn is_ambiguous(&self) -> bool {
        self.literal_names.len() > 1
    }

    /// The longest shared prefix of all candidate suffixes.
    pub fn common_suffix(&self) -> String {
        let mut iter = self.completions.iter();
        let mut common = match iter.next() {
            Some(c) => c.name_suffix.clone(),
            None => return String::new(),
        };
        for c in iter {
            let shared = common
                .chars()
                .zip(c.name_suffix.chars())
                .take_while(|(a, b)| a == b)
                .count();
            common.truncate(shared);
            if common.is_empty() {
                break;
            }
        }
        common
    }
}

/// Attempt to complete `line` (already truncated at the cursor) against the
/// children of `current`, including the shared pipe subtree where piping is
/// allowed.
pub fn attempt_completion(
    tree: &mut CommandTree,
    current: NodeId,
    line: &str,
) -> CompletionResult {
    let mut result = CompletionResult::default();
    let mut matches = Vec::new();

    for child in tree.children(current) {
        complete_node(tree, child, line, &mut result, &mut matches);
    }
    if tree.node(current).can_pipe() {
        if let Some(pipe) = tree.pipe_node() {
            complete_node(tree, pipe, line, &mut result, &mut matches);
        }
    }

    for id in matches {
        let node = tree.node(id);
        if node.has_type_match() {
            result.type_names.insert(node.name().to_string());
        } else {
            result.literal_names.insert(node.name().to_string());
        }
    }
    result
}

/// Recursive per-node completion; returns true if this subtree contributed.
fn complete_node(
    tree: &mut CommandTree,
    id: NodeId,
    line: &str,
    result: &mut CompletionResult,
    matches: &mut Vec<NodeId>,
) -> bool {
    let mut token_line = line.to_string();
    let token = pop_token(&mut token_line);

    {
        let node = tree.node(id);
        if !node.is_same_prefix(&token) && !node.has_type_match() {
            return false;
        }
    }

    let is_command_completed = match token_line.chars().next() {
        Some(first) => is_token_separator(first) || token == "|",
        None => false,
    };

    if !is_command_completed {
        let node = tree.node(id);
        if node.has_type_match() {
            // Nothing to complete; the caller prints the typed-argument help
            matches.push(id);
            return true;
        }
        result.completions.push(Completion {
            name_suffix: node.name()[token.len()..].to_string(),
            type_suffix: Some(node.help_completion().to_string()),
            cont_suffix: " ",
        });
        matches.push(id);
        return true;
    }

    // A complete token: it must actually match to continue downwards
    let is_token_match = {
        let node = tree.node(id);
        if node.has_type_match() {
            node.type_matches(&token)
        } else {
            node.is_same_command(&token)
        }
    };
    if !is_token_match {
        return false;
    }

    let mut is_child_completion = false;
    {
        let node = tree.node(id);
        if node.can_complete() && !has_more_tokens(&token_line) && !node.is_argument_expected() {
            result.completions.push(Completion {
                name_suffix: String::new(),
                type_suffix: Some(EXECUTE_THIS_COMMAND.to_string()),
                cont_suffix: " ",
            });
            is_child_completion = true;
        }
    }

    if tree.node(id).can_pipe() {
        if let Some(pipe) = tree.pipe_node() {
            if complete_node(tree, pipe, &token_line, result, matches) {
                is_child_completion = true;
            }
        }
    }

    for child in tree.children(id) {
        if complete_node(tree, child, &token_line, result, matches) {
            is_child_completion = true;
        }
    }

    is_child_completion
}
