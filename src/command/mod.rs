//! Hierarchical command tree and dispatch data model.
//!
//! Nodes live in an arena owned by the tree; they are addressed by
//! [`NodeId`] so that sessions can hold references into the tree without
//! creating ownership cycles. Children are kept lexicographically ordered
//! at all times and sibling names are unique.

pub mod completion;
pub mod pipe;

use crate::{
    error::TreeError,
    token::{copy_token, pop_token, vec_to_line},
};
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use log::{debug, warn};
use pipe::{PipeKind, PIPE_COMMAND_NAMES};
use std::{collections::BTreeMap, collections::BTreeSet, rc::Rc};

/// The synthetic completion entry offered for an executable command.
pub const EXECUTE_THIS_COMMAND: &str = "<[Enter]>            Execute this command\r\n";

/// Everything a process or interrupt callback learns about an invocation.
#[derive(Clone, Debug, Default)]
pub struct CommandRequest {
    pub server_name: String,
    pub term_name: String,
    pub session_id: u32,
    pub command_global_name: String,
    pub args: Vec<String>,
}

/// In-process command handler; returns the produced output text.
pub type ProcessCallback = Rc<dyn Fn(&CommandRequest) -> Result<String, String>>;

/// Fire-and-forget interrupt handler.
pub type InterruptCallback = Rc<dyn Fn(&CommandRequest)>;

/// Predicate deciding whether a token matches a typed argument node.
pub type TypeMatchFn = Rc<dyn Fn(&str) -> bool>;

#[derive(Clone)]
/// How an executable command is carried out.
pub enum CommandHandler {
    /// Run in-process and print the returned text.
    Process(ProcessCallback),
    /// Ship to the remote module stored in the node's server name.
    Remote,
}

/// Generator for lazily expanded children of a command node.
pub trait DynamicChildren {
    /// Produce the children of the node with the given global name.
    fn expand(&self, global_name: &[String]) -> BTreeMap<String, NodeDescriptor>;
}

#[derive(Builder, CopyGetters, Getters)]
#[builder(default, pattern = "owned", setter(into))]
/// Attributes of one dynamically generated child command.
pub struct NodeDescriptor {
    #[get = "pub"]
    /// The help text shown next to the command name.
    help: String,

    #[get_copy = "pub"]
    /// True if the generated node can be executed.
    is_executable: bool,

    #[get_copy = "pub"]
    /// True if the generated node accepts `|` after it.
    can_pipe: bool,

    #[get_copy = "pub"]
    /// True if pagination is off by default for this command.
    default_nomore_mode: bool,

    #[get_copy = "pub"]
    /// True if the node stands for a user-supplied value, not a keyword.
    is_command_argument: bool,

    #[get_copy = "pub"]
    /// True if executing the command requires at least one more argument.
    is_argument_expected: bool,

    /// Optional predicate matching arbitrary tokens instead of the name.
    type_match: Option<TypeMatchFn>,
}

impl Default for NodeDescriptor {
    fn default() -> Self {
        Self {
            help: String::new(),
            is_executable: false,
            can_pipe: false,
            default_nomore_mode: false,
            is_command_argument: false,
            is_argument_expected: false,
            type_match: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
/// Opaque arena index of a command node.
pub struct NodeId(usize);

/// One node of the command tree.
pub struct CommandNode {
    name: String,
    help: String,
    help_completion: String,
    global_name: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    allow_cd: bool,
    cd_prompt: String,
    can_pipe: bool,
    default_nomore_mode: bool,
    is_command_argument: bool,
    is_argument_expected: bool,
    server_name: String,
    type_match: Option<TypeMatchFn>,
    handler: Option<CommandHandler>,
    interrupt: Option<InterruptCallback>,
    dynamic_children: Option<Rc<dyn DynamicChildren>>,
    has_dynamic_children: bool,
    dynamic_handler: Option<CommandHandler>,
    dynamic_interrupt: Option<InterruptCallback>,
}

impl CommandNode {
    fn new(name: &str, help: &str) -> Self {
        // Align the help text for the completion listing
        let pad = 20usize.saturating_sub(name.len()).max(1);
        let help_completion = format!(" {}{}\r\n", " ".repeat(pad), help);
        Self {
            name: name.to_string(),
            help: help.to_string(),
            help_completion,
            global_name: Vec::new(),
            parent: None,
            children: Vec::new(),
            allow_cd: false,
            cd_prompt: String::new(),
            can_pipe: false,
            default_nomore_mode: false,
            is_command_argument: false,
            is_argument_expected: false,
            server_name: String::new(),
            type_match: None,
            handler: None,
            interrupt: None,
            dynamic_children: None,
            has_dynamic_children: false,
            dynamic_handler: None,
            dynamic_interrupt: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn help_completion(&self) -> &str {
        &self.help_completion
    }

    pub fn global_name(&self) -> &[String] {
        &self.global_name
    }

    /// The global name joined into a single line.
    pub fn global_name_str(&self) -> String {
        vec_to_line(&self.global_name)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn allow_cd(&self) -> bool {
        self.allow_cd
    }

    pub fn cd_prompt(&self) -> &str {
        &self.cd_prompt
    }

    pub fn can_pipe(&self) -> bool {
        self.can_pipe
    }

    pub fn default_nomore_mode(&self) -> bool {
        self.default_nomore_mode
    }

    pub fn is_command_argument(&self) -> bool {
        self.is_command_argument
    }

    pub fn is_argument_expected(&self) -> bool {
        self.is_argument_expected
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn set_server_name(&mut self, v: &str) {
        self.server_name = v.to_string();
    }

    pub fn handler(&self) -> Option<&CommandHandler> {
        self.handler.as_ref()
    }

    pub fn interrupt_callback(&self) -> Option<&InterruptCallback> {
        self.interrupt.as_ref()
    }

    pub fn has_type_match(&self) -> bool {
        self.type_match.is_some()
    }

    /// Apply the type-match predicate to a token.
    pub fn type_matches(&self, token: &str) -> bool {
        self.type_match.as_ref().map_or(false, |tm| tm(token))
    }

    /// Tests if `token` can be a prefix of this command's name.
    pub fn is_same_prefix(&self, token: &str) -> bool {
        self.name.starts_with(token)
    }

    /// Tests if `token` matches this command's name exactly.
    pub fn is_same_command(&self, token: &str) -> bool {
        self.name == token
    }

    /// A command can be completed if it is executable or enterable.
    pub fn can_complete(&self) -> bool {
        self.handler.is_some() || self.allow_cd
    }
}

/// The arena-backed command tree.
pub struct CommandTree {
    nodes: Vec<Option<CommandNode>>,
    free: Vec<usize>,
    root: NodeId,
    pipe: Option<NodeId>,
}

impl Default for CommandTree {
    fn default() -> Self {
        let mut root = CommandNode::new("", "");
        root.allow_cd = true;
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            pipe: None,
        }
    }
}

impl CommandTree {
    /// The root node of the tree.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The shared `|` pipe node, if [`add_pipes`](Self::add_pipes) ran.
    pub fn pipe_node(&self) -> Option<NodeId> {
        self.pipe
    }

    /// Immutable access to a node.
    pub fn node(&self, id: NodeId) -> &CommandNode {
        self.nodes[id.0].as_ref().expect("live command node")
    }

    /// Mutable access to a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut CommandNode {
        self.nodes[id.0].as_mut().expect("live command node")
    }

    fn alloc(&mut self, node: CommandNode) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Attach a prebuilt node as a child, keeping children ordered by name
    /// and sibling names unique.
    fn attach(&mut self, parent: NodeId, mut node: CommandNode) -> Result<NodeId, TreeError> {
        let mut insert_pos = self.node(parent).children.len();
        for (i, child_id) in self.node(parent).children.iter().enumerate() {
            let child = self.node(*child_id);
            if child.is_same_command(&node.name) {
                return Err(TreeError::CommandExists(node.name.clone()));
            }
            if child.name > node.name && i < insert_pos {
                insert_pos = i;
            }
        }
        node.parent = Some(parent);
        let mut global_name = self.node(parent).global_name.clone();
        global_name.push(node.name.clone());
        node.global_name = global_name;
        let id = self.alloc(node);
        self.node_mut(parent).children.insert(insert_pos, id);
        Ok(id)
    }

    /// Add a command below `parent`. The path may span multiple levels, in
    /// which case all intermediate ancestors must already exist.
    pub fn add_command(
        &mut self,
        parent: NodeId,
        path: &str,
        help: &str,
    ) -> Result<NodeId, TreeError> {
        let mut tokens = Vec::new();
        let mut line = path.to_string();
        loop {
            let token = pop_token(&mut line);
            if token.is_empty() {
                break;
            }
            tokens.push(token);
        }
        let name = match tokens.last() {
            Some(name) => name.clone(),
            None => return Err(TreeError::MissingParent(path.to_string())),
        };

        // Walk down to the parent of the new command
        let mut attach_to = parent;
        for token in &tokens[..tokens.len() - 1] {
            attach_to = self
                .command_find(attach_to, token)
                .ok_or_else(|| TreeError::MissingParent(path.to_string()))?;
        }

        let node = CommandNode::new(&name, help);
        let id = self.attach(attach_to, node).map_err(|e| {
            warn!("Error installing '{}': {}", path, e);
            e
        })?;
        debug!("Installed command '{}'", self.node(id).global_name_str());
        Ok(id)
    }

    /// Add an executable command; piping is enabled by default, as any
    /// output-producing command can be filtered.
    pub fn add_process_command(
        &mut self,
        parent: NodeId,
        path: &str,
        help: &str,
        callback: ProcessCallback,
        interrupt: Option<InterruptCallback>,
    ) -> Result<NodeId, TreeError> {
        let id = self.add_command(parent, path, help)?;
        let node = self.node_mut(id);
        node.handler = Some(CommandHandler::Process(callback));
        node.interrupt = interrupt;
        node.can_pipe = true;
        Ok(id)
    }

    /// Add a command that is executed by a remote processor module.
    pub fn add_remote_command(
        &mut self,
        parent: NodeId,
        path: &str,
        help: &str,
        server_name: &str,
    ) -> Result<NodeId, TreeError> {
        let id = self.add_command(parent, path, help)?;
        let node = self.node_mut(id);
        node.handler = Some(CommandHandler::Remote);
        node.server_name = server_name.to_string();
        node.can_pipe = true;
        Ok(id)
    }

    /// Enable or disable "cd" into a node; a non-empty prompt replaces the
    /// session prompt while inside.
    pub fn set_allow_cd(&mut self, id: NodeId, allow: bool, cd_prompt: &str) {
        let node = self.node_mut(id);
        node.allow_cd = allow;
        if !cd_prompt.is_empty() {
            node.cd_prompt = cd_prompt.to_string();
        }
    }

    pub fn set_can_pipe(&mut self, id: NodeId, v: bool) {
        self.node_mut(id).can_pipe = v;
    }

    pub fn set_is_argument_expected(&mut self, id: NodeId, v: bool) {
        self.node_mut(id).is_argument_expected = v;
    }

    pub fn set_type_match(&mut self, id: NodeId, type_match: TypeMatchFn) {
        self.node_mut(id).type_match = Some(type_match);
    }

    /// Install the dynamic children generator plus the handlers copied onto
    /// executable generated children.
    pub fn set_dynamic_children(
        &mut self,
        id: NodeId,
        generator: Rc<dyn DynamicChildren>,
        handler: Option<CommandHandler>,
        interrupt: Option<InterruptCallback>,
    ) {
        let node = self.node_mut(id);
        node.dynamic_children = Some(generator);
        node.has_dynamic_children = true;
        node.dynamic_handler = handler;
        node.dynamic_interrupt = interrupt;
    }

    /// Delete the node at `path` below `from`, along with its subtree.
    ///
    /// Returns the ids of every removed node. The freed ids may be reused
    /// by later insertions, so callers holding node references elsewhere
    /// (like sessions that have "cd"-ed into the subtree) must drop or
    /// reset them before touching the tree again.
    pub fn delete_command(&mut self, from: NodeId, path: &str) -> Result<Vec<NodeId>, TreeError> {
        let mut line = path.to_string();
        let mut parent = from;
        let mut target = None;
        loop {
            let token = pop_token(&mut line);
            if token.is_empty() {
                break;
            }
            if let Some(found) = target {
                parent = found;
            }
            target = self.command_find(parent, &token);
            if target.is_none() {
                break;
            }
        }
        let target = target.ok_or_else(|| TreeError::MissingParent(path.to_string()))?;
        self.node_mut(parent).children.retain(|c| *c != target);
        let mut removed = Vec::new();
        self.release_subtree(target, &mut removed);
        debug!("Deleted command '{}'", path);
        Ok(removed)
    }

    fn release_subtree(&mut self, id: NodeId, removed: &mut Vec<NodeId>) {
        let children = self.node(id).children.clone();
        for child in children {
            self.release_subtree(child, removed);
        }
        self.nodes[id.0] = None;
        self.free.push(id.0);
        removed.push(id);
    }

    /// Install the canonical pipe command set. The `|` node is owned by the
    /// tree but is not a regular child of the root; it is shared by every
    /// command with `can_pipe` set.
    pub fn add_pipes(&mut self) -> Result<NodeId, TreeError> {
        let mut pipe_root = CommandNode::new("|", "Pipe through a command");
        pipe_root.parent = Some(self.root);
        pipe_root.global_name = vec!["|".to_string()];
        let pipe_id = self.alloc(pipe_root);
        self.pipe = Some(pipe_id);

        for name in PIPE_COMMAND_NAMES {
            let kind = PipeKind::from_name(name).expect("known pipe name");
            let mut node = CommandNode::new(name, kind.help());
            // A dummy handler marks every pipe command as executable
            node.handler = Some(CommandHandler::Process(Rc::new(|_| Ok(String::new()))));
            node.can_pipe = true;
            node.is_argument_expected = kind.wants_regex();
            self.attach(pipe_id, node)?;
        }
        Ok(pipe_id)
    }

    /// The children of a node, expanding dynamic children on first access.
    pub fn children(&mut self, id: NodeId) -> Vec<NodeId> {
        self.expand_dynamic_children(id);
        self.node(id).children.clone()
    }

    fn expand_dynamic_children(&mut self, id: NodeId) {
        if !self.node(id).has_dynamic_children || !self.node(id).children.is_empty() {
            return;
        }
        // Now we have run this, we won't need to run it again
        self.node_mut(id).has_dynamic_children = false;

        let generator = match self.node(id).dynamic_children.clone() {
            Some(g) => g,
            None => return,
        };
        let global_name = self.node(id).global_name.clone();
        let dynamic_handler = self.node(id).dynamic_handler.clone();
        let dynamic_interrupt = self.node(id).dynamic_interrupt.clone();
        let server_name = self.node(id).server_name.clone();

        for (name, descriptor) in generator.expand(&global_name) {
            let mut node = CommandNode::new(&name, descriptor.help());
            node.can_pipe = descriptor.can_pipe();
            node.default_nomore_mode = descriptor.default_nomore_mode();
            node.is_command_argument = descriptor.is_command_argument();
            node.is_argument_expected = descriptor.is_argument_expected();
            node.type_match = descriptor.type_match.clone();
            node.server_name = server_name.clone();
            // Generated nodes inherit the dynamic callbacks so expansion
            // can recurse lazily
            node.dynamic_children = Some(generator.clone());
            node.has_dynamic_children = true;
            node.dynamic_handler = dynamic_handler.clone();
            node.dynamic_interrupt = dynamic_interrupt.clone();
            if descriptor.is_executable() {
                node.handler = dynamic_handler.clone();
                node.interrupt = dynamic_interrupt.clone();
            }
            if let Err(e) = self.attach(id, node) {
                warn!("Cannot add dynamic command '{}': {}", name, e);
            }
        }
    }

    /// Find the child matching `token`: a type-match child accepting the
    /// token wins over a literal name comparison.
    pub fn command_find(&mut self, id: NodeId, token: &str) -> Option<NodeId> {
        for child_id in self.children(id) {
            let child = self.node(child_id);
            if child.has_type_match() {
                if child.type_matches(token) {
                    return Some(child_id);
                }
                continue;
            }
            if child.is_same_command(token) {
                return Some(child_id);
            }
        }
        None
    }

    /// Repeatedly apply [`command_find`](Self::command_find) while consuming
    /// tokens; returns the deepest matching node.
    pub fn multi_command_find(&mut self, from: NodeId, line: &str) -> NodeId {
        let mut current = from;
        let mut rest = line.to_string();
        loop {
            let token = pop_token(&mut rest);
            if token.is_empty() {
                break;
            }
            match self.command_find(current, &token) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    /// True iff the line is a strict prefix of a multi-token command but not
    /// itself a full command.
    pub fn is_multi_command_prefix(&mut self, from: NodeId, line: &str) -> bool {
        let mut current = from;
        let mut rest = line.to_string();
        loop {
            let token = pop_token(&mut rest);
            if token.is_empty() {
                break;
            }
            if let Some(next) = self.command_find(current, &token) {
                current = next;
                continue;
            }
            for child_id in self.children(current) {
                if self.node(child_id).is_same_prefix(&token) {
                    return true;
                }
            }
            break;
        }
        false
    }

    /// Collect help rows for every node reachable from the partial input.
    /// `line` is the edited line truncated at the cursor.
    pub fn find_command_help(
        &mut self,
        id: NodeId,
        line: &str,
        help_strings: &mut BTreeSet<String>,
    ) -> bool {
        let mut token_line = line.to_string();
        let token = pop_token(&mut token_line);

        let node = self.node(id);
        if !node.is_same_prefix(&token) && !node.has_type_match() {
            return false;
        }

        let is_token_match = if node.has_type_match() {
            node.type_matches(&token)
        } else {
            node.is_same_command(&token)
        };

        if let Some(first) = token_line.chars().next() {
            if crate::token::is_token_separator(first) && !is_token_match {
                return false;
            }
        }

        let is_no_space_at_end = token_line.is_empty();
        let next_token = pop_token(&mut token_line);

        if next_token.is_empty() && is_no_space_at_end {
            // The last token with no trailing space: print this node's help
            help_strings.insert(format!(
                "  {:<19}  {}\r\n",
                self.node(id).name(),
                self.node(id).help()
            ));
            return true;
        }

        let mut ret_value = false;
        if next_token.is_empty()
            && self.node(id).can_complete()
            && !self.node(id).is_argument_expected()
        {
            help_strings.insert(format!(
                "  {:<19}  {}\r\n",
                "<[Enter]>", "Execute this command"
            ));
            ret_value = true;
        }

        // Not the last token: search down for help
        let sub_line = format!("{}{}", copy_token(&next_token), token_line);
        for child_id in self.children(id) {
            ret_value |= self.find_command_help(child_id, &sub_line, help_strings);
        }
        if self.node(id).can_pipe() {
            if let Some(pipe_id) = self.pipe {
                ret_value |= self.find_command_help(pipe_id, &sub_line, help_strings);
            }
        }
        ret_value
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use anyhow::Result;

    pub fn noop_callback() -> ProcessCallback {
        Rc::new(|_| Ok(String::new()))
    }

    fn names(tree: &mut CommandTree, id: NodeId) -> Vec<String> {
        tree.children(id)
            .iter()
            .map(|c| tree.node(*c).name().to_string())
            .collect()
    }

    #[test]
    fn children_stay_lexicographically_ordered() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;
        tree.add_command(root, "configure", "Enter configuration mode")?;
        tree.add_command(root, "exit", "Leave the CLI")?;

        assert_eq!(names(&mut tree, root), vec!["configure", "exit", "show"]);
        Ok(())
    }

    #[test]
    fn parent_links_are_consistent() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;
        let version = tree.add_command(root, "show version", "Show version")?;

        let show = tree.command_find(root, "show").unwrap();
        assert_eq!(tree.node(show).parent(), Some(root));
        assert_eq!(tree.node(version).parent(), Some(show));
        assert!(tree.children(show).contains(&version));
        Ok(())
    }

    #[test]
    fn duplicate_sibling_is_rejected() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;

        let res = tree.add_command(root, "show", "Again");
        assert_eq!(res.err(), Some(TreeError::CommandExists("show".into())));
        Ok(())
    }

    #[test]
    fn multilevel_path_requires_ancestors() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();

        let res = tree.add_command(root, "show version", "Show version");
        assert_eq!(
            res.err(),
            Some(TreeError::MissingParent("show version".into()))
        );

        tree.add_command(root, "show", "Display information")?;
        let id = tree.add_command(root, "show version", "Show version")?;
        assert_eq!(tree.node(id).global_name_str(), "show version");
        Ok(())
    }

    #[test]
    fn delete_removes_subtree() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;
        tree.add_command(root, "show version", "Show version")?;
        tree.add_command(root, "show version detail", "Show version detail")?;

        let removed = tree.delete_command(root, "show version")?;

        // The node and its child are reported so stale references can be
        // invalidated by the caller
        assert_eq!(removed.len(), 2);
        assert_eq!(
            tree.delete_command(root, "show version"),
            Err(TreeError::MissingParent("show version".into()))
        );
        let show = tree.command_find(root, "show").unwrap();
        assert!(tree.children(show).is_empty());
        Ok(())
    }

    #[test]
    fn command_find_prefers_type_match() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "ping", "Send echo requests")?;
        let addr = tree.add_command(root, "ping address", "Destination address")?;
        tree.set_type_match(addr, Rc::new(|t| t.parse::<std::net::IpAddr>().is_ok()));

        let ping = tree.command_find(root, "ping").unwrap();
        assert!(tree.command_find(ping, "10.0.0.1").is_some());
        assert!(tree.command_find(ping, "not-an-address").is_none());
        Ok(())
    }

    #[test]
    fn multi_command_find_stops_at_last_match() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;
        let version = tree.add_command(root, "show version", "Show version")?;

        let found = tree.multi_command_find(root, "show version extra");
        assert_eq!(found, version);
        Ok(())
    }

    #[test]
    fn multi_command_prefix_detection() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;
        tree.add_command(root, "show version", "Show version")?;

        assert!(tree.is_multi_command_prefix(root, "show ver"));
        assert!(!tree.is_multi_command_prefix(root, "show version"));
        assert!(!tree.is_multi_command_prefix(root, "bogus"));
        Ok(())
    }

    #[test]
    fn pipes_install_canonical_children() -> Result<()> {
        let mut tree = CommandTree::default();
        let pipe = tree.add_pipes()?;

        assert_eq!(
            names(&mut tree, pipe),
            vec![
                "count", "except", "find", "hold", "match", "no-more", "resolve", "save", "trim"
            ]
        );
        // The pipe node is not a regular child of the root
        let root = tree.root();
        assert!(names(&mut tree, root).is_empty());
        Ok(())
    }

    struct StaticChildren;

    impl DynamicChildren for StaticChildren {
        fn expand(&self, global_name: &[String]) -> BTreeMap<String, NodeDescriptor> {
            assert!(!global_name.is_empty());
            let mut map = BTreeMap::new();
            map.insert(
                "eth0".to_string(),
                NodeDescriptorBuilder::default()
                    .help("Interface eth0")
                    .is_executable(true)
                    .can_pipe(true)
                    .build()
                    .unwrap(),
            );
            map.insert(
                "eth1".to_string(),
                NodeDescriptorBuilder::default()
                    .help("Interface eth1")
                    .build()
                    .unwrap(),
            );
            map
        }
    }

    #[test]
    fn dynamic_children_expand_once() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        let interfaces = tree.add_command(root, "interfaces", "Interface state")?;
        tree.set_dynamic_children(
            interfaces,
            Rc::new(StaticChildren),
            Some(CommandHandler::Process(noop_callback())),
            None,
        );

        let first = names(&mut tree, interfaces);
        let second = names(&mut tree, interfaces);
        assert_eq!(first, vec!["eth0", "eth1"]);
        assert_eq!(first, second);

        // Executable descriptor got the dynamic handler, the other did not
        let eth0 = tree.command_find(interfaces, "eth0").unwrap();
        let eth1 = tree.command_find(interfaces, "eth1").unwrap();
        assert!(tree.node(eth0).handler().is_some());
        assert!(tree.node(eth1).handler().is_none());
        Ok(())
    }

    #[test]
    fn find_command_help_lists_children() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "show", "Display information")?;
        tree.add_process_command(root, "show version", "Show version", noop_callback(), None)?;
        tree.add_process_command(root, "show vlan", "Show VLANs", noop_callback(), None)?;

        let mut help = BTreeSet::new();
        let mut found = false;
        for child in tree.children(root) {
            found |= tree.find_command_help(child, "show v", &mut help);
        }
        assert!(found);
        let rendered: Vec<&String> = help.iter().collect();
        assert_eq!(rendered.len(), 2);
        assert!(rendered[0].contains("version"));
        assert!(rendered[1].contains("vlan"));

        // With a trailing space after a complete command the executable row
        // shows up as well
        let mut help = BTreeSet::new();
        for child in tree.children(root) {
            tree.find_command_help(child, "show version ", &mut help);
        }
        assert!(help.iter().any(|h| h.contains("<[Enter]>")));
        Ok(())
    }

    #[test]
    fn global_name_materialized_at_insertion() -> Result<()> {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.add_command(root, "set", "Set variable")?;
        tree.add_command(root, "set log", "Set log state")?;
        let id = tree.add_command(root, "set log output", "Set log output")?;

        assert_eq!(
            tree.node(id).global_name(),
            ["set", "log", "output"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .as_slice()
        );
        Ok(())
    }
}
