//! The CLI node: command tree root plus session management.
//!
//! One `CliNode` exists per process. It owns the command tree and every
//! connected session, enforces the source-address ACL, hands out terminal
//! names and session IDs, fans log records out to subscribed sessions and
//! correlates remote command replies back to the originating session.

use crate::{
    client::{CliClient, InputStatus},
    command::{CommandRequest, CommandTree, NodeId},
    dispatch::CommandDispatcher,
    error::SessionError,
    token::pop_token,
};
use ipnetwork::IpNetwork;
use log::{debug, info, warn};
use nix::unistd;
use std::{
    cell::RefCell,
    collections::BTreeSet,
    net::IpAddr,
    rc::Rc,
    time::Instant,
};

/// Upper bound on concurrent CLI sessions; intentionally not a power of two.
pub const CLI_MAX_CONNECTIONS: u32 = 129;

/// The default operational prompt.
pub const XORP_CLI_PROMPT: &str = "Xorp> ";

/// The prompt shown in enabled (privileged) mode.
pub const XORP_CLI_PROMPT_ENABLE: &str = "XORP# ";

type LogSinks = Rc<RefCell<BTreeSet<String>>>;

/// The session manager and root of the command tree.
pub struct CliNode {
    tree: CommandTree,
    clients: Vec<CliClient>,
    enable_subnets: Vec<IpNetwork>,
    disable_subnets: Vec<IpNetwork>,
    next_session_id: u32,
    max_connections: u32,
    startup_prompt: String,
    dispatcher: Rc<dyn CommandDispatcher>,
    log_sinks: LogSinks,
}

impl CliNode {
    /// Create a node with the default command set installed.
    pub fn new(dispatcher: Rc<dyn CommandDispatcher>) -> Self {
        let mut tree = CommandTree::default();
        let root = tree.root();
        tree.set_allow_cd(root, true, XORP_CLI_PROMPT);
        tree.add_pipes().expect("install pipe commands");

        let mut node = Self {
            tree,
            clients: Vec::new(),
            enable_subnets: Vec::new(),
            disable_subnets: Vec::new(),
            next_session_id: 0,
            max_connections: CLI_MAX_CONNECTIONS,
            startup_prompt: XORP_CLI_PROMPT.to_string(),
            dispatcher,
            log_sinks: Rc::new(RefCell::new(BTreeSet::new())),
        };
        node.add_internal_commands();
        node
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut CommandTree {
        &mut self.tree
    }

    pub fn sessions(&self) -> &[CliClient] {
        &self.clients
    }

    pub fn set_max_connections(&mut self, v: u32) {
        self.max_connections = v;
    }

    pub fn set_startup_prompt(&mut self, v: &str) {
        self.startup_prompt = v.to_string();
        let root = self.tree.root();
        self.tree.set_allow_cd(root, true, v);
    }

    //
    // Access-control configuration
    //

    /// Add a subnet to the list of subnets enabled for CLI access.
    pub fn add_enable_cli_access_from_subnet(&mut self, subnet: IpNetwork) {
        if !self.enable_subnets.contains(&subnet) {
            self.enable_subnets.push(subnet);
        }
    }

    /// Delete a subnet from the list of subnets enabled for CLI access.
    pub fn delete_enable_cli_access_from_subnet(
        &mut self,
        subnet: &IpNetwork,
    ) -> Result<(), String> {
        let before = self.enable_subnets.len();
        self.enable_subnets.retain(|s| s != subnet);
        if self.enable_subnets.len() == before {
            return Err(format!("subnet {} not found", subnet));
        }
        Ok(())
    }

    /// Add a subnet to the list of subnets disabled for CLI access.
    pub fn add_disable_cli_access_from_subnet(&mut self, subnet: IpNetwork) {
        if !self.disable_subnets.contains(&subnet) {
            self.disable_subnets.push(subnet);
        }
    }

    /// Delete a subnet from the list of subnets disabled for CLI access.
    pub fn delete_disable_cli_access_from_subnet(
        &mut self,
        subnet: &IpNetwork,
    ) -> Result<(), String> {
        let before = self.disable_subnets.len();
        self.disable_subnets.retain(|s| s != subnet);
        if self.disable_subnets.len() == before {
            return Err(format!("subnet {} not found", subnet));
        }
        Ok(())
    }

    /// Longest-prefix ACL decision for a peer address.
    ///
    /// With no matching disable prefix access is allowed; with a disable
    /// match, access requires an enable match that is strictly more
    /// specific.
    pub fn is_allow_cli_access(&self, addr: &IpAddr) -> bool {
        let best_enable = Self::best_prefix(&self.enable_subnets, addr);
        let best_disable = Self::best_prefix(&self.disable_subnets, addr);

        match (best_enable, best_disable) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(enable), Some(disable)) => enable > disable,
        }
    }

    fn best_prefix(subnets: &[IpNetwork], addr: &IpAddr) -> Option<u8> {
        subnets
            .iter()
            .filter(|net| net.contains(*addr))
            .map(|net| net.prefix())
            .max()
    }

    //
    // Session lookup
    //

    pub fn find_cli_by_term_name(&self, term_name: &str) -> Option<&CliClient> {
        self.clients.iter().find(|c| c.term_name() == term_name)
    }

    pub fn find_cli_by_session_id(&self, session_id: u32) -> Option<&CliClient> {
        self.clients.iter().find(|c| c.session_id() == session_id)
    }

    fn index_by_session_id(&self, session_id: u32) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| c.session_id() == session_id)
    }

    //
    // Session lifecycle
    //

    /// Accept a new connection: resolve the peer, check the ACL, allocate
    /// the terminal name and session ID and send the startup banner.
    pub fn add_connection(
        &mut self,
        peer: Option<IpAddr>,
        is_network: bool,
    ) -> Result<u32, SessionError> {
        if let Some(addr) = peer {
            if !self.is_allow_cli_access(&addr) {
                warn!("CLI access from address {} is not allowed", addr);
                return Err(SessionError::AclDenied(addr.to_string()));
            }
        }

        let term_name = (0..self.max_connections)
            .map(|i| format!("cli{}", i))
            .find(|name| self.find_cli_by_term_name(name).is_none())
            .ok_or(SessionError::PoolExhausted(self.max_connections))?;

        let mut session_id = None;
        for _ in 0..self.max_connections {
            let candidate = self.next_session_id;
            self.next_session_id = self.next_session_id.wrapping_add(1);
            if self.find_cli_by_session_id(candidate).is_none() {
                session_id = Some(candidate);
                break;
            }
        }
        // A free slot guarantees a free ID by pigeonhole
        let session_id = session_id.ok_or(SessionError::PoolExhausted(self.max_connections))?;

        let mut client = CliClient::new(
            self.tree.root(),
            &self.startup_prompt,
            is_network,
            self.dispatcher.clone(),
        );
        client.set_term_name(&term_name);
        client.set_session_id(session_id);
        if let Some(addr) = peer {
            client.set_peer_addr(addr);
        }
        client.start_connection(&self.banner());
        info!(
            "New CLI session {} (ID {}) from {}",
            term_name,
            session_id,
            peer.map_or_else(|| "local terminal".to_string(), |a| a.to_string())
        );
        self.clients.push(client);
        Ok(session_id)
    }

    fn banner(&self) -> String {
        format!(
            "Welcome to XORP v{} on {}\n",
            env!("CARGO_PKG_VERSION"),
            Self::hostname()
        )
    }

    fn hostname() -> String {
        let mut buf = [0u8; 256];
        match unistd::gethostname(&mut buf) {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(_) => "xorp".to_string(),
        }
    }

    /// Tear down a session, returning it so the transport can flush and
    /// close the connection.
    pub fn delete_connection(&mut self, session_id: u32) -> Option<CliClient> {
        let idx = self.index_by_session_id(session_id)?;
        let mut client = self.clients.remove(idx);
        client.cli_flush();
        self.log_sinks.borrow_mut().remove(client.term_name());
        info!(
            "Deleted CLI session {} (ID {})",
            client.term_name(),
            session_id
        );
        Some(client)
    }

    //
    // Input processing
    //

    /// Feed raw connection bytes to a session. On error the session is
    /// removed and returned inside the error path of the transport.
    pub fn process_input(
        &mut self,
        session_id: u32,
        data: &[u8],
    ) -> Result<InputStatus, SessionError> {
        let idx = self
            .index_by_session_id(session_id)
            .ok_or(SessionError::IoClosed)?;
        let tree = &mut self.tree;
        let status = self.clients[idx].process_input(tree, data);
        self.apply_log_sinks();
        status
    }

    /// Resume processing of input deferred by the cooperative time slice.
    pub fn process_pending_input(
        &mut self,
        session_id: u32,
    ) -> Result<InputStatus, SessionError> {
        let idx = self
            .index_by_session_id(session_id)
            .ok_or(SessionError::IoClosed)?;
        let tree = &mut self.tree;
        let status = self.clients[idx].process_pending_input(tree);
        self.apply_log_sinks();
        status
    }

    /// Drain the bytes a session produced since the last call.
    pub fn take_output(&mut self, session_id: u32) -> Vec<u8> {
        match self.index_by_session_id(session_id) {
            Some(idx) => self.clients[idx].take_output(),
            None => Vec::new(),
        }
    }

    /// The remote-reply watchdog deadline of a session, if armed.
    pub fn watchdog_deadline(&self, session_id: u32) -> Option<Instant> {
        self.find_cli_by_session_id(session_id)
            .and_then(|c| c.watchdog_deadline())
    }

    /// Fire the remote-reply watchdog of a session.
    pub fn handle_watchdog_expiry(&mut self, session_id: u32) {
        if let Some(idx) = self.index_by_session_id(session_id) {
            self.clients[idx].handle_watchdog_expiry();
        }
    }

    /// Honor a window-size change of a local terminal session.
    pub fn update_window_size(&mut self, session_id: u32, width: u16, height: u16) {
        if let Some(idx) = self.index_by_session_id(session_id) {
            self.clients[idx].update_window_size(width, height);
        }
    }

    //
    // Command registration API, consumed by external subsystems
    //

    /// Install a command. With `is_processor` the command is shipped to the
    /// named processor module for execution; with `is_cd` the node becomes
    /// enterable with the given prompt.
    pub fn add_cli_command(
        &mut self,
        processor_name: &str,
        command_name: &str,
        command_help: &str,
        is_command_cd: bool,
        command_cd_prompt: &str,
        is_command_processor: bool,
    ) -> Result<(), String> {
        if command_name.is_empty() {
            return Err("ERROR: command name is empty".to_string());
        }
        let root = self.tree.root();
        let result = if is_command_processor {
            self.tree
                .add_remote_command(root, command_name, command_help, processor_name)
        } else {
            let id = self.tree.add_command(root, command_name, command_help);
            if let Ok(id) = &id {
                if is_command_cd {
                    self.tree.set_allow_cd(*id, true, command_cd_prompt);
                }
                self.tree.node_mut(*id).set_server_name(processor_name);
            }
            id
        };
        result
            .map(|_| ())
            .map_err(|e| format!("Cannot install command '{}': {}", command_name, e))
    }

    /// Remove a command and its whole subtree. Sessions that have "cd"-ed
    /// into the removed subtree are moved back to the root so their node
    /// references never dangle.
    pub fn delete_cli_command(
        &mut self,
        _processor_name: &str,
        command_name: &str,
    ) -> Result<(), String> {
        let root = self.tree.root();
        let removed = self
            .tree
            .delete_command(root, command_name)
            .map_err(|e| format!("Cannot delete command '{}': {}", command_name, e))?;
        for client in self.clients.iter_mut() {
            if removed.contains(&client.current_node()) {
                warn!(
                    "Session {} was inside deleted command '{}'; moving it to the root",
                    client.term_name(),
                    command_name
                );
                client.reset_to_root(&self.tree);
            }
        }
        Ok(())
    }

    //
    // Remote command replies
    //

    /// Deliver the output of a remotely processed command back to the
    /// originating session. Both the terminal name and the session ID must
    /// match; replies for sessions that are not waiting are dropped.
    pub fn recv_process_command_output(
        &mut self,
        _processor_name: &str,
        term_name: &str,
        session_id: u32,
        command_output: &str,
    ) {
        let idx = match self.index_by_session_id(session_id) {
            Some(idx) => idx,
            None => return,
        };
        if self.clients[idx].term_name() != term_name {
            return;
        }
        if !self.clients[idx].is_waiting_for_data() {
            // Probably too late; the command was interrupted meanwhile
            debug!(
                "Dropping late command output for session {} (ID {})",
                term_name, session_id
            );
            return;
        }
        self.clients[idx].receive_remote_output(command_output);
    }

    /// Flush intermediate output of a still-running remote command so the
    /// pager prompt stays current.
    pub fn flush_process_command_output(&mut self, session_id: u32) {
        if let Some(idx) = self.index_by_session_id(session_id) {
            self.clients[idx].flush_process_command_output();
        }
    }

    //
    // Log fan-out
    //

    /// Subscribe or unsubscribe a terminal as a log sink.
    pub fn set_log_output(&mut self, term_name: &str, enable: bool) -> Result<(), String> {
        if self.find_cli_by_term_name(term_name).is_none() {
            return Err(format!("no CLI terminal '{}'", term_name));
        }
        if enable {
            self.log_sinks.borrow_mut().insert(term_name.to_string());
        } else {
            self.log_sinks.borrow_mut().remove(term_name);
        }
        self.apply_log_sinks();
        Ok(())
    }

    fn apply_log_sinks(&mut self) {
        let sinks = self.log_sinks.borrow();
        for client in self.clients.iter_mut() {
            client.set_log_output(sinks.contains(client.term_name()));
        }
    }

    /// Deliver a log record to every subscribed session before returning.
    pub fn xlog_output(&mut self, msg: &str) {
        self.apply_log_sinks();
        for client in self.clients.iter_mut() {
            if client.is_log_output() {
                client.cli_print(msg);
                client.cli_print("");
                client.cli_flush();
            }
        }
    }

    //
    // Internal commands
    //

    fn add_internal_commands(&mut self) {
        let root = self.tree.root();
        self.tree
            .add_command(root, "show", "Display information")
            .expect("install 'show'");
        self.tree
            .add_command(root, "set", "Set variable")
            .expect("install 'set'");
        self.tree
            .add_command(root, "set log", "Set log-related state")
            .expect("install 'set log'");
        self.tree
            .add_command(root, "set log output", "Set output for log messages")
            .expect("install 'set log output'");
        self.tree
            .add_command(
                root,
                "set log output remove",
                "Remove output for log messages",
            )
            .expect("install 'set log output remove'");

        let sinks = self.log_sinks.clone();
        let id = self
            .tree
            .add_process_command(
                root,
                "show log",
                "Display log output state",
                Rc::new(move |request: &CommandRequest| {
                    let sinks = sinks.borrow();
                    let mut out = format!(
                        "Log output for {} is {}\n",
                        request.term_name,
                        if sinks.contains(&request.term_name) {
                            "enabled"
                        } else {
                            "disabled"
                        }
                    );
                    if sinks.is_empty() {
                        out.push_str("No log output terminals\n");
                    } else {
                        out.push_str("Log output terminals:\n");
                        for term in sinks.iter() {
                            out.push_str(&format!("  {}\n", term));
                        }
                    }
                    Ok(out)
                }),
                None,
            )
            .expect("install 'show log'");
        self.tree.set_can_pipe(id, true);

        let sinks = self.log_sinks.clone();
        let id = self
            .tree
            .add_process_command(
                root,
                "set log output cli",
                "Add a CLI terminal as log output",
                Rc::new(move |request: &CommandRequest| {
                    let term = Self::single_term_argument(request)?;
                    sinks.borrow_mut().insert(term.clone());
                    Ok(format!("Added CLI terminal {} as log output\n", term))
                }),
                None,
            )
            .expect("install 'set log output cli'");
        self.tree.set_is_argument_expected(id, true);

        let sinks = self.log_sinks.clone();
        let id = self
            .tree
            .add_process_command(
                root,
                "set log output remove cli",
                "Remove a CLI terminal as log output",
                Rc::new(move |request: &CommandRequest| {
                    let term = Self::single_term_argument(request)?;
                    if !sinks.borrow_mut().remove(&term) {
                        return Err(format!("CLI terminal {} is not a log output", term));
                    }
                    Ok(format!("Removed CLI terminal {} as log output\n", term))
                }),
                None,
            )
            .expect("install 'set log output remove cli'");
        self.tree.set_is_argument_expected(id, true);
    }

    fn single_term_argument(request: &CommandRequest) -> Result<String, String> {
        match request.args.as_slice() {
            [term] => {
                // Strip any quoting from the supplied terminal name
                let mut line = term.clone();
                Ok(pop_token(&mut line))
            }
            _ => Err("usage: <cli-terminal-name>".to_string()),
        }
    }

    /// The root of the command tree, for callers installing extra commands.
    pub fn cli_command_root(&self) -> NodeId {
        self.tree.root()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dispatch::NullDispatcher;
    use anyhow::Result;
    use std::str::FromStr;

    pub fn test_node() -> CliNode {
        CliNode::new(Rc::new(NullDispatcher))
    }

    fn drain(node: &mut CliNode, session_id: u32) -> String {
        String::from_utf8_lossy(&node.take_output(session_id)).into_owned()
    }

    fn run_line(node: &mut CliNode, session_id: u32, line: &str) -> String {
        let mut status = node
            .process_input(session_id, format!("{}\r\n", line).as_bytes())
            .unwrap();
        while status == InputStatus::Resched
            && !node
                .find_cli_by_session_id(session_id)
                .map_or(false, |c| c.is_waiting_for_data())
        {
            status = node.process_pending_input(session_id).unwrap();
        }
        drain(node, session_id)
    }

    #[test]
    fn acl_longest_prefix_wins() -> Result<()> {
        let mut node = test_node();
        node.add_enable_cli_access_from_subnet(IpNetwork::from_str("10.0.0.0/8")?);
        node.add_disable_cli_access_from_subnet(IpNetwork::from_str("0.0.0.0/0")?);

        assert!(node.is_allow_cli_access(&"10.1.2.3".parse()?));
        assert!(!node.is_allow_cli_access(&"192.0.2.1".parse()?));
        Ok(())
    }

    #[test]
    fn acl_defaults() -> Result<()> {
        let mut node = test_node();
        // No disable prefixes: allow by default
        assert!(node.is_allow_cli_access(&"192.0.2.1".parse()?));

        // Disable match without a more specific enable: deny
        node.add_disable_cli_access_from_subnet(IpNetwork::from_str("192.0.2.0/24")?);
        assert!(!node.is_allow_cli_access(&"192.0.2.1".parse()?));
        assert!(node.is_allow_cli_access(&"198.51.100.1".parse()?));

        // Equal-length enable does not override the disable
        node.add_enable_cli_access_from_subnet(IpNetwork::from_str("192.0.2.0/24")?);
        assert!(!node.is_allow_cli_access(&"192.0.2.1".parse()?));
        Ok(())
    }

    #[test]
    fn acl_families_are_independent() -> Result<()> {
        let mut node = test_node();
        node.add_disable_cli_access_from_subnet(IpNetwork::from_str("::/0")?);

        assert!(!node.is_allow_cli_access(&"2001:db8::1".parse()?));
        assert!(node.is_allow_cli_access(&"192.0.2.1".parse()?));
        Ok(())
    }

    #[test]
    fn connection_acl_rejects_before_banner() -> Result<()> {
        let mut node = test_node();
        node.add_enable_cli_access_from_subnet(IpNetwork::from_str("10.0.0.0/8")?);
        node.add_disable_cli_access_from_subnet(IpNetwork::from_str("0.0.0.0/0")?);

        let ok = node.add_connection(Some("10.1.2.3".parse()?), true);
        assert!(ok.is_ok());
        let out = drain(&mut node, ok.unwrap());
        assert!(out.contains("Welcome to XORP"));

        let denied = node.add_connection(Some("192.0.2.1".parse()?), true);
        assert_eq!(
            denied.err(),
            Some(SessionError::AclDenied("192.0.2.1".to_string()))
        );
        Ok(())
    }

    #[test]
    fn term_names_and_session_ids_are_unique() -> Result<()> {
        let mut node = test_node();
        let a = node.add_connection(None, true).unwrap();
        let b = node.add_connection(None, true).unwrap();
        let c = node.add_connection(None, true).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(c, 2);
        assert!(node.find_cli_by_term_name("cli0").is_some());
        assert!(node.find_cli_by_term_name("cli1").is_some());
        assert!(node.find_cli_by_term_name("cli2").is_some());

        // Freed terminal names are reused, session IDs keep counting
        node.delete_connection(b);
        let d = node.add_connection(None, true).unwrap();
        assert_eq!(d, 3);
        assert_eq!(
            node.find_cli_by_session_id(d).unwrap().term_name(),
            "cli1"
        );
        Ok(())
    }

    #[test]
    fn connection_pool_exhaustion() {
        let mut node = test_node();
        node.set_max_connections(2);
        node.add_connection(None, true).unwrap();
        node.add_connection(None, true).unwrap();

        let res = node.add_connection(None, true);
        assert_eq!(res.err(), Some(SessionError::PoolExhausted(2)));
    }

    #[test]
    fn command_registration_api() -> Result<()> {
        let mut node = test_node();
        node.add_cli_command("", "show version", "Show version", false, "", false)
            .map_err(|e| anyhow::anyhow!(e))?;
        node.add_cli_command("fea", "ping", "Send echo requests", false, "", true)
            .map_err(|e| anyhow::anyhow!(e))?;

        assert!(node
            .add_cli_command("", "show version", "Again", false, "", false)
            .is_err());

        node.delete_cli_command("", "show version")
            .map_err(|e| anyhow::anyhow!(e))?;
        assert!(node.delete_cli_command("", "show version").is_err());
        assert!(node.add_cli_command("", "", "empty", false, "", false).is_err());
        Ok(())
    }

    #[test]
    fn deleting_entered_command_resets_session() -> Result<()> {
        let mut node = test_node();
        node.add_cli_command(
            "",
            "configure",
            "Enter configuration mode",
            true,
            "Xorp-config> ",
            false,
        )
        .map_err(|e| anyhow::anyhow!(e))?;
        let a = node.add_connection(None, true).unwrap();
        drain(&mut node, a);

        let out = run_line(&mut node, a, "configure");
        assert!(out.ends_with("Xorp-config> "));

        node.delete_cli_command("", "configure")
            .map_err(|e| anyhow::anyhow!(e))?;

        // The session is back at the root, not on a freed node
        assert_eq!(
            node.find_cli_by_session_id(a).unwrap().current_node(),
            node.cli_command_root()
        );

        // Keystrokes that walk the tree from the current node keep working
        node.process_input(a, b"?").unwrap();
        let out = drain(&mut node, a);
        assert!(out.contains("Possible completions:"));

        let out = run_line(&mut node, a, "");
        assert!(out.ends_with(XORP_CLI_PROMPT));
        Ok(())
    }

    #[test]
    fn log_fanout_reaches_subscribed_sessions() -> Result<()> {
        let mut node = test_node();
        let a = node.add_connection(None, true).unwrap();
        let b = node.add_connection(None, true).unwrap();
        drain(&mut node, a);
        drain(&mut node, b);

        node.set_log_output("cli0", true).map_err(|e| anyhow::anyhow!(e))?;
        node.xlog_output("[ WARNING ] something happened\n");

        assert!(drain(&mut node, a).contains("something happened"));
        assert!(drain(&mut node, b).is_empty());
        Ok(())
    }

    #[test]
    fn set_log_output_via_command() -> Result<()> {
        let mut node = test_node();
        let a = node.add_connection(None, true).unwrap();
        drain(&mut node, a);

        let out = run_line(&mut node, a, "set log output cli cli0");
        assert!(out.contains("Added CLI terminal cli0 as log output"));

        node.xlog_output("[ INFO ] fan-out works\n");
        assert!(drain(&mut node, a).contains("fan-out works"));

        let out = run_line(&mut node, a, "show log");
        assert!(out.contains("Log output for cli0 is enabled"));
        assert!(out.contains("  cli0"));

        let out = run_line(&mut node, a, "set log output remove cli cli0");
        assert!(out.contains("Removed CLI terminal cli0 as log output"));
        node.xlog_output("[ INFO ] silence\n");
        assert!(!drain(&mut node, a).contains("silence"));
        Ok(())
    }

    #[test]
    fn late_remote_reply_is_dropped() -> Result<()> {
        let mut node = test_node();
        let a = node.add_connection(None, true).unwrap();
        drain(&mut node, a);

        // Session is not waiting: the reply must vanish
        node.recv_process_command_output("fea", "cli0", a, "stale output\n");
        assert!(drain(&mut node, a).is_empty());

        // Mismatched terminal name is dropped as well
        node.recv_process_command_output("fea", "cli99", a, "stale output\n");
        assert!(drain(&mut node, a).is_empty());
        Ok(())
    }

    #[test]
    fn remote_reply_resumes_session() -> Result<()> {
        let mut node = test_node();
        node.add_cli_command("fea", "ping", "Send echo requests", false, "", true)
            .map_err(|e| anyhow::anyhow!(e))?;
        let a = node.add_connection(None, true).unwrap();
        drain(&mut node, a);

        run_line(&mut node, a, "ping 10.0.0.1");
        assert!(node.find_cli_by_session_id(a).unwrap().is_waiting_for_data());
        assert!(node.watchdog_deadline(a).is_some());

        node.recv_process_command_output("fea", "cli0", a, "64 bytes from 10.0.0.1\n");
        let out = drain(&mut node, a);
        assert!(out.contains("64 bytes from 10.0.0.1"));
        assert!(out.contains(XORP_CLI_PROMPT));
        assert!(!node.find_cli_by_session_id(a).unwrap().is_waiting_for_data());
        assert!(node.watchdog_deadline(a).is_none());
        Ok(())
    }

    #[test]
    fn deleting_session_drops_log_sink() -> Result<()> {
        let mut node = test_node();
        let a = node.add_connection(None, true).unwrap();
        node.set_log_output("cli0", true).map_err(|e| anyhow::anyhow!(e))?;

        node.delete_connection(a);

        assert!(node.set_log_output("cli0", true).is_err());
        assert!(node.log_sinks.borrow().is_empty());
        Ok(())
    }
}
