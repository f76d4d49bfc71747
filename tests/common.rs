use anyhow::Result;
use getset::Getters;
use std::{cell::RefCell, net::IpAddr, rc::Rc};
use xorpcli::{
    client::InputStatus,
    dispatch::CommandDispatcher,
    error::SessionError,
    node::CliNode,
};

/// One captured dispatcher call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatchedCommand {
    pub target: String,
    pub term_name: String,
    pub session_id: u32,
    pub command: String,
    pub args: String,
}

/// A dispatcher capturing every outbound call for inspection.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: RefCell<Vec<DispatchedCommand>>,
    interrupted: RefCell<Vec<DispatchedCommand>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<DispatchedCommand> {
        self.sent.borrow().clone()
    }

    pub fn interrupted(&self) -> Vec<DispatchedCommand> {
        self.interrupted.borrow().clone()
    }
}

impl CommandDispatcher for RecordingDispatcher {
    fn send(
        &self,
        target: &str,
        _server_name: &str,
        term_name: &str,
        session_id: u32,
        command_global_name: &str,
        args_joined: &str,
    ) {
        self.sent.borrow_mut().push(DispatchedCommand {
            target: target.to_string(),
            term_name: term_name.to_string(),
            session_id,
            command: command_global_name.to_string(),
            args: args_joined.to_string(),
        });
    }

    fn interrupt(
        &self,
        server_name: &str,
        term_name: &str,
        session_id: u32,
        command_global_name: &str,
        args: &[String],
    ) {
        self.interrupted.borrow_mut().push(DispatchedCommand {
            target: server_name.to_string(),
            term_name: term_name.to_string(),
            session_id,
            command: command_global_name.to_string(),
            args: args.join(" "),
        });
    }
}

#[derive(Getters)]
/// System under test: a CLI node with a recording dispatcher, driven
/// through an in-memory transport.
pub struct Sut {
    #[get = "pub"]
    dispatcher: Rc<RecordingDispatcher>,

    node: CliNode,
}

impl Sut {
    pub fn start() -> Result<Self> {
        let dispatcher = Rc::new(RecordingDispatcher::default());
        let node = CliNode::new(dispatcher.clone());
        Ok(Self { dispatcher, node })
    }

    pub fn node(&mut self) -> &mut CliNode {
        &mut self.node
    }

    /// Connect a network session without a peer address (ACL bypassed) and
    /// return its session ID plus the startup output.
    pub fn connect(&mut self) -> Result<(u32, String)> {
        let session_id = self
            .node
            .add_connection(None, true)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let banner = self.output(session_id);
        Ok((session_id, banner))
    }

    /// Connect from a concrete peer address, subject to the ACL.
    pub fn connect_from(&mut self, addr: IpAddr) -> Result<u32, SessionError> {
        self.node.add_connection(Some(addr), true)
    }

    /// Send raw connection bytes and return everything the session
    /// transmitted in response.
    pub fn send(&mut self, session_id: u32, input: &[u8]) -> String {
        let mut status = self.node.process_input(session_id, input).unwrap();
        while status == InputStatus::Resched && !self.is_waiting(session_id) {
            status = self.node.process_pending_input(session_id).unwrap();
        }
        self.output(session_id)
    }

    /// Drain the transmitted bytes of a session.
    pub fn output(&mut self, session_id: u32) -> String {
        String::from_utf8_lossy(&self.node.take_output(session_id)).into_owned()
    }

    pub fn is_waiting(&self, session_id: u32) -> bool {
        self.node
            .find_cli_by_session_id(session_id)
            .map_or(false, |c| c.is_waiting_for_data())
    }
}

/// The transmitted bytes after the first echoed line.
pub fn after_echo(out: &str) -> &str {
    out.splitn(2, "\r\n").nth(1).unwrap_or("")
}
