//! The channel that ships commands to remote processor modules.
//!
//! The CLI never talks to a transport directly; commands marked as remote
//! are handed to a [`CommandDispatcher`] and the asynchronous reply comes
//! back through the session manager's
//! [`recv_process_command_output`](crate::node::CliNode::recv_process_command_output).

/// Outbound side of the remote command channel.
///
/// Both calls are fire-and-forget; the remote side owns its own cleanup and
/// replies (if any) are correlated back by `(term_name, session_id)`.
pub trait CommandDispatcher {
    /// Ship a command to the processor module named `target`.
    #[allow(clippy::too_many_arguments)]
    fn send(
        &self,
        target: &str,
        server_name: &str,
        term_name: &str,
        session_id: u32,
        command_global_name: &str,
        args_joined: &str,
    );

    /// Signal the remote side that the operator interrupted the command.
    fn interrupt(
        &self,
        server_name: &str,
        term_name: &str,
        session_id: u32,
        command_global_name: &str,
        args: &[String],
    );
}

/// A dispatcher that drops everything; used when no processor modules are
/// wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDispatcher;

impl CommandDispatcher for NullDispatcher {
    fn send(&self, _: &str, _: &str, _: &str, _: u32, _: &str, _: &str) {}

    fn interrupt(&self, _: &str, _: &str, _: u32, _: &str, _: &[String]) {}
}
