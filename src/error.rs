//! Error handling helpers and primitives.

use thiserror::Error;

/// Chain creates a string from an error stack.
pub fn chain(res: anyhow::Error) -> String {
    res.chain()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[derive(Debug, Error, PartialEq)]
/// Errors produced by the tokenizer.
pub enum TokenError {
    #[error("unterminated quote")]
    UnterminatedQuote,
}

#[derive(Debug, Error, PartialEq)]
/// Errors produced while mutating the command tree.
pub enum TreeError {
    #[error("command '{0}' already installed")]
    CommandExists(String),
    #[error("cannot find parent command for '{0}'")]
    MissingParent(String),
    #[error("command '{0}' cannot be modified")]
    Immutable(String),
}

#[derive(Debug, Error, PartialEq)]
/// Errors produced by pipe stages.
pub enum PipeError {
    #[error("invalid regular expression '{0}'")]
    RegexInvalid(String),
    #[error("pipe '{0}' is not implemented")]
    Unimplemented(String),
    #[error("missing argument for pipe '{0}'")]
    ArgsMissing(String),
}

#[derive(Debug, Error, PartialEq)]
/// Errors produced while dispatching a parsed command line.
pub enum DispatchError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("command \"{0}\" is not executable")]
    NotExecutable(String),
    #[error("command \"{0}\" cannot be executed with argument \"{1}\"")]
    BadArgument(String, String),
}

#[derive(Debug, Error, PartialEq)]
/// Session-fatal errors; all of them destroy the session but never the
/// session manager.
pub enum SessionError {
    #[error("data buffer full")]
    BufferFull,
    #[error("telnet subnegotiation buffer overflow")]
    TelnetOverflow,
    #[error("connection closed")]
    IoClosed,
    #[error("CLI access from address {0} is not allowed")]
    AclDenied(String),
    #[error("Too many CLI connections (max is {0})")]
    PoolExhausted(u32),
}

#[derive(Debug, Error, PartialEq)]
/// Errors around the remote command channel.
pub enum RemoteError {
    #[error("no reply from command processor")]
    NoReply,
    #[error("{0}")]
    RemoteFailure(String),
}
