//! The operator command-line interface subsystem of the XORP router
//! platform: a multi-session, telnet-reachable command shell with a
//! hierarchical command tree, output pipes and interactive pagination.

pub mod client;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod editor;
pub mod error;
pub mod node;
pub mod pager;
pub mod server;
pub mod telnet;
pub mod token;
pub mod tty;

pub use config::Config;
pub use node::CliNode;
pub use server::Server;
