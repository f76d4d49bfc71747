//! Configuration related structures
use crate::node::{CLI_MAX_CONNECTIONS, XORP_CLI_PROMPT};
use clap::Parser;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use lazy_static::lazy_static;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// The default TCP port the CLI listens on for telnet connections.
pub const DEFAULT_CLI_PORT: u16 = 12000;

lazy_static! {
    static ref DEFAULT_MAX_CONNECTIONS: String = CLI_MAX_CONNECTIONS.to_string();
    static ref DEFAULT_PORT: String = DEFAULT_CLI_PORT.to_string();
}

#[derive(Builder, Parser, CopyGetters, Getters, Deserialize, Serialize)]
#[builder(default, pattern = "owned", setter(into))]
#[serde(rename_all = "kebab-case")]
#[clap(
    about("XORP CLI - the operator command shell of the router platform"),
    after_help("More info at: http://xorp.net"),
    version
)]
/// Config is the main configuration structure for the CLI server.
pub struct Config {
    #[get_copy = "pub"]
    #[clap(
        default_value("info"),
        env("XORPCLI_LOG_LEVEL"),
        long("log-level"),
        short('l'),
        value_name("LEVEL")
    )]
    /// The logging level of the application
    log_level: LevelFilter,

    #[get_copy = "pub"]
    #[clap(
        default_value("0.0.0.0"),
        env("XORPCLI_BIND_ADDR"),
        long("bind-addr"),
        value_name("ADDR")
    )]
    /// The address the CLI listener binds to
    bind_addr: IpAddr,

    #[get_copy = "pub"]
    #[clap(
        default_value(&DEFAULT_PORT),
        env("XORPCLI_PORT"),
        long("port"),
        short('p'),
        value_name("PORT")
    )]
    /// The TCP port to listen on for telnet connections
    port: u16,

    #[get_copy = "pub"]
    #[clap(
        default_value(&DEFAULT_MAX_CONNECTIONS),
        env("XORPCLI_MAX_CONNECTIONS"),
        long("max-connections"),
        value_name("N")
    )]
    /// The maximum number of concurrent CLI sessions
    max_connections: u32,

    #[get = "pub"]
    #[clap(
        default_value(XORP_CLI_PROMPT),
        env("XORPCLI_PROMPT"),
        long("prompt"),
        value_name("PROMPT")
    )]
    /// The startup CLI prompt
    startup_prompt: String,

    #[get_copy = "pub"]
    #[clap(long("stdio"))]
    /// Attach an interactive session to the local terminal instead of
    /// listening on the network
    stdio: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_CLI_PORT,
            max_connections: CLI_MAX_CONNECTIONS,
            startup_prompt: XORP_CLI_PROMPT.to_string(),
            stdio: false,
        }
    }
}
