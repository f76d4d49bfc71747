use clap::Parser;
use xorpcli::{Config, Server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    Server::new(config).start()?;
    Ok(())
}
