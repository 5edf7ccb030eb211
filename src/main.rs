mod app;
mod cli;
mod config;
mod detect;
mod http;
mod logging;
mod model;
mod page;
mod paths;
mod store;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::init();
    let config = config::Config::from_env()?;
    app::run(cli, config)
}
