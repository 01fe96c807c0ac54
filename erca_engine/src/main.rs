use anyhow::Result;
use clap::Parser;

mod cli;
mod runtime;

use cli::Args;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    runtime::execute(args)
}
