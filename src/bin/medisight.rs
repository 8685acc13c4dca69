//! Medisight CLI binary.

use std::process;

use clap::Parser;
use medisight::cli::{MedisightArgs, execute_command};

fn main() {
    let args = MedisightArgs::parse();

    // RUST_LOG still wins over the verbosity flags.
    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    if let Err(e) = execute_command(args) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
