use clap::Parser;
use alphadesk::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
