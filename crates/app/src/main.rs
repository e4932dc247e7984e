use clap::Parser;

mod cli;
mod html;
mod vision;

fn main() {
    if let Err(err) = cli::handle_commands(cli::Cli::parse()) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
