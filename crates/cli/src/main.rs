mod cli;
mod commands;
mod config;
mod logging;
mod render;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    let json = args.json;
    if let Err(err) = commands::run(args).await {
        render::show_error(&err.payload(), json);
        std::process::exit(err.exit_code());
    }
}
