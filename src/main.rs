mod app_data;
mod builds;
mod cli;
mod config;
mod connect;
mod db;
mod package;
mod session;
mod share;
mod state;
mod store;
mod task;
mod util;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    let default_filter = if cli.output.verbose {
        "publisher=debug,info"
    } else {
        "publisher=info,warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = cli::run(cli).await {
        tracing::debug!("Command failed: {:?}", e);
        cli::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
