mod cli;
mod jobs;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // RUST_LOG manda; por defecto info para el engine y la CLI
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("minispark=info,minispark_cli=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli::run()
}
