use clap::Parser;

use hashgraph::cli::Cli;
use hashgraph::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    Cli::parse().execute().await?;
    Ok(())
}
